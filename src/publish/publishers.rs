use std::io::Write;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use super::EventPublisher;
use crate::config::{PublisherConfig, PublisherKind};
use crate::error::{Error, Result};

/// 按配置创建发布器
pub fn build_publisher(config: &PublisherConfig) -> Result<Box<dyn EventPublisher>> {
    match config.kind {
        PublisherKind::Log => Ok(Box::new(LogPublisher)),
        PublisherKind::Stdout => Ok(Box::new(JsonLinesPublisher::new(std::io::stdout()))),
        PublisherKind::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .filter(|e| !e.is_empty())
                .ok_or_else(|| Error::Config("http publisher requires an endpoint".into()))?;
            Ok(Box::new(HttpPublisher::new(
                endpoint,
                Duration::from_millis(config.timeout_ms),
            )))
        }
    }
}

/// 只写日志, 不投递
#[derive(Debug, Default)]
pub struct LogPublisher;

impl EventPublisher for LogPublisher {
    fn publish(&mut self, destination: &str, payload: &str, partition_key: Option<&str>) -> Result<()> {
        info!(destination, partition_key, payload, "lifecycle event");
        Ok(())
    }
}

#[derive(Serialize)]
struct Record<'a> {
    destination: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    partition_key: Option<&'a str>,
    payload: serde_json::Value,
}

/// 每个事件一行 JSON
pub struct JsonLinesPublisher<W> {
    writer: W,
}

impl<W: Write + Send> JsonLinesPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> EventPublisher for JsonLinesPublisher<W> {
    fn publish(&mut self, destination: &str, payload: &str, partition_key: Option<&str>) -> Result<()> {
        let record = Record {
            destination,
            partition_key,
            payload: serde_json::from_str(payload)?,
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// HTTP 发布: POST `<endpoint>/<destination>`
pub struct HttpPublisher {
    agent: ureq::Agent,
    endpoint: String,
}

impl HttpPublisher {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, destination: &str) -> String {
        format!("{}/{}", self.endpoint, destination)
    }
}

impl EventPublisher for HttpPublisher {
    fn publish(&mut self, destination: &str, payload: &str, partition_key: Option<&str>) -> Result<()> {
        let mut request = self
            .agent
            .post(&self.url_for(destination))
            .set("Content-Type", "application/json");
        if let Some(key) = partition_key {
            request = request.set("x-partition-key", key);
        }
        request.send_string(payload).map_err(|e| Error::Publish {
            destination: destination.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read};
    use std::net::TcpListener;

    #[test]
    fn test_json_lines_record() {
        let mut publisher = JsonLinesPublisher::new(Vec::new());
        publisher
            .publish("sentinel-events", r#"{"uuid":"abc","action":"appeared"}"#, Some("abc"))
            .unwrap();
        publisher.publish("camera-events", r#"{"uuid":"def"}"#, None).unwrap();

        let out = String::from_utf8(publisher.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> =
            out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["destination"], "sentinel-events");
        assert_eq!(lines[0]["partition_key"], "abc");
        assert_eq!(lines[0]["payload"]["action"], "appeared");
        assert!(lines[1].get("partition_key").is_none());
    }

    #[test]
    fn test_json_lines_rejects_non_json_payload() {
        let mut publisher = JsonLinesPublisher::new(Vec::new());
        assert!(publisher.publish("q", "not json", None).is_err());
    }

    #[test]
    fn test_build_http_requires_endpoint() {
        let config = PublisherConfig {
            kind: PublisherKind::Http,
            ..Default::default()
        };
        assert!(matches!(build_publisher(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_http_posts_with_partition_key() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = Vec::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
                let lower = line.to_ascii_lowercase();
                if let Some(value) = lower.strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap();
                }
                head.push(lower);
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).unwrap();
            let mut stream = stream;
            std::io::Write::write_all(
                &mut stream,
                b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            )
            .unwrap();
            (head, String::from_utf8(body).unwrap())
        });

        let mut publisher = HttpPublisher::new(&format!("http://127.0.0.1:{port}/"), Duration::from_secs(5));
        publisher
            .publish("sentinel-events", r#"{"uuid":"abc"}"#, Some("abc"))
            .unwrap();

        let (head, body) = server.join().unwrap();
        assert!(head[0].starts_with("post /sentinel-events "));
        assert!(head.iter().any(|h| h.trim() == "x-partition-key: abc"));
        assert_eq!(body, r#"{"uuid":"abc"}"#);
    }

    #[test]
    fn test_http_failure_is_publish_error() {
        // 绑定后立即释放, 端口上没有服务
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let mut publisher = HttpPublisher::new(&format!("http://127.0.0.1:{port}"), Duration::from_secs(2));
        let err = publisher.publish("q", "{}", None).unwrap_err();
        assert!(matches!(err, Error::Publish { ref destination, .. } if destination == "q"));
    }
}
