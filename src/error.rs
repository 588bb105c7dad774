pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("embedding has {actual} dims, live identities use {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding is empty")]
    EmptyEmbedding,
    #[error("embedding contains a non-finite component")]
    InvalidEmbedding,
    #[error("{0} must not be empty")]
    EmptyIdentifier(&'static str),
    #[error("identity registry has been shut down")]
    RegistryClosed,
    #[error("could not open stream for camera {camera_id}: {reason}")]
    StreamOpen { camera_id: String, reason: String },
    #[error("frame skipped: {0}")]
    Frame(String),
    #[error("malformed frame envelope: {0}")]
    Envelope(String),
    #[error("publish to {destination} failed: {reason}")]
    Publish { destination: String, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("there was an i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("error while decoding the image (via the `image` crate): {0}")]
    Image(#[from] image::ImageError),
    #[error("invalid base64 frame data: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl Error {
    /// 单帧级别的错误: 记录日志后跳过, 工作线程继续
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Frame(_) | Error::Envelope(_) | Error::Image(_) | Error::Base64(_) | Error::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Frame("bad".into()).is_transient());
        assert!(Error::Envelope("bad".into()).is_transient());
        assert!(!Error::RegistryClosed.is_transient());
        assert!(!Error::StreamOpen {
            camera_id: "cam1".into(),
            reason: "unreachable".into()
        }
        .is_transient());
    }

    #[test]
    fn test_dimension_message() {
        let err = Error::DimensionMismatch {
            expected: 128,
            actual: 64,
        };
        assert_eq!(err.to_string(), "embedding has 64 dims, live identities use 128");
    }
}
