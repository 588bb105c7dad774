//! 事件分发线程: 通道 → 序列化 → 发布器

use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use super::EventPublisher;
use crate::identity::{EventScope, LifecycleEvent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub published: u64,
    pub failed: u64,
}

pub struct Dispatcher {
    publisher: Box<dyn EventPublisher>,
    queue: String,
    camera_queue: String,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(publisher: Box<dyn EventPublisher>, queue: impl Into<String>) -> Self {
        let queue = queue.into();
        Self {
            publisher,
            camera_queue: queue.clone(),
            queue,
            stats: DispatchStats::default(),
        }
    }

    pub fn with_camera_queue(mut self, camera_queue: impl Into<String>) -> Self {
        self.camera_queue = camera_queue.into();
        self
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    fn destination(&self, event: &LifecycleEvent) -> &str {
        match event.scope {
            EventScope::Global => &self.queue,
            EventScope::Camera => &self.camera_queue,
        }
    }

    /// 发布一个事件; 失败只记录, 不重试
    pub fn dispatch(&mut self, event: &LifecycleEvent) {
        let payload = match event.payload().to_json() {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.failed += 1;
                warn!(global_id = %event.global_id, error = %e, "failed to serialise event");
                return;
            }
        };
        let destination = self.destination(event).to_string();
        let key = event.global_id.to_string();
        match self.publisher.publish(&destination, &payload, Some(&key)) {
            Ok(()) => {
                self.stats.published += 1;
                debug!(destination = %destination, global_id = %key, action = ?event.action, "event published");
            }
            Err(e) => {
                self.stats.failed += 1;
                warn!(destination = %destination, global_id = %key, error = %e, "publish failed, event not retried");
            }
        }
    }

    /// 分发线程主循环, 所有发送端关闭后退出
    pub fn run(mut self, events: Receiver<LifecycleEvent>) -> DispatchStats {
        for event in events.iter() {
            self.dispatch(&event);
        }
        info!(
            published = self.stats.published,
            failed = self.stats.failed,
            "dispatcher stopped"
        );
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::identity::Action;
    use chrono::Utc;
    use crossbeam_channel::unbounded;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use uuid::Uuid;

    type Sent = Arc<Mutex<Vec<(String, String, Option<String>)>>>;

    struct Recording(Sent);

    impl EventPublisher for Recording {
        fn publish(&mut self, destination: &str, payload: &str, partition_key: Option<&str>) -> Result<()> {
            self.0.lock().push((
                destination.to_string(),
                payload.to_string(),
                partition_key.map(str::to_string),
            ));
            Ok(())
        }
    }

    struct Failing;

    impl EventPublisher for Failing {
        fn publish(&mut self, destination: &str, _: &str, _: Option<&str>) -> Result<()> {
            Err(Error::Publish {
                destination: destination.to_string(),
                reason: "broker down".into(),
            })
        }
    }

    fn camera_event(action: Action) -> LifecycleEvent {
        let now = Utc::now();
        LifecycleEvent::camera(Uuid::new_v4(), action, "store", "cam1", now, now)
    }

    #[test]
    fn test_routes_by_scope() {
        let sent = Sent::default();
        let mut dispatcher =
            Dispatcher::new(Box::new(Recording(sent.clone())), "global").with_camera_queue("per-camera");

        let mut global = camera_event(Action::Disappeared);
        global.scope = EventScope::Global;
        let camera = camera_event(Action::Appeared);
        dispatcher.dispatch(&global);
        dispatcher.dispatch(&camera);

        let sent = sent.lock();
        assert_eq!(sent[0].0, "global");
        assert_eq!(sent[0].2.as_deref(), Some(global.global_id.to_string().as_str()));
        assert_eq!(sent[1].0, "per-camera");
        let payload: serde_json::Value = serde_json::from_str(&sent[1].1).unwrap();
        assert_eq!(payload["action"], "appeared");
        assert_eq!(payload["camera_id"], "cam1");
    }

    #[test]
    fn test_camera_queue_defaults_to_queue() {
        let sent = Sent::default();
        let mut dispatcher = Dispatcher::new(Box::new(Recording(sent.clone())), "events");
        dispatcher.dispatch(&camera_event(Action::Appeared));
        assert_eq!(sent.lock()[0].0, "events");
    }

    #[test]
    fn test_failures_are_counted_not_retried() {
        let (tx, rx) = unbounded();
        tx.send(camera_event(Action::Appeared)).unwrap();
        tx.send(camera_event(Action::Disappeared)).unwrap();
        drop(tx);

        let stats = Dispatcher::new(Box::new(Failing), "events").run(rx);
        assert_eq!(stats, DispatchStats { published: 0, failed: 2 });
    }

    #[test]
    fn test_run_drains_until_senders_close() {
        let sent = Sent::default();
        let (tx, rx) = unbounded();
        let dispatcher = Dispatcher::new(Box::new(Recording(sent.clone())), "events");
        let handle = std::thread::spawn(move || dispatcher.run(rx));
        for _ in 0..5 {
            tx.send(camera_event(Action::Appeared)).unwrap();
        }
        drop(tx);
        assert_eq!(handle.join().unwrap().published, 5);
        assert_eq!(sent.lock().len(), 5);
    }
}
