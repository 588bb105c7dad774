//! 服务装配: 注册表 + 摄像头线程 + 巡检线程 + 分发线程

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{error, info};

use super::worker::{CameraWorker, WorkerReport};
use crate::config::SentinelConfig;
use crate::error::Result;
use crate::identity::{IdentityRegistry, LifecycleEvent, LifecycleMonitor, Matcher};
use crate::ingest::ObservationSource;
use crate::publish::{DispatchStats, Dispatcher, EventPublisher};

/// 停机后的汇总
#[derive(Debug, Clone, Default)]
pub struct ShutdownSummary {
    pub workers: Vec<WorkerReport>,
    /// 停机时清空注册表产生的 disappeared 数
    pub flushed: usize,
    pub dispatch: DispatchStats,
}

pub struct Sentinel {
    config: SentinelConfig,
    registry: Arc<IdentityRegistry>,
    matcher: Matcher,
    events: Option<Sender<LifecycleEvent>>,
    shutdown_tx: Option<Sender<()>>,
    shutdown_rx: Receiver<()>,
    workers: Vec<(String, JoinHandle<WorkerReport>)>,
    finished: Vec<WorkerReport>,
    monitor: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<DispatchStats>>,
}

impl Sentinel {
    /// 创建注册表, 启动巡检线程和分发线程
    pub fn start(config: SentinelConfig, publisher: Box<dyn EventPublisher>) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(IdentityRegistry::new());
        let matcher = Matcher::new(registry.clone())
            .with_threshold(config.matcher.threshold)
            .with_mode(config.matcher.representative);

        let (events_tx, events_rx) = unbounded::<LifecycleEvent>();
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();

        let dispatcher = Dispatcher::new(publisher, config.publisher.queue.clone())
            .with_camera_queue(config.camera_queue());
        let dispatcher = thread::Builder::new()
            .name("dispatcher".into())
            .spawn(move || dispatcher.run(events_rx))?;

        let monitor = LifecycleMonitor::new(registry.clone())
            .with_timeout(config.lifecycle.timeout())
            .with_sweep_interval(config.lifecycle.sweep_interval())
            .with_lock_timeout(config.lifecycle.lock_timeout());
        let monitor_events = events_tx.clone();
        let monitor_shutdown = shutdown_rx.clone();
        let monitor = thread::Builder::new()
            .name("lifecycle-monitor".into())
            .spawn(move || monitor.run(monitor_events, monitor_shutdown))?;

        info!(
            source_id = %config.source_id,
            threshold = config.matcher.threshold,
            timeout_secs = config.lifecycle.timeout_secs,
            "sentinel started"
        );

        Ok(Self {
            config,
            registry,
            matcher,
            events: Some(events_tx),
            shutdown_tx: Some(shutdown_tx),
            shutdown_rx,
            workers: Vec::new(),
            finished: Vec::new(),
            monitor: Some(monitor),
            dispatcher: Some(dispatcher),
        })
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    /// 为一个摄像头启动工作线程
    pub fn spawn_camera(&mut self, source: Box<dyn ObservationSource>) -> Result<()> {
        let Some(events) = self.events.clone() else {
            return Err(crate::Error::RegistryClosed);
        };
        let camera_id = source.camera_id().to_string();
        let worker = CameraWorker::new(source, self.matcher.clone(), events)
            .with_grace_frames(self.config.tracking.grace_frames)
            .with_max_staleness(self.config.tracking.max_staleness);
        let shutdown = self.shutdown_rx.clone();
        let handle = thread::Builder::new()
            .name(format!("camera-{camera_id}"))
            .spawn(move || worker.run(shutdown))?;
        self.workers.push((camera_id, handle));
        Ok(())
    }

    /// 等待所有摄像头线程自然结束 (例如回放完毕)
    pub fn wait_for_cameras(&mut self) -> &[WorkerReport] {
        for (camera_id, handle) in self.workers.drain(..) {
            self.finished.push(join_worker(camera_id, handle));
        }
        &self.finished
    }

    /// 有序停机: 通知 → 等待线程 → 清空注册表 → 关闭分发
    pub fn shutdown(mut self) -> ShutdownSummary {
        self.stop()
    }

    fn stop(&mut self) -> ShutdownSummary {
        // 断开停机通道, 工作线程和巡检线程在当前单元结束后退出
        self.shutdown_tx.take();
        for (camera_id, handle) in self.workers.drain(..) {
            self.finished.push(join_worker(camera_id, handle));
        }
        if let Some(monitor) = self.monitor.take() {
            if monitor.join().is_err() {
                error!("lifecycle monitor panicked");
            }
        }

        let drained = self.registry.shutdown();
        let mut flushed = 0;
        if let Some(events) = self.events.take() {
            if self.config.lifecycle.flush_on_shutdown {
                for identity in &drained {
                    if events.send(LifecycleEvent::identity_disappeared(identity)).is_ok() {
                        flushed += 1;
                    }
                }
            }
        }

        let dispatch = match self.dispatcher.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                error!("dispatcher panicked");
                DispatchStats::default()
            }
            None => DispatchStats::default(),
        };
        info!(
            cameras = self.finished.len(),
            drained = drained.len(),
            flushed,
            published = dispatch.published,
            "sentinel stopped"
        );
        ShutdownSummary {
            workers: std::mem::take(&mut self.finished),
            flushed,
            dispatch,
        }
    }
}

impl Drop for Sentinel {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some() {
            self.stop();
        }
    }
}

fn join_worker(camera_id: String, handle: JoinHandle<WorkerReport>) -> WorkerReport {
    handle.join().unwrap_or_else(|_| {
        error!(camera_id = %camera_id, "camera worker panicked");
        WorkerReport {
            camera_id,
            error: Some("worker panicked".to_string()),
            ..Default::default()
        }
    })
}
