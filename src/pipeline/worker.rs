//! 摄像头工作线程
//! 职责: 读观测 → 全局匹配 → 轨迹状态机 → 发送生命周期事件

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::identity::{LifecycleEvent, Matcher, TrackObservation};
use crate::ingest::{FrameBatch, ObservationSource};
use crate::tracking::TrackBook;

/// 工作线程退出时的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub camera_id: String,
    /// 成功处理的帧数
    pub frames: u64,
    /// 送入匹配器的观测数
    pub observations: u64,
    /// 匹配失败被丢弃的观测数
    pub dropped: u64,
    /// 跳过的坏帧数
    pub skipped_frames: u64,
    /// 致命错误 (打开失败等)
    pub error: Option<String>,
}

pub struct CameraWorker {
    source: Box<dyn ObservationSource>,
    matcher: Matcher,
    book: TrackBook,
    max_staleness: u32,
    events: Sender<LifecycleEvent>,
}

impl CameraWorker {
    pub fn new(source: Box<dyn ObservationSource>, matcher: Matcher, events: Sender<LifecycleEvent>) -> Self {
        Self {
            source,
            matcher,
            book: TrackBook::new(1),
            max_staleness: 1,
            events,
        }
    }

    pub fn with_grace_frames(mut self, grace_frames: u32) -> Self {
        self.book = TrackBook::new(grace_frames);
        self
    }

    pub fn with_max_staleness(mut self, max_staleness: u32) -> Self {
        self.max_staleness = max_staleness;
        self
    }

    pub fn camera_id(&self) -> &str {
        self.source.camera_id()
    }

    /// 运行到流结束、致命错误或 `shutdown` 断开
    pub fn run(mut self, shutdown: Receiver<()>) -> WorkerReport {
        let mut report = WorkerReport {
            camera_id: self.source.camera_id().to_string(),
            ..Default::default()
        };

        if let Err(e) = self.source.open() {
            error!(camera_id = %report.camera_id, error = %e, "failed to open camera stream");
            report.error = Some(e.to_string());
            return report;
        }
        info!(camera_id = %report.camera_id, source_id = %self.source.source_id(), "camera worker started");

        loop {
            // 只在帧之间检查停机信号
            match shutdown.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => {
                    debug!(camera_id = %report.camera_id, "shutdown requested");
                    break;
                }
            }

            match self.source.next_batch() {
                Ok(Some(batch)) => {
                    report.frames += 1;
                    if !self.process(batch, &mut report) {
                        break;
                    }
                }
                Ok(None) => {
                    info!(camera_id = %report.camera_id, frames = report.frames, "stream ended");
                    break;
                }
                Err(e) if e.is_transient() => {
                    report.skipped_frames += 1;
                    warn!(camera_id = %report.camera_id, error = %e, "frame skipped");
                }
                Err(e) => {
                    error!(camera_id = %report.camera_id, error = %e, "camera stream failed");
                    report.error = Some(e.to_string());
                    break;
                }
            }
        }

        // 本摄像头的轨迹全部结束
        for event in self.book.flush() {
            self.emit(event);
        }
        info!(
            camera_id = %report.camera_id,
            frames = report.frames,
            observations = report.observations,
            dropped = report.dropped,
            "camera worker stopped"
        );
        report
    }

    /// 处理一帧; 注册表已关闭时返回 false
    fn process(&mut self, batch: FrameBatch, report: &mut WorkerReport) -> bool {
        let now = Utc::now();
        let camera_id = self.source.camera_id().to_string();

        for obs in &batch.observations {
            if !obs.confirmed {
                self.book.observe_unconfirmed(obs, now);
                continue;
            }
            // 预测中的轨迹不参与匹配, 由状态机累计丢失
            if obs.time_since_update > self.max_staleness {
                continue;
            }
            report.observations += 1;
            match self.match_observation(obs, now) {
                Ok(()) => {}
                Err(Error::RegistryClosed) => {
                    debug!(camera_id = %camera_id, "registry closed, stopping worker");
                    return false;
                }
                Err(e) => {
                    report.dropped += 1;
                    warn!(
                        camera_id = %camera_id,
                        track_id = obs.track_id,
                        error = %e,
                        "observation dropped"
                    );
                }
            }
        }

        for event in self.book.end_frame(&camera_id) {
            self.emit(event);
        }
        true
    }

    fn match_observation(&mut self, obs: &TrackObservation, now: DateTime<Utc>) -> crate::Result<()> {
        let outcome = self
            .matcher
            .match_and_update_at(&obs.source_id, &obs.camera_id, &obs.embedding, now)?;

        if let Some(appeared) = outcome.appeared.clone() {
            info!(
                global_id = %outcome.global_id,
                camera_id = %obs.camera_id,
                "new person appeared"
            );
            self.emit(appeared);
        }
        if let Some(event) = self.book.observe(obs, &outcome, now) {
            self.emit(event);
        }
        Ok(())
    }

    fn emit(&self, event: LifecycleEvent) {
        if self.events.send(event).is_err() {
            debug!(camera_id = %self.source.camera_id(), "event channel closed");
        }
    }
}
