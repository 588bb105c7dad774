/// 监控流水线 (Sentinel Pipeline)
///
/// 多线程架构, 通过 crossbeam 通道通信:
/// - CameraWorker: 每个摄像头一个线程, 观测 → 匹配 → 事件
/// - Monitor:      生命周期巡检线程
/// - Dispatcher:   事件发布线程
pub mod service;
pub mod worker;

pub use service::{Sentinel, ShutdownSummary};
pub use worker::{CameraWorker, WorkerReport};

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use chrono::Utc;

    use crate::error::{Error, Result};
    use crate::identity::{BBox, Embedding, TrackObservation};
    use crate::ingest::{FrameBatch, ObservationSource};

    pub fn observation(camera: &str, track_id: u32, embedding: &[f32], confirmed: bool) -> TrackObservation {
        TrackObservation {
            camera_id: camera.to_string(),
            source_id: "store".to_string(),
            track_id,
            bbox: BBox::new(0.0, 0.0, 20.0, 60.0, 0.9),
            embedding: Embedding::from_vec(embedding.to_vec()),
            timestamp: Utc::now(),
            confirmed,
            time_since_update: 0,
        }
    }

    /// 按脚本逐帧返回观测的测试源
    pub struct ScriptedSource {
        camera_id: String,
        steps: VecDeque<Result<Vec<TrackObservation>>>,
        repeat: Option<Vec<TrackObservation>>,
        fail_open: bool,
    }

    impl ScriptedSource {
        pub fn new(camera_id: &str) -> Self {
            Self {
                camera_id: camera_id.to_string(),
                steps: VecDeque::new(),
                repeat: None,
                fail_open: false,
            }
        }

        pub fn push_frame(&mut self, observations: Vec<TrackObservation>) {
            self.steps.push_back(Ok(observations));
        }

        pub fn push_error(&mut self, error: Error) {
            self.steps.push_back(Err(error));
        }

        /// 脚本用完后一直重复这一帧
        pub fn endless(mut self, observations: Vec<TrackObservation>) -> Self {
            self.repeat = Some(observations);
            self
        }

        pub fn failing_open(mut self) -> Self {
            self.fail_open = true;
            self
        }
    }

    impl ObservationSource for ScriptedSource {
        fn camera_id(&self) -> &str {
            &self.camera_id
        }

        fn source_id(&self) -> &str {
            "store"
        }

        fn open(&mut self) -> Result<()> {
            if self.fail_open {
                return Err(Error::StreamOpen {
                    camera_id: self.camera_id.clone(),
                    reason: "connection refused".into(),
                });
            }
            Ok(())
        }

        fn next_batch(&mut self) -> Result<Option<FrameBatch>> {
            let observations = match self.steps.pop_front() {
                Some(step) => step?,
                None => match &self.repeat {
                    Some(observations) => {
                        std::thread::sleep(std::time::Duration::from_millis(1));
                        observations.clone()
                    }
                    None => return Ok(None),
                },
            };
            Ok(Some(FrameBatch {
                timestamp: Utc::now(),
                observations,
            }))
        }
    }
}
