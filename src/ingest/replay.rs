//! 检测结果回放
//! Stored-frame replay: `camera_<camera>_frame_<n>.json`, one file per frame,
//! replayed in numeric frame order through the reference tracker.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use super::{FrameBatch, ObservationSource};
use crate::error::{Error, Result};
use crate::identity::{BBox, Embedding, PERSON_LABEL};
use crate::tracking::{ByteTracker, Detection};

/// 单帧文件内容
#[derive(Debug, Deserialize)]
struct ReplayFrame {
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    detections: Vec<ReplayDetection>,
}

#[derive(Debug, Deserialize)]
struct ReplayDetection {
    bbox: [f32; 4],
    confidence: f32,
    #[serde(default = "default_label")]
    label: String,
    embedding: Vec<f32>,
}

fn default_label() -> String {
    PERSON_LABEL.to_string()
}

impl ReplayDetection {
    fn into_detection(self) -> Option<Detection> {
        // 只保留人
        if self.label != PERSON_LABEL {
            return None;
        }
        let [x1, y1, x2, y2] = self.bbox;
        Some(Detection {
            bbox: BBox::new(x1, y1, x2, y2, self.confidence),
            embedding: Embedding::from_vec(self.embedding),
        })
    }
}

pub struct DetectionReplay {
    dir: PathBuf,
    camera_id: String,
    source_id: String,
    tracker: ByteTracker,
    frames: Vec<PathBuf>,
    cursor: usize,
    /// 回放节奏 (None 表示尽快回放)
    frame_interval: Option<Duration>,
    last_frame: Option<Instant>,
}

impl DetectionReplay {
    pub fn new(
        dir: impl Into<PathBuf>,
        camera_id: impl Into<String>,
        source_id: impl Into<String>,
        tracker: ByteTracker,
    ) -> Self {
        Self {
            dir: dir.into(),
            camera_id: camera_id.into(),
            source_id: source_id.into(),
            tracker,
            frames: Vec::new(),
            cursor: 0,
            frame_interval: None,
            last_frame: None,
        }
    }

    /// 按给定帧率回放, 0 或负数表示不限速; 间隔超出 `Duration` 范围时同样不限速
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.frame_interval = if fps > 0.0 {
            Duration::try_from_secs_f64(1.0 / fps).ok()
        } else {
            None
        };
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn stream_error(&self, reason: impl Into<String>) -> Error {
        Error::StreamOpen {
            camera_id: self.camera_id.clone(),
            reason: reason.into(),
        }
    }

    /// 列出本摄像头的帧文件, 按帧号数值排序
    fn list_frames(dir: &Path, camera_id: &str) -> Result<Vec<PathBuf>> {
        let pattern = format!(r"^camera_{}_frame_(\d+)\.json$", regex::escape(camera_id));
        let re = Regex::new(&pattern).map_err(|e| Error::Config(e.to_string()))?;

        let mut frames = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(index) = re
                .captures(name)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok())
            else {
                continue;
            };
            frames.push((index, path));
        }
        frames.sort_by_key(|(index, _)| *index);
        Ok(frames.into_iter().map(|(_, path)| path).collect())
    }

    fn pace(&mut self) {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
    }
}

impl ObservationSource for DetectionReplay {
    fn camera_id(&self) -> &str {
        &self.camera_id
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn open(&mut self) -> Result<()> {
        if !self.dir.is_dir() {
            return Err(self.stream_error(format!("{} is not a directory", self.dir.display())));
        }
        let frames =
            Self::list_frames(&self.dir, &self.camera_id).map_err(|e| self.stream_error(e.to_string()))?;
        if frames.is_empty() {
            return Err(self.stream_error(format!("no frames in {}", self.dir.display())));
        }
        info!(
            camera_id = %self.camera_id,
            frames = frames.len(),
            dir = %self.dir.display(),
            "replay opened"
        );
        self.frames = frames;
        self.cursor = 0;
        self.tracker.reset();
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<FrameBatch>> {
        let Some(path) = self.frames.get(self.cursor).cloned() else {
            return Ok(None);
        };
        // 先推进游标, 坏帧只跳过一次
        self.cursor += 1;
        self.pace();

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| Error::Frame(format!("{}: {}", path.display(), e)))?;
        let frame: ReplayFrame = serde_json::from_str(&raw)
            .map_err(|e| Error::Frame(format!("{}: {}", path.display(), e)))?;

        let detections: Vec<Detection> = frame
            .detections
            .into_iter()
            .filter_map(ReplayDetection::into_detection)
            .collect();
        debug!(camera_id = %self.camera_id, file = %path.display(), detections = detections.len(), "replay frame");

        let timestamp = frame.timestamp.unwrap_or_else(Utc::now);
        self.tracker.update(&detections);
        Ok(Some(FrameBatch {
            timestamp,
            observations: self
                .tracker
                .observations(&self.camera_id, &self.source_id, timestamp),
        }))
    }
}
