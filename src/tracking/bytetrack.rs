//! ByteTrack 单摄像头跟踪
//! ByteTrack-style per-camera tracker carrying appearance embeddings.
//!
//! 核心思想:
//! 1. 高低分检测框分开处理
//! 2. 高分框优先匹配 (IOU)
//! 3. 低分框救援丢失的轨迹
//! 4. 连续命中 `min_hits` 次后轨迹才算确认

use chrono::{DateTime, Utc};

use crate::identity::{BBox, Embedding, TrackObservation, PERSON_CLASS_ID};

/// 速度衰减因子: 每帧保留95%速度
const VELOCITY_DECAY: f32 = 0.95;

/// 单帧检测结果 (检测框 + 外观特征)
#[derive(Clone, Debug)]
pub struct Detection {
    pub bbox: BBox,
    pub embedding: Embedding,
}

#[derive(Clone, Debug)]
pub struct ByteTrackConfig {
    /// 确认轨迹所需的命中次数
    pub min_hits: u32,
    /// 最大允许丢失帧数
    pub max_lost_frames: u32,
    pub high_score_threshold: f32,
    /// 低分检测阈值 (用于救援)
    pub low_score_threshold: f32,
    pub high_iou_threshold: f32,
    pub low_iou_threshold: f32,
}

impl Default for ByteTrackConfig {
    fn default() -> Self {
        Self {
            min_hits: 3,
            max_lost_frames: 30,
            high_score_threshold: 0.5,
            low_score_threshold: 0.1,
            high_iou_threshold: 0.3,
            low_iou_threshold: 0.2,
        }
    }
}

/// 单摄像头轨迹
#[derive(Clone, Debug)]
pub struct CameraTrack {
    pub id: u32,
    pub bbox: BBox,
    pub embedding: Embedding,
    pub hits: u32,
    /// 距离上次检测更新的帧数
    pub time_since_update: u32,
    velocity: (f32, f32),
    confirmed: bool,
}

impl CameraTrack {
    fn new(id: u32, detection: &Detection, min_hits: u32) -> Self {
        Self {
            id,
            bbox: detection.bbox.clone(),
            embedding: detection.embedding.clone(),
            hits: 1,
            time_since_update: 0,
            velocity: (0.0, 0.0),
            confirmed: min_hits <= 1,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// 匀速模型下一帧的位置
    pub fn predicted_bbox(&self) -> BBox {
        self.bbox.shifted(self.velocity.0, self.velocity.1)
    }

    fn update(&mut self, detection: &Detection, min_hits: u32) {
        let (cx, cy) = self.bbox.center();
        let (nx, ny) = detection.bbox.center();
        // 新旧速度各占一半, 抑制抖动
        self.velocity = (
            (self.velocity.0 + (nx - cx)) / 2.0,
            (self.velocity.1 + (ny - cy)) / 2.0,
        );
        self.bbox = detection.bbox.clone();
        self.embedding = detection.embedding.clone();
        self.hits += 1;
        self.time_since_update = 0;
        if self.hits >= min_hits {
            self.confirmed = true;
        }
    }

    fn mark_lost(&mut self) {
        self.bbox = self.predicted_bbox();
        self.velocity = (self.velocity.0 * VELOCITY_DECAY, self.velocity.1 * VELOCITY_DECAY);
        self.time_since_update += 1;
    }
}

/// ByteTrack 追踪器
#[derive(Debug)]
pub struct ByteTracker {
    tracks: Vec<CameraTrack>,
    next_id: u32,
    config: ByteTrackConfig,
}

impl ByteTracker {
    pub fn new(config: ByteTrackConfig) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            config,
        }
    }

    pub fn tracks(&self) -> &[CameraTrack] {
        &self.tracks
    }

    /// 更新跟踪 (ByteTrack 两轮匹配)
    pub fn update(&mut self, detections: &[Detection]) -> &[CameraTrack] {
        // 只跟踪人
        let (high, low): (Vec<usize>, Vec<usize>) = detections
            .iter()
            .enumerate()
            .filter(|(_, d)| {
                d.bbox.class_id == PERSON_CLASS_ID
                    && d.bbox.confidence >= self.config.low_score_threshold
            })
            .map(|(i, _)| i)
            .partition(|&i| detections[i].bbox.confidence >= self.config.high_score_threshold);

        let mut det_used = vec![false; detections.len()];
        let mut track_used = vec![false; self.tracks.len()];

        // 第一轮: 高分检测 + 所有轨迹
        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        for (d, t) in self.associate(detections, &high, &all_tracks, self.config.high_iou_threshold) {
            det_used[d] = true;
            track_used[t] = true;
            self.tracks[t].update(&detections[d], self.config.min_hits);
        }

        // 第二轮: 低分检测 + 未匹配的轨迹 (救援)
        let leftover: Vec<usize> = (0..self.tracks.len()).filter(|&t| !track_used[t]).collect();
        for (d, t) in self.associate(detections, &low, &leftover, self.config.low_iou_threshold) {
            det_used[d] = true;
            track_used[t] = true;
            self.tracks[t].update(&detections[d], self.config.min_hits);
        }

        for (t, used) in track_used.iter().enumerate() {
            if !used {
                self.tracks[t].mark_lost();
            }
        }

        // 未匹配的高分检测 → 新建轨迹
        for &d in &high {
            if !det_used[d] {
                self.tracks
                    .push(CameraTrack::new(self.next_id, &detections[d], self.config.min_hits));
                self.next_id = self.next_id.wrapping_add(1);
            }
        }

        let max_lost = self.config.max_lost_frames;
        self.tracks.retain(|t| t.time_since_update <= max_lost);
        &self.tracks
    }

    /// 贪心 IOU 匹配, 返回 (检测下标, 轨迹下标)
    fn associate(
        &self,
        detections: &[Detection],
        det_indices: &[usize],
        track_indices: &[usize],
        iou_threshold: f32,
    ) -> Vec<(usize, usize)> {
        let mut candidates = Vec::new();
        for &d in det_indices {
            for &t in track_indices {
                let iou = detections[d].bbox.iou(&self.tracks[t].predicted_bbox());
                if iou >= iou_threshold {
                    candidates.push((iou, d, t));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut pairs = Vec::new();
        let mut det_taken = Vec::new();
        let mut track_taken = Vec::new();
        for (_, d, t) in candidates {
            if det_taken.contains(&d) || track_taken.contains(&t) {
                continue;
            }
            det_taken.push(d);
            track_taken.push(t);
            pairs.push((d, t));
        }
        pairs
    }

    /// 当前轨迹转为观测 (包含未确认和丢失中的轨迹, 由调用方过滤)
    pub fn observations(
        &self,
        camera_id: &str,
        source_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Vec<TrackObservation> {
        self.tracks
            .iter()
            .map(|t| TrackObservation {
                camera_id: camera_id.to_string(),
                source_id: source_id.to_string(),
                track_id: t.id,
                bbox: t.bbox.clone(),
                embedding: t.embedding.clone(),
                timestamp,
                confirmed: t.confirmed,
                time_since_update: t.time_since_update,
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.tracks.clear();
    }
}

impl Default for ByteTracker {
    fn default() -> Self {
        Self::new(ByteTrackConfig::default())
    }
}
