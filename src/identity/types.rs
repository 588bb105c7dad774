// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// COCO 中 "person" 的类别ID
pub const PERSON_CLASS_ID: u32 = 0;
pub const PERSON_LABEL: &str = "person";

/// 外观特征向量 (appearance embedding)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Embedding {
    // An float32 1-dim tensor
    data: Array1<f32>,
}

impl Embedding {
    pub fn new(data: Array1<f32>) -> Self {
        Self { data }
    }

    pub fn from_vec(values: Vec<f32>) -> Self {
        Self {
            data: Array1::from(values),
        }
    }

    pub fn data(&self) -> &Array1<f32> {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn l2(&self) -> f32 {
        self.data.dot(&self.data).sqrt()
    }

    /// 空向量或含 NaN/inf 的向量不能参与匹配
    pub fn validate(&self) -> Result<()> {
        if self.data.is_empty() {
            return Err(Error::EmptyEmbedding);
        }
        if self.data.iter().any(|x| !x.is_finite()) {
            return Err(Error::InvalidEmbedding);
        }
        Ok(())
    }

    /// 余弦距离 `1 - cos(a, b)`, 0 表示方向相同.
    ///
    /// 任一向量模长为 0 时余弦无定义, 按正交处理返回 1.0.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        let denom = self.l2() * other.l2();
        if denom <= f32::EPSILON {
            return 1.0;
        }
        let similarity = (self.data.dot(&other.data) / denom).clamp(-1.0, 1.0);
        1.0 - similarity
    }

    /// 两点均值 (running average)
    pub fn midpoint(&self, other: &Embedding) -> Embedding {
        Embedding::new((&self.data + &other.data) / 2.0)
    }

    /// 多个向量的算术平均, 调用方保证维度一致
    pub fn mean<'a, I>(items: I) -> Option<Embedding>
    where
        I: IntoIterator<Item = &'a Embedding>,
    {
        let mut iter = items.into_iter();
        let first = iter.next()?;
        let mut sum = first.data.clone();
        let mut count = 1usize;
        for e in iter {
            sum += &e.data;
            count += 1;
        }
        Some(Embedding::new(sum / count as f32))
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::from_vec(values)
    }
}

/// 检测框 (Detection bounding box)
#[derive(Clone, Debug, PartialEq, Default)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
            class_id: PERSON_CLASS_ID,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// 平移后的框 (用于运动预测)
    pub fn shifted(&self, dx: f32, dy: f32) -> BBox {
        BBox {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
            ..self.clone()
        }
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

/// 单摄像头跟踪观测 (只在一次匹配调用中存在)
#[derive(Clone, Debug)]
pub struct TrackObservation {
    pub camera_id: String,
    pub source_id: String,
    /// 仅在本摄像头的跟踪器内唯一
    pub track_id: u32,
    pub bbox: BBox,
    pub embedding: Embedding,
    /// 采集时间
    pub timestamp: DateTime<Utc>,
    /// 跟踪器是否已确认该轨迹
    pub confirmed: bool,
    /// 距离上次检测更新的帧数
    pub time_since_update: u32,
}

impl TrackObservation {
    pub fn confidence(&self) -> f32 {
        self.bbox.confidence
    }
}

/// 代表向量的更新策略
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepresentativeMode {
    /// 旧代表向量与新向量取两点均值
    #[default]
    RunningMean,
    /// 最近 K 个匹配向量的均值
    Window(usize),
}

/// 跨摄像头全局身份
#[derive(Clone, Debug)]
pub struct GlobalIdentity {
    global_id: Uuid,
    representative: Embedding,
    /// 只在 `Window` 模式下使用
    history: VecDeque<Embedding>,
    cameras_seen: BTreeSet<String>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    source_id: String,
    last_camera_id: String,
    observations: u64,
}

impl GlobalIdentity {
    pub(crate) fn create(
        source_id: &str,
        camera_id: &str,
        embedding: Embedding,
        now: DateTime<Utc>,
        mode: RepresentativeMode,
    ) -> Self {
        let mut history = VecDeque::new();
        if let RepresentativeMode::Window(_) = mode {
            history.push_back(embedding.clone());
        }
        Self {
            global_id: Uuid::new_v4(),
            representative: embedding,
            history,
            cameras_seen: BTreeSet::from([camera_id.to_string()]),
            first_seen: now,
            last_seen: now,
            source_id: source_id.to_string(),
            last_camera_id: camera_id.to_string(),
            observations: 1,
        }
    }

    /// 合并一次匹配: 更新代表向量、摄像头集合、最后出现时间
    pub(crate) fn absorb(
        &mut self,
        camera_id: &str,
        embedding: &Embedding,
        now: DateTime<Utc>,
        mode: RepresentativeMode,
    ) {
        match mode {
            RepresentativeMode::RunningMean => {
                self.representative = self.representative.midpoint(embedding);
            }
            RepresentativeMode::Window(k) => {
                self.history.push_back(embedding.clone());
                while self.history.len() > k.max(1) {
                    self.history.pop_front();
                }
                if let Some(mean) = Embedding::mean(self.history.iter()) {
                    self.representative = mean;
                }
            }
        }
        if !self.cameras_seen.contains(camera_id) {
            self.cameras_seen.insert(camera_id.to_string());
        }
        self.last_camera_id = camera_id.to_string();
        // last_seen 只增不减
        if now > self.last_seen {
            self.last_seen = now;
        }
        self.observations += 1;
    }

    pub fn global_id(&self) -> Uuid {
        self.global_id
    }

    pub fn representative(&self) -> &Embedding {
        &self.representative
    }

    pub fn cameras_seen(&self) -> &BTreeSet<String> {
        &self.cameras_seen
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn last_camera_id(&self) -> &str {
        &self.last_camera_id
    }

    pub fn observations(&self) -> u64 {
        self.observations
    }

    pub fn dimension(&self) -> usize {
        self.representative.len()
    }
}
