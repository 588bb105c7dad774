/// 观测输入 (Observation Ingestion)
///
/// 每个摄像头一个 `ObservationSource`, 由各自的工作线程驱动:
/// - DetectionReplay: 回放磁盘上逐帧保存的检测结果
/// - EnvelopeSource:  JSON 行消息流 (base64 图像) + FrameAnalyzer
///
/// 检测器和跟踪器对核心不透明, 只通过 `FrameAnalyzer` 交互.
pub mod envelope;
pub mod replay;

use chrono::{DateTime, Utc};
use image::DynamicImage;

use crate::error::Result;
use crate::identity::TrackObservation;
use crate::tracking::{ByteTracker, Detection};

pub use envelope::{EnvelopeSource, FrameEnvelope};
pub use replay::DetectionReplay;

/// 一帧处理后得到的全部轨迹观测 (按采集顺序)
#[derive(Debug, Clone)]
pub struct FrameBatch {
    pub timestamp: DateTime<Utc>,
    pub observations: Vec<TrackObservation>,
}

/// 单摄像头观测源
pub trait ObservationSource: Send {
    fn camera_id(&self) -> &str;

    fn source_id(&self) -> &str;

    /// 打开流; 失败只影响本摄像头的工作线程
    fn open(&mut self) -> Result<()>;

    /// 下一帧. `Ok(None)` 表示流结束, 单帧错误由调用方记录后跳过
    fn next_batch(&mut self) -> Result<Option<FrameBatch>>;
}

/// 帧的来源信息
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub camera_id: String,
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
}

/// 给定一帧图像, 返回轨迹观测
pub trait FrameAnalyzer: Send {
    fn analyze(&mut self, frame: &DynamicImage, ctx: &FrameContext) -> Result<Vec<TrackObservation>>;
}

/// 人体检测器 (输出检测框和外观特征)
pub trait PersonDetector: Send {
    fn detect(&mut self, frame: &DynamicImage) -> Result<Vec<Detection>>;
}

/// 检测器 + ByteTrack 组合成的分析器
pub struct TrackingAnalyzer<D> {
    detector: D,
    tracker: ByteTracker,
}

impl<D: PersonDetector> TrackingAnalyzer<D> {
    pub fn new(detector: D, tracker: ByteTracker) -> Self {
        Self { detector, tracker }
    }
}

impl<D: PersonDetector> FrameAnalyzer for TrackingAnalyzer<D> {
    fn analyze(&mut self, frame: &DynamicImage, ctx: &FrameContext) -> Result<Vec<TrackObservation>> {
        let detections = self.detector.detect(frame)?;
        self.tracker.update(&detections);
        Ok(self
            .tracker
            .observations(&ctx.camera_id, &ctx.source_id, ctx.timestamp))
    }
}
