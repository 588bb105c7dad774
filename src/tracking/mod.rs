/// 单摄像头跟踪 (Per-camera Tracking)
///
/// - ByteTracker: 检测框 → 摄像头内轨迹 (带外观特征)
/// - TrackBook:   轨迹确认状态机, 生成摄像头级 appeared / disappeared
pub mod book;
pub mod bytetrack;

pub use book::{TrackBook, TrackPhase};
pub use bytetrack::{ByteTrackConfig, ByteTracker, CameraTrack, Detection};
