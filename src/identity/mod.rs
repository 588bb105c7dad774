/// 跨摄像头身份系统 (Cross-camera Identity System)
///
/// 多个摄像头线程并发调用, 共享一张注册表:
/// - Matcher:          观测 → 全局身份 (匹配或新建)
/// - IdentityRegistry: 全局身份存储, 公平锁
/// - LifecycleMonitor: 周期巡检, 超时移除并生成 disappeared 事件
pub mod event;
pub mod matcher;
pub mod monitor;
pub mod registry;
pub mod types;

pub use event::{Action, EventPayload, EventScope, LifecycleEvent};
pub use matcher::{MatchOutcome, Matcher, DEFAULT_THRESHOLD};
pub use monitor::LifecycleMonitor;
pub use registry::IdentityRegistry;
pub use types::{
    BBox, Embedding, GlobalIdentity, RepresentativeMode, TrackObservation, PERSON_CLASS_ID,
    PERSON_LABEL,
};
