// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 命令行与JSON配置
pub mod error;
pub mod identity; // 跨摄像头身份: 匹配, 注册表, 巡检
pub mod ingest; // 观测输入: 回放, 帧消息
pub mod pipeline; // 线程装配
pub mod publish; // 事件发布
pub mod tracking; // 单摄像头跟踪

pub use crate::config::{Args, SentinelConfig};
pub use crate::error::{Error, Result};
pub use crate::identity::{
    Embedding, GlobalIdentity, IdentityRegistry, LifecycleEvent, LifecycleMonitor, MatchOutcome,
    Matcher, TrackObservation,
};
pub use crate::pipeline::{Sentinel, ShutdownSummary};
