/// 事件发布 (Event Publishing)
///
/// 生命周期事件经通道汇总到 `Dispatcher`, 序列化后交给 `EventPublisher`.
/// 发布失败只记录日志, 不重试 (身份状态已经变更, 不回滚).
pub mod dispatcher;
pub mod publishers;

pub use dispatcher::{DispatchStats, Dispatcher};
pub use publishers::{build_publisher, HttpPublisher, JsonLinesPublisher, LogPublisher};

use crate::error::Result;

/// 下游消息队列的最小接口
pub trait EventPublisher: Send {
    fn publish(&mut self, destination: &str, payload: &str, partition_key: Option<&str>) -> Result<()>;
}
