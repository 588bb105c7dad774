//! 全局身份注册表
//! Identity registry shared by the matcher and the lifecycle monitor.
//!
//! 所有读-改-写序列都在同一把锁内完成, 外部拿到的只有拷贝.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{FairMutex, FairMutexGuard};
use uuid::Uuid;

use super::types::GlobalIdentity;

/// 锁内状态. 身份按创建顺序存放, 保证扫描顺序确定.
#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    identities: Vec<GlobalIdentity>,
    closed: bool,
}

impl RegistryState {
    pub(crate) fn identities(&self) -> &[GlobalIdentity] {
        &self.identities
    }

    pub(crate) fn identity_mut(&mut self, index: usize) -> Option<&mut GlobalIdentity> {
        self.identities.get_mut(index)
    }

    pub(crate) fn insert(&mut self, identity: GlobalIdentity) {
        self.identities.push(identity);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// 所有存活身份共用同一维度, 取第一个即可
    pub(crate) fn dimension(&self) -> Option<usize> {
        self.identities.first().map(GlobalIdentity::dimension)
    }

    /// 移除 `now - last_seen > timeout` 的身份, 保持其余身份的顺序
    pub(crate) fn evict_expired(
        &mut self,
        now: DateTime<Utc>,
        timeout: chrono::Duration,
    ) -> Vec<GlobalIdentity> {
        let mut evicted = Vec::new();
        let mut kept = Vec::with_capacity(self.identities.len());
        for identity in self.identities.drain(..) {
            if now - identity.last_seen() > timeout {
                evicted.push(identity);
            } else {
                kept.push(identity);
            }
        }
        self.identities = kept;
        evicted
    }
}

/// 注册表: 一把 FIFO 公平锁保护全部身份.
///
/// `new()` 创建空表, `shutdown()` 关闭并清空. 通过 `Arc` 显式传给
/// [`Matcher`](super::Matcher) 和 [`LifecycleMonitor`](super::LifecycleMonitor).
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    state: FairMutex<RegistryState>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self {
            state: FairMutex::new(RegistryState::default()),
        }
    }

    pub(crate) fn lock(&self) -> FairMutexGuard<'_, RegistryState> {
        self.state.lock()
    }

    pub(crate) fn try_lock_for(&self, timeout: Duration) -> Option<FairMutexGuard<'_, RegistryState>> {
        self.state.try_lock_for(timeout)
    }

    pub fn len(&self) -> usize {
        self.lock().identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().identities.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn get(&self, global_id: Uuid) -> Option<GlobalIdentity> {
        self.lock()
            .identities
            .iter()
            .find(|i| i.global_id() == global_id)
            .cloned()
    }

    /// 按创建顺序返回所有存活身份的拷贝
    pub fn snapshot(&self) -> Vec<GlobalIdentity> {
        self.lock().identities.clone()
    }

    /// 关闭注册表并取出全部身份. 之后的匹配调用返回 `RegistryClosed`.
    pub fn shutdown(&self) -> Vec<GlobalIdentity> {
        let mut state = self.lock();
        state.closed = true;
        std::mem::take(&mut state.identities)
    }
}
