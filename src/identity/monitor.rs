//! 生命周期巡检
//! Lifecycle monitor: periodically evicts identities that went silent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{select, tick, Receiver, Sender};
use tracing::{debug, info, warn};

use super::event::LifecycleEvent;
use super::registry::IdentityRegistry;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct LifecycleMonitor {
    registry: Arc<IdentityRegistry>,
    timeout: Duration,
    sweep_interval: Duration,
    lock_timeout: Duration,
}

impl LifecycleMonitor {
    pub fn new(registry: Arc<IdentityRegistry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn timeout_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::MAX)
    }

    /// 阻塞等锁, 移除超时身份并生成 disappeared 事件
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Vec<LifecycleEvent> {
        let evicted = self.registry.lock().evict_expired(now, self.timeout_delta());
        Self::announce(evicted)
    }

    /// 在 `lock_timeout` 内拿不到锁则返回 None, 下个周期重试
    pub fn try_sweep_at(&self, now: DateTime<Utc>) -> Option<Vec<LifecycleEvent>> {
        let mut state = self.registry.try_lock_for(self.lock_timeout)?;
        let evicted = state.evict_expired(now, self.timeout_delta());
        drop(state);
        Some(Self::announce(evicted))
    }

    fn announce(evicted: Vec<super::types::GlobalIdentity>) -> Vec<LifecycleEvent> {
        evicted
            .iter()
            .map(|identity| {
                info!(
                    global_id = %identity.global_id(),
                    cameras = ?identity.cameras_seen(),
                    first_seen = %identity.first_seen(),
                    last_seen = %identity.last_seen(),
                    "person has disappeared from all cameras"
                );
                LifecycleEvent::identity_disappeared(identity)
            })
            .collect()
    }

    /// 巡检线程主循环, `shutdown` 断开后退出
    pub fn run(&self, events: Sender<LifecycleEvent>, shutdown: Receiver<()>) {
        info!(
            timeout_secs = self.timeout.as_secs_f64(),
            interval_secs = self.sweep_interval.as_secs_f64(),
            "lifecycle monitor started"
        );
        let ticker = tick(self.sweep_interval);
        loop {
            select! {
                recv(ticker) -> _ => {
                    match self.try_sweep_at(Utc::now()) {
                        Some(evicted) => {
                            for event in evicted {
                                if events.send(event).is_err() {
                                    warn!("event channel closed, dropping disappearance event");
                                }
                            }
                        }
                        None => debug!("registry busy, sweep deferred to next tick"),
                    }
                }
                recv(shutdown) -> _ => break,
            }
        }
        info!("lifecycle monitor stopped");
    }
}
