//! 单摄像头轨迹状态机
//! Per-camera track confirmation state machine.
//!
//! `Unconfirmed → Confirmed → Active → Disappeared`
//!
//! 与全局身份的超时是两套独立时钟: 某个摄像头上的轨迹消失,
//! 不会移除全局身份 (该人可能还在其它摄像头里).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::identity::{Action, LifecycleEvent, MatchOutcome, TrackObservation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackPhase {
    Unconfirmed,
    Confirmed,
    Active,
    Disappeared,
}

#[derive(Debug, Clone)]
struct TrackEntry {
    phase: TrackPhase,
    global_id: Option<uuid::Uuid>,
    source_id: String,
    first_confirmed: Option<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
    missed: u32,
    seen_this_frame: bool,
}

impl TrackEntry {
    fn new(source_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            phase: TrackPhase::Unconfirmed,
            global_id: None,
            source_id: source_id.to_string(),
            first_confirmed: None,
            last_seen: now,
            missed: 0,
            seen_this_frame: false,
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.seen_this_frame = true;
        self.missed = 0;
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    fn disappeared_event(&self, camera_id: &str) -> Option<LifecycleEvent> {
        let global_id = self.global_id?;
        let start = self.first_confirmed?;
        Some(LifecycleEvent::camera(
            global_id,
            Action::Disappeared,
            &self.source_id,
            camera_id,
            start,
            self.last_seen,
        ))
    }
}

#[derive(Debug, Default)]
pub struct TrackBook {
    entries: HashMap<(String, u32), TrackEntry>,
    /// 允许连续丢失的帧数, 超过后判定在本摄像头消失
    grace_frames: u32,
}

impl TrackBook {
    pub fn new(grace_frames: u32) -> Self {
        Self {
            entries: HashMap::new(),
            grace_frames,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn phase(&self, camera_id: &str, track_id: u32) -> Option<TrackPhase> {
        self.entries
            .get(&(camera_id.to_string(), track_id))
            .map(|e| e.phase)
    }

    pub fn global_id(&self, camera_id: &str, track_id: u32) -> Option<uuid::Uuid> {
        self.entries
            .get(&(camera_id.to_string(), track_id))
            .and_then(|e| e.global_id)
    }

    /// 跟踪器尚未确认的轨迹: 只记录, 不参与全局匹配
    pub fn observe_unconfirmed(&mut self, obs: &TrackObservation, now: DateTime<Utc>) {
        self.entries
            .entry((obs.camera_id.clone(), obs.track_id))
            .or_insert_with(|| TrackEntry::new(&obs.source_id, now))
            .touch(now);
    }

    /// 已确认轨迹完成一次全局匹配后调用.
    ///
    /// 首次确认时返回摄像头级 appeared 事件; 若全局身份是这次新建的,
    /// 全局 appeared 已经覆盖, 不再重复.
    pub fn observe(
        &mut self,
        obs: &TrackObservation,
        outcome: &MatchOutcome,
        now: DateTime<Utc>,
    ) -> Option<LifecycleEvent> {
        let entry = self
            .entries
            .entry((obs.camera_id.clone(), obs.track_id))
            .or_insert_with(|| TrackEntry::new(&obs.source_id, now));
        entry.touch(now);
        entry.global_id = Some(outcome.global_id);

        match entry.phase {
            TrackPhase::Unconfirmed | TrackPhase::Disappeared => {
                entry.phase = TrackPhase::Confirmed;
                entry.first_confirmed = Some(now);
                debug!(
                    camera_id = %obs.camera_id,
                    track_id = obs.track_id,
                    global_id = %outcome.global_id,
                    "track confirmed"
                );
                if outcome.created {
                    None
                } else {
                    Some(LifecycleEvent::camera(
                        outcome.global_id,
                        Action::Appeared,
                        &obs.source_id,
                        &obs.camera_id,
                        now,
                        now,
                    ))
                }
            }
            TrackPhase::Confirmed => {
                entry.phase = TrackPhase::Active;
                None
            }
            TrackPhase::Active => None,
        }
    }

    /// 一帧处理结束: 本帧未出现的轨迹累计丢失, 超过宽限帧数后判定消失
    pub fn end_frame(&mut self, camera_id: &str) -> Vec<LifecycleEvent> {
        // 上一帧已宣布消失的条目在这里清掉
        self.entries
            .retain(|(cam, _), e| cam != camera_id || e.phase != TrackPhase::Disappeared);

        let mut events = Vec::new();
        let mut retired = Vec::new();
        for (key, entry) in self.entries.iter_mut().filter(|((cam, _), _)| cam == camera_id) {
            if entry.seen_this_frame {
                entry.seen_this_frame = false;
                continue;
            }
            entry.missed += 1;
            if entry.missed <= self.grace_frames {
                continue;
            }
            match entry.phase {
                TrackPhase::Confirmed | TrackPhase::Active => {
                    entry.phase = TrackPhase::Disappeared;
                    if let Some(event) = entry.disappeared_event(camera_id) {
                        debug!(camera_id, track_id = key.1, "track left camera");
                        events.push(event);
                    }
                }
                TrackPhase::Unconfirmed => retired.push(key.clone()),
                TrackPhase::Disappeared => {}
            }
        }
        for key in retired {
            self.entries.remove(&key);
        }
        events
    }

    /// 流结束或停机: 所有已确认轨迹立即消失
    pub fn flush(&mut self) -> Vec<LifecycleEvent> {
        let mut events: Vec<LifecycleEvent> = self
            .entries
            .iter()
            .filter(|(_, e)| matches!(e.phase, TrackPhase::Confirmed | TrackPhase::Active))
            .filter_map(|((cam, _), e)| e.disappeared_event(cam))
            .collect();
        events.sort_by_key(|e| e.start_time);
        self.entries.clear();
        events
    }
}
