//! 生命周期事件 (appeared / disappeared)

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::GlobalIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Appeared,
    Disappeared,
}

/// 事件范围: 全局身份, 或单个摄像头上的轨迹
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope {
    Global,
    Camera,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub global_id: Uuid,
    pub action: Action,
    pub scope: EventScope,
    pub source_id: String,
    pub camera_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub cameras_seen: BTreeSet<String>,
}

impl LifecycleEvent {
    /// 新建全局身份
    pub fn identity_appeared(identity: &GlobalIdentity) -> Self {
        Self::from_identity(identity, Action::Appeared)
    }

    /// 全局身份超时被移除
    pub fn identity_disappeared(identity: &GlobalIdentity) -> Self {
        Self::from_identity(identity, Action::Disappeared)
    }

    fn from_identity(identity: &GlobalIdentity, action: Action) -> Self {
        Self {
            global_id: identity.global_id(),
            action,
            scope: EventScope::Global,
            source_id: identity.source_id().to_string(),
            camera_id: identity.last_camera_id().to_string(),
            start_time: identity.first_seen(),
            end_time: identity.last_seen(),
            cameras_seen: identity.cameras_seen().clone(),
        }
    }

    pub fn camera(
        global_id: Uuid,
        action: Action,
        source_id: &str,
        camera_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            global_id,
            action,
            scope: EventScope::Camera,
            source_id: source_id.to_string(),
            camera_id: camera_id.to_string(),
            start_time,
            end_time,
            cameras_seen: BTreeSet::from([camera_id.to_string()]),
        }
    }

    pub fn payload(&self) -> EventPayload {
        EventPayload {
            uuid: self.global_id.to_string(),
            start_time: iso8601(self.start_time),
            end_time: iso8601(self.end_time),
            source_id: self.source_id.clone(),
            camera_id: self.camera_id.clone(),
            action: self.action,
        }
    }
}

/// 下游消费的 JSON 消息体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub uuid: String,
    pub start_time: String,
    pub end_time: String,
    pub source_id: String,
    pub camera_id: String,
    pub action: Action,
}

impl EventPayload {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn iso8601(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}
