//! 配置 - 命令行参数 + JSON 配置文件
//!
//! 优先级: 命令行 / 环境变量 > 配置文件 > 默认值

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::identity::{RepresentativeMode, DEFAULT_THRESHOLD};
use crate::tracking::ByteTrackConfig;

#[derive(Parser, Clone, Debug, Default)]
#[command(author, version, about = "Cross-camera person identity sentinel", long_about = None)]
pub struct Args {
    /// JSON 配置文件
    #[arg(long, env = "SENTINEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// 检测结果回放目录 (camera_<camera>_frame_<n>.json)
    #[arg(long, env = "SENTINEL_REPLAY_DIR")]
    pub replay_dir: Option<PathBuf>,

    /// 摄像头ID, 可重复
    #[arg(long = "camera", env = "SENTINEL_CAMERAS", value_delimiter = ',')]
    pub cameras: Vec<String>,

    #[arg(long, env = "SENTINEL_SOURCE_ID")]
    pub source_id: Option<String>,

    /// 匹配阈值 (余弦距离)
    #[arg(long, env = "SENTINEL_THRESHOLD")]
    pub threshold: Option<f32>,

    /// 身份超时秒数
    #[arg(long, env = "SENTINEL_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    #[arg(long, env = "SENTINEL_SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: Option<u64>,

    #[arg(long, value_enum, env = "SENTINEL_PUBLISHER")]
    pub publisher: Option<PublisherKind>,

    /// HTTP 发布地址
    #[arg(long, env = "SENTINEL_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long, env = "SENTINEL_QUEUE")]
    pub queue: Option<String>,

    /// 回放帧率, 0 表示不限速
    #[arg(long, env = "SENTINEL_REPLAY_FPS")]
    pub replay_fps: Option<f64>,

    /// 回放结束后继续等待的秒数 (让超时巡检有机会触发)
    #[arg(long, env = "SENTINEL_LINGER_SECS")]
    pub linger_secs: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PublisherKind {
    /// 写入日志
    #[default]
    Log,
    /// JSON 行写到标准输出
    Stdout,
    /// HTTP POST
    Http,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub threshold: f32,
    pub representative: RepresentativeMode,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            representative: RepresentativeMode::RunningMean,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// 巡检等锁上限, 超时推迟到下个周期
    pub lock_timeout_ms: u64,
    /// 停机时为剩余身份发出 disappeared
    pub flush_on_shutdown: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            sweep_interval_secs: 2,
            lock_timeout_ms: 200,
            flush_on_shutdown: true,
        }
    }
}

impl LifecycleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub min_hits: u32,
    pub max_lost_frames: u32,
    /// 摄像头内判定消失前允许的连续丢失帧数
    pub grace_frames: u32,
    /// 参与全局匹配的轨迹最多允许几帧未更新
    pub max_staleness: u32,
    pub high_score_threshold: f32,
    pub low_score_threshold: f32,
    pub high_iou_threshold: f32,
    pub low_iou_threshold: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        let bytetrack = ByteTrackConfig::default();
        Self {
            min_hits: bytetrack.min_hits,
            max_lost_frames: bytetrack.max_lost_frames,
            grace_frames: 1,
            max_staleness: 1,
            high_score_threshold: bytetrack.high_score_threshold,
            low_score_threshold: bytetrack.low_score_threshold,
            high_iou_threshold: bytetrack.high_iou_threshold,
            low_iou_threshold: bytetrack.low_iou_threshold,
        }
    }
}

impl TrackingConfig {
    pub fn bytetrack(&self) -> ByteTrackConfig {
        ByteTrackConfig {
            min_hits: self.min_hits,
            max_lost_frames: self.max_lost_frames,
            high_score_threshold: self.high_score_threshold,
            low_score_threshold: self.low_score_threshold,
            high_iou_threshold: self.high_iou_threshold,
            low_iou_threshold: self.low_iou_threshold,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub kind: PublisherKind,
    pub endpoint: Option<String>,
    /// 全局事件队列
    pub queue: String,
    /// 摄像头级事件队列, 未设置时与 `queue` 相同
    pub camera_queue: Option<String>,
    pub timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            kind: PublisherKind::Log,
            endpoint: None,
            queue: "sentinel-events".to_string(),
            camera_queue: None,
            timeout_ms: 5000,
        }
    }
}

/// 最低回放帧率 (每 1000 秒一帧)
pub const MIN_REPLAY_FPS: f64 = 1e-3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub dir: Option<PathBuf>,
    pub cameras: Vec<String>,
    /// 0 表示不限速
    pub fps: f64,
    pub linger_secs: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            dir: None,
            cameras: Vec::new(),
            fps: 0.0,
            linger_secs: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub source_id: String,
    pub matcher: MatcherConfig,
    pub lifecycle: LifecycleConfig,
    pub tracking: TrackingConfig,
    pub publisher: PublisherConfig,
    pub replay: ReplayConfig,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            source_id: "default".to_string(),
            matcher: MatcherConfig::default(),
            lifecycle: LifecycleConfig::default(),
            tracking: TrackingConfig::default(),
            publisher: PublisherConfig::default(),
            replay: ReplayConfig::default(),
        }
    }
}

impl SentinelConfig {
    /// 从JSON文件加载配置, 缺省字段取默认值
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: SentinelConfig = serde_json::from_str(&json)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// 配置文件 + 命令行覆盖 + 校验
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply(args);
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, args: &Args) {
        if let Some(dir) = &args.replay_dir {
            self.replay.dir = Some(dir.clone());
        }
        if !args.cameras.is_empty() {
            self.replay.cameras = args.cameras.clone();
        }
        if let Some(source_id) = &args.source_id {
            self.source_id = source_id.clone();
        }
        if let Some(threshold) = args.threshold {
            self.matcher.threshold = threshold;
        }
        if let Some(secs) = args.timeout_secs {
            self.lifecycle.timeout_secs = secs;
        }
        if let Some(secs) = args.sweep_interval_secs {
            self.lifecycle.sweep_interval_secs = secs;
        }
        if let Some(kind) = args.publisher {
            self.publisher.kind = kind;
        }
        if let Some(endpoint) = &args.endpoint {
            self.publisher.endpoint = Some(endpoint.clone());
        }
        if let Some(queue) = &args.queue {
            self.publisher.queue = queue.clone();
        }
        if let Some(fps) = args.replay_fps {
            self.replay.fps = fps;
        }
        if let Some(secs) = args.linger_secs {
            self.replay.linger_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.matcher.threshold;
        if !(threshold > 0.0 && threshold <= 2.0) {
            return Err(Error::Config(format!(
                "matcher.threshold must be in (0, 2], got {threshold}"
            )));
        }
        if self.matcher.representative == RepresentativeMode::Window(0) {
            return Err(Error::Config("matcher.representative window must be at least 1".into()));
        }
        if self.lifecycle.timeout_secs == 0 {
            return Err(Error::Config("lifecycle.timeout_secs must be positive".into()));
        }
        if self.lifecycle.sweep_interval_secs == 0 {
            return Err(Error::Config("lifecycle.sweep_interval_secs must be positive".into()));
        }
        if self.source_id.is_empty() {
            return Err(Error::Config("source_id must not be empty".into()));
        }
        if self.publisher.queue.is_empty() {
            return Err(Error::Config("publisher.queue must not be empty".into()));
        }
        if self.publisher.kind == PublisherKind::Http
            && self.publisher.endpoint.as_deref().map_or(true, str::is_empty)
        {
            return Err(Error::Config("http publisher requires publisher.endpoint".into()));
        }
        let fps = self.replay.fps;
        if !fps.is_finite() || fps < 0.0 || (fps > 0.0 && fps < MIN_REPLAY_FPS) {
            return Err(Error::Config(format!(
                "replay.fps must be 0 or >= {MIN_REPLAY_FPS}, got {fps}"
            )));
        }
        Ok(())
    }

    pub fn camera_queue(&self) -> &str {
        self.publisher
            .camera_queue
            .as_deref()
            .unwrap_or(&self.publisher.queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SentinelConfig::default();
        assert_eq!(config.matcher.threshold, 0.5);
        assert_eq!(config.lifecycle.timeout(), Duration::from_secs(10));
        assert_eq!(config.lifecycle.lock_timeout(), Duration::from_millis(200));
        assert!(config.lifecycle.flush_on_shutdown);
        assert_eq!(config.tracking.min_hits, 3);
        assert_eq!(config.camera_queue(), "sentinel-events");
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        fs::write(
            &path,
            r#"{
                "matcher": {"representative": {"window": 8}},
                "lifecycle": {"timeout_secs": 5},
                "publisher": {"kind": "stdout", "camera_queue": "camera-events"}
            }"#,
        )
        .unwrap();

        let config = SentinelConfig::load(&path).unwrap();
        assert_eq!(config.matcher.threshold, 0.5);
        assert_eq!(config.matcher.representative, RepresentativeMode::Window(8));
        assert_eq!(config.lifecycle.timeout_secs, 5);
        assert_eq!(config.lifecycle.sweep_interval_secs, 2);
        assert_eq!(config.publisher.kind, PublisherKind::Stdout);
        assert_eq!(config.camera_queue(), "camera-events");
    }

    #[test]
    fn test_running_mean_spelling() {
        let config: MatcherConfig =
            serde_json::from_str(r#"{"representative": "running_mean"}"#).unwrap();
        assert_eq!(config.representative, RepresentativeMode::RunningMean);
    }

    #[test]
    fn test_args_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        fs::write(&path, r#"{"source_id": "file-src", "matcher": {"threshold": 0.3}}"#).unwrap();

        let args = Args::parse_from([
            "sentinel",
            "--config",
            path.to_str().unwrap(),
            "--threshold",
            "0.4",
            "--camera",
            "cam1",
            "--camera",
            "cam2",
            "--publisher",
            "http",
            "--endpoint",
            "http://localhost:9000",
        ]);
        let config = SentinelConfig::from_args(&args).unwrap();
        assert_eq!(config.source_id, "file-src");
        assert_eq!(config.matcher.threshold, 0.4);
        assert_eq!(config.replay.cameras, vec!["cam1", "cam2"]);
        assert_eq!(config.publisher.kind, PublisherKind::Http);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = |edit: fn(&mut SentinelConfig)| {
            let mut config = SentinelConfig::default();
            edit(&mut config);
            config.validate().unwrap_err()
        };
        bad(|c| c.matcher.threshold = 0.0);
        bad(|c| c.matcher.threshold = 2.5);
        bad(|c| c.matcher.representative = RepresentativeMode::Window(0));
        bad(|c| c.lifecycle.timeout_secs = 0);
        bad(|c| c.lifecycle.sweep_interval_secs = 0);
        bad(|c| c.publisher.kind = PublisherKind::Http);
        assert!(matches!(bad(|c| c.replay.fps = -1.0), Error::Config(_)));
        assert!(matches!(bad(|c| c.replay.fps = 1e-300), Error::Config(_)));

        let mut slow = SentinelConfig::default();
        slow.replay.fps = MIN_REPLAY_FPS;
        assert!(slow.validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = SentinelConfig::load(Path::new("/nonexistent/sentinel.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
