/// 数字卫兵 (Digital Sentinel)
///
/// 跨摄像头人员身份监控
///
/// 系统架构:
/// 1. 摄像头线程: 每路一个, 回放检测结果 → 跟踪 → 全局匹配
/// 2. 巡检线程:   超时移除身份, 生成 disappeared
/// 3. 分发线程:   事件发布到下游队列
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crosscam_sentinel::config::{Args, SentinelConfig};
use crosscam_sentinel::ingest::DetectionReplay;
use crosscam_sentinel::publish::build_publisher;
use crosscam_sentinel::tracking::ByteTracker;
use crosscam_sentinel::Sentinel;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = SentinelConfig::from_args(&args).context("invalid configuration")?;

    let Some(replay_dir) = config.replay.dir.clone() else {
        bail!("no input: pass --replay-dir with per-frame detection files");
    };
    if config.replay.cameras.is_empty() {
        bail!("no cameras: pass --camera at least once");
    }

    info!("🚀 数字卫兵系统启动");
    info!(dir = %replay_dir.display(), cameras = ?config.replay.cameras, "replay input");

    let publisher = build_publisher(&config.publisher).context("failed to create event publisher")?;
    let mut sentinel = Sentinel::start(config.clone(), publisher).context("failed to start sentinel")?;

    // ========== 启动摄像头线程 ==========
    for camera_id in &config.replay.cameras {
        let tracker = ByteTracker::new(config.tracking.bytetrack());
        let source = DetectionReplay::new(&replay_dir, camera_id.as_str(), config.source_id.as_str(), tracker)
            .with_fps(config.replay.fps);
        sentinel
            .spawn_camera(Box::new(source))
            .with_context(|| format!("failed to spawn worker for camera {camera_id}"))?;
    }

    for report in sentinel.wait_for_cameras() {
        match &report.error {
            Some(e) => warn!(camera_id = %report.camera_id, error = %e, "camera failed"),
            None => info!(
                camera_id = %report.camera_id,
                frames = report.frames,
                observations = report.observations,
                dropped = report.dropped,
                "camera finished"
            ),
        }
    }

    // 回放结束后等待巡检线程处理超时
    if config.replay.linger_secs > 0 {
        info!(secs = config.replay.linger_secs, "lingering for lifecycle sweeps");
        std::thread::sleep(Duration::from_secs(config.replay.linger_secs));
    }

    let summary = sentinel.shutdown();
    info!(
        flushed = summary.flushed,
        published = summary.dispatch.published,
        failed = summary.dispatch.failed,
        "✅ 数字卫兵已停止"
    );
    Ok(())
}
