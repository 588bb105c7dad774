//! 帧消息信封 (JSON 行)
//! `{"SourceId": "..", "CameraId": "..", "FrameData": "<base64 image>"}`

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use base64::Engine;
use chrono::Utc;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{FrameAnalyzer, FrameBatch, FrameContext, ObservationSource};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameEnvelope {
    #[serde(rename = "SourceId")]
    pub source_id: String,
    #[serde(rename = "CameraId")]
    pub camera_id: String,
    #[serde(rename = "FrameData")]
    pub frame_data: String,
}

impl FrameEnvelope {
    pub fn parse(line: &str) -> Result<Self> {
        let envelope: FrameEnvelope =
            serde_json::from_str(line).map_err(|e| Error::Envelope(e.to_string()))?;
        if envelope.camera_id.is_empty() {
            return Err(Error::Envelope("empty CameraId".to_string()));
        }
        Ok(envelope)
    }

    /// base64 → 编码图像 → 解码
    pub fn decode(&self) -> Result<DynamicImage> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(self.frame_data.trim())?;
        Ok(image::load_from_memory(&bytes)?)
    }
}

enum EnvelopeInput {
    File(PathBuf),
    Reader(Box<dyn BufRead + Send>),
}

/// 从 JSON 行读取帧, 交给 `FrameAnalyzer` 分析
pub struct EnvelopeSource {
    camera_id: String,
    source_id: String,
    input: Option<EnvelopeInput>,
    reader: Option<Box<dyn BufRead + Send>>,
    analyzer: Box<dyn FrameAnalyzer>,
    dropped: u64,
}

impl EnvelopeSource {
    fn with_input(
        input: EnvelopeInput,
        camera_id: impl Into<String>,
        source_id: impl Into<String>,
        analyzer: Box<dyn FrameAnalyzer>,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            source_id: source_id.into(),
            input: Some(input),
            reader: None,
            analyzer,
            dropped: 0,
        }
    }

    pub fn from_path(
        path: impl Into<PathBuf>,
        camera_id: impl Into<String>,
        source_id: impl Into<String>,
        analyzer: Box<dyn FrameAnalyzer>,
    ) -> Self {
        Self::with_input(EnvelopeInput::File(path.into()), camera_id, source_id, analyzer)
    }

    pub fn from_reader(
        reader: Box<dyn BufRead + Send>,
        camera_id: impl Into<String>,
        source_id: impl Into<String>,
        analyzer: Box<dyn FrameAnalyzer>,
    ) -> Self {
        Self::with_input(EnvelopeInput::Reader(reader), camera_id, source_id, analyzer)
    }

    /// 被丢弃的消息数 (格式错误或图像无法解码)
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn drop_line(&mut self, reason: &Error) {
        self.dropped += 1;
        warn!(camera_id = %self.camera_id, error = %reason, "dropping frame envelope");
    }
}

impl ObservationSource for EnvelopeSource {
    fn camera_id(&self) -> &str {
        &self.camera_id
    }

    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn open(&mut self) -> Result<()> {
        let reader: Box<dyn BufRead + Send> = match self.input.take() {
            Some(EnvelopeInput::File(path)) => {
                let file = File::open(&path).map_err(|e| Error::StreamOpen {
                    camera_id: self.camera_id.clone(),
                    reason: format!("{}: {}", path.display(), e),
                })?;
                info!(camera_id = %self.camera_id, path = %path.display(), "envelope stream opened");
                Box::new(BufReader::new(file))
            }
            Some(EnvelopeInput::Reader(reader)) => reader,
            None => {
                return Err(Error::StreamOpen {
                    camera_id: self.camera_id.clone(),
                    reason: "stream already opened".to_string(),
                })
            }
        };
        self.reader = Some(reader);
        Ok(())
    }

    fn next_batch(&mut self) -> Result<Option<FrameBatch>> {
        let mut raw = Vec::new();
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            raw.clear();
            if reader.read_until(b'\n', &mut raw)? == 0 {
                return Ok(None);
            }
            // 非 UTF-8 的行按坏消息丢弃, 不终止工作线程
            let text = match std::str::from_utf8(&raw) {
                Ok(text) => text.trim(),
                Err(e) => {
                    self.drop_line(&Error::Envelope(e.to_string()));
                    continue;
                }
            };
            if text.is_empty() {
                continue;
            }

            let envelope = match FrameEnvelope::parse(text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    self.drop_line(&e);
                    continue;
                }
            };
            if envelope.camera_id != self.camera_id {
                debug!(
                    camera_id = %self.camera_id,
                    other = %envelope.camera_id,
                    "envelope for another camera, skipped"
                );
                continue;
            }
            let frame = match envelope.decode() {
                Ok(frame) => frame,
                Err(e) => {
                    self.drop_line(&e);
                    continue;
                }
            };

            let source_id = if envelope.source_id.is_empty() {
                self.source_id.clone()
            } else {
                envelope.source_id
            };
            let ctx = FrameContext {
                camera_id: self.camera_id.clone(),
                source_id,
                timestamp: Utc::now(),
            };
            let observations = self.analyzer.analyze(&frame, &ctx)?;
            return Ok(Some(FrameBatch {
                timestamp: ctx.timestamp,
                observations,
            }));
        }
    }
}
