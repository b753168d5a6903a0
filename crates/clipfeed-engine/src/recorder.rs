//! Microphone capture via ffmpeg.
//!
//! `start` spawns ffmpeg writing an encoded clip into a temp file; `stop`
//! asks it to finish (`q` on stdin), reads the file back and names it
//! `snippet-{unix_millis}.{ext}`.
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use clipfeed_proto::config::RecordingConfig;
use clipfeed_proto::platform;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::store::snippet_filename;

const STOP_GRACE: Duration = Duration::from_secs(5);

/// An encoded clip ready for upload.
#[derive(Debug, Clone)]
pub struct RecordedClip {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait ClipRecorder: Send {
    fn is_recording(&self) -> bool;

    async fn start(&mut self) -> EngineResult<()>;

    async fn stop(&mut self) -> EngineResult<RecordedClip>;
}

struct Capture {
    child: Child,
    path: tempfile::TempPath,
}

pub struct FfmpegRecorder {
    cfg: RecordingConfig,
    ffmpeg: Option<PathBuf>,
    capture: Option<Capture>,
}

impl FfmpegRecorder {
    pub fn new(cfg: RecordingConfig) -> Self {
        Self {
            cfg,
            ffmpeg: platform::find_ffmpeg_binary(),
            capture: None,
        }
    }

    fn recording_error(reason: impl std::fmt::Display) -> EngineError {
        EngineError::Recording(reason.to_string())
    }
}

#[async_trait]
impl ClipRecorder for FfmpegRecorder {
    fn is_recording(&self) -> bool {
        self.capture.is_some()
    }

    async fn start(&mut self) -> EngineResult<()> {
        if self.capture.is_some() {
            return Err(Self::recording_error("already recording"));
        }
        let ffmpeg = self
            .ffmpeg
            .clone()
            .ok_or_else(|| Self::recording_error("ffmpeg not found"))?;

        let path = tempfile::Builder::new()
            .prefix("clipfeed-rec-")
            .suffix(&format!(".{}", self.cfg.extension.trim_start_matches('.')))
            .tempfile()
            .map_err(Self::recording_error)?
            .into_temp_path();

        let child = Command::new(&ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-f"])
            .arg(&self.cfg.input_format)
            .arg("-i")
            .arg(&self.cfg.input_device)
            .args(["-vn", "-ac", "1"])
            .arg(path.as_os_str())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(Self::recording_error)?;

        info!(
            "recorder: capturing {}:{} into {}",
            self.cfg.input_format,
            self.cfg.input_device,
            path.display()
        );
        self.capture = Some(Capture { child, path });
        Ok(())
    }

    async fn stop(&mut self) -> EngineResult<RecordedClip> {
        let Capture { mut child, path } = self
            .capture
            .take()
            .ok_or_else(|| Self::recording_error("not recording"))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(b"q").await {
                debug!("recorder: could not ask ffmpeg to stop: {}", e);
            }
        }
        match tokio::time::timeout(STOP_GRACE, child.wait()).await {
            Ok(Ok(status)) if !status.success() => {
                warn!("recorder: ffmpeg exited with {}", status);
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(Self::recording_error(e)),
            Err(_) => {
                warn!("recorder: ffmpeg did not stop in time, killing");
                let _ = child.kill().await;
            }
        }

        let bytes = tokio::fs::read(&path).await.map_err(Self::recording_error)?;
        if bytes.is_empty() {
            return Err(Self::recording_error("captured nothing"));
        }
        let name = snippet_filename(Utc::now().timestamp_millis(), &self.cfg.extension);
        info!("recorder: {} ({} bytes)", name, bytes.len());
        Ok(RecordedClip {
            name,
            bytes,
            content_type: self.cfg.content_type.clone(),
        })
    }
}
