use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub preload: PreloadConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
}

/// Remote object store holding the clips (Supabase storage compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_base_url")]
    pub base_url: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Sent as both `apikey` and bearer token.  Empty means anonymous.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_list_limit")]
    pub list_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreloadConfig {
    #[serde(default = "default_preload_capacity")]
    pub capacity: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Automatic re-queues after a failed preparation.
    #[serde(default = "default_max_retries_per_url")]
    pub max_retries_per_url: u32,
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,
    #[serde(default = "default_lookbehind")]
    pub lookbehind: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Full re-acquisitions after the first attempt fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_autoplay")]
    pub autoplay: bool,
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    #[serde(default = "default_min_decibels")]
    pub min_decibels: f32,
    #[serde(default = "default_max_decibels")]
    pub max_decibels: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Radius of the centre disc, in virtual pixels.
    #[serde(default = "default_occlusion_radius")]
    pub occlusion_radius: f32,
    /// Radius the disc collapses to while the next track loads.
    #[serde(default = "default_pinched_radius")]
    pub pinched_radius: f32,
    #[serde(default = "default_radius_smoothing")]
    pub radius_smoothing: f32,
    #[serde(default = "default_focal_smoothing")]
    pub focal_smoothing: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Microphone capture through ffmpeg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// ffmpeg `-f` input format (pulse, avfoundation, dshow ...).
    #[serde(default = "default_input_format")]
    pub input_format: String,
    #[serde(default = "default_input_device")]
    pub input_device: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_store_base_url(),
            bucket: default_bucket(),
            api_key: String::new(),
            list_limit: default_list_limit(),
        }
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            capacity: default_preload_capacity(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retries_per_url: default_max_retries_per_url(),
            lookahead: default_lookahead(),
            lookbehind: default_lookbehind(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            autoplay: default_autoplay(),
            fft_size: default_fft_size(),
            smoothing: default_smoothing(),
            min_decibels: default_min_decibels(),
            max_decibels: default_max_decibels(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            occlusion_radius: default_occlusion_radius(),
            pinched_radius: default_pinched_radius(),
            radius_smoothing: default_radius_smoothing(),
            focal_smoothing: default_focal_smoothing(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
            content_type: default_content_type(),
            input_format: default_input_format(),
            input_device: default_input_device(),
        }
    }
}

fn default_store_base_url() -> String {
    "http://127.0.0.1:54321".to_string()
}

fn default_bucket() -> String {
    "snippets".to_string()
}

fn default_list_limit() -> u32 {
    100
}

fn default_preload_capacity() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retries_per_url() -> u32 {
    1
}

fn default_lookahead() -> usize {
    2
}

fn default_lookbehind() -> usize {
    1
}

fn default_max_retries() -> u32 {
    3
}

fn default_autoplay() -> bool {
    true
}

fn default_fft_size() -> usize {
    256
}

fn default_smoothing() -> f32 {
    0.8
}

fn default_min_decibels() -> f32 {
    -100.0
}

fn default_max_decibels() -> f32 {
    -30.0
}

fn default_fps() -> u32 {
    60
}

fn default_occlusion_radius() -> f32 {
    60.0
}

fn default_pinched_radius() -> f32 {
    6.0
}

fn default_radius_smoothing() -> f32 {
    0.1
}

fn default_focal_smoothing() -> f32 {
    0.02
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_extension() -> String {
    "webm".to_string()
}

fn default_content_type() -> String {
    "audio/webm".to_string()
}

fn default_input_format() -> String {
    if cfg!(target_os = "macos") {
        "avfoundation".to_string()
    } else if cfg!(windows) {
        "dshow".to_string()
    } else {
        "pulse".to_string()
    }
}

fn default_input_device() -> String {
    if cfg!(target_os = "macos") {
        ":default".to_string()
    } else {
        "default".to_string()
    }
}

impl Config {
    /// Load from the default location, writing a default file on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn http_address(&self) -> String {
        format!("{}:{}", self.http.bind_address, self.http.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.preload.capacity, 3);
        assert_eq!(config.preload.retry_delay_ms, 1000);
        assert_eq!(config.playback.max_retries, 3);
        assert_eq!(config.playback.fft_size, 256);
        assert!(config.playback.autoplay);
        assert_eq!(config.http_address(), "127.0.0.1:8990");
        assert!(Config::config_path().ends_with("clipfeed/config.toml"));
    }

    #[test]
    fn first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.store.bucket, "snippets");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[store]\nbase_url = \"https://xyz.supabase.co\"\n\n[preload]\ncapacity = 5\n",
        )
        .unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.store.base_url, "https://xyz.supabase.co");
        assert_eq!(config.store.bucket, "snippets");
        assert_eq!(config.preload.capacity, 5);
        assert_eq!(config.preload.lookahead, 2);
        assert_eq!(config.render.fps, 60);
    }
}
