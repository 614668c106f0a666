//! Daemon configuration.
//!
//! `TallydConfig::load` reads an optional JSON config file pointed to by
//! `TALLY_CONFIG`, applies environment overrides, and validates the result.
//! Every setting has a default, so a bare environment runs the synthetic
//! demo stream against a local database.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::ingest::RtspConfig;
use crate::reader::ReaderSettings;
use crate::tracker::{ExitPolicy, TrackerConfig};

const DEFAULT_DB_PATH: &str = "tally.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8788";
const DEFAULT_STREAM_URL: &str = "stub://demo_item";
const DEFAULT_TARGET_FPS: u32 = 10;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
const DEFAULT_DETECTION_TIMEOUT_MS: u64 = 2000;
const DEFAULT_STOP_GRACE_MS: u64 = 5000;
const DEFAULT_EXIT_POLICY: &str = "debounced";

#[derive(Debug, Deserialize, Default)]
struct TallydConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    stream: Option<StreamConfigFile>,
    reader: Option<ReaderConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    auto_start: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ReaderConfigFile {
    poll_interval_ms: Option<u64>,
    detection_timeout_ms: Option<u64>,
    exit_policy: Option<String>,
    stop_grace_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TallydConfig {
    pub db_path: String,
    pub api_addr: String,
    pub stream: StreamSettings,
    pub poll_interval: Duration,
    pub detection_timeout: Duration,
    /// `"debounced"` or `"strict"`; see [`ExitPolicy`].
    pub exit_policy: String,
    pub stop_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
    /// Start a session for `url` as soon as the daemon is up.
    pub auto_start: bool,
}

impl TallydConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TALLY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TallydConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let stream = StreamSettings {
            url: file
                .stream
                .as_ref()
                .and_then(|stream| stream.url.clone())
                .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
            target_fps: file
                .stream
                .as_ref()
                .and_then(|stream| stream.target_fps)
                .unwrap_or(DEFAULT_TARGET_FPS),
            width: file
                .stream
                .as_ref()
                .and_then(|stream| stream.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .stream
                .as_ref()
                .and_then(|stream| stream.height)
                .unwrap_or(DEFAULT_HEIGHT),
            auto_start: file
                .stream
                .as_ref()
                .and_then(|stream| stream.auto_start)
                .unwrap_or(true),
        };
        let poll_interval = Duration::from_millis(
            file.reader
                .as_ref()
                .and_then(|reader| reader.poll_interval_ms)
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        );
        let detection_timeout = Duration::from_millis(
            file.reader
                .as_ref()
                .and_then(|reader| reader.detection_timeout_ms)
                .unwrap_or(DEFAULT_DETECTION_TIMEOUT_MS),
        );
        let exit_policy = file
            .reader
            .as_ref()
            .and_then(|reader| reader.exit_policy.clone())
            .unwrap_or_else(|| DEFAULT_EXIT_POLICY.to_string());
        let stop_grace = Duration::from_millis(
            file.reader
                .and_then(|reader| reader.stop_grace_ms)
                .unwrap_or(DEFAULT_STOP_GRACE_MS),
        );
        Self {
            db_path,
            api_addr,
            stream,
            poll_interval,
            detection_timeout,
            exit_policy,
            stop_grace,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("TALLY_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(addr) = std::env::var("TALLY_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(url) = std::env::var("TALLY_STREAM_URL") {
            if !url.trim().is_empty() {
                self.stream.url = url;
            }
        }
        if let Some(ms) = env_ms("TALLY_POLL_INTERVAL_MS")? {
            self.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_ms("TALLY_DETECTION_TIMEOUT_MS")? {
            self.detection_timeout = Duration::from_millis(ms);
        }
        if let Ok(policy) = std::env::var("TALLY_EXIT_POLICY") {
            if !policy.trim().is_empty() {
                self.exit_policy = policy;
            }
        }
        if let Some(ms) = env_ms("TALLY_STOP_GRACE_MS")? {
            self.stop_grace = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if self.stop_grace.is_zero() {
            return Err(anyhow!("stop grace must be greater than zero"));
        }
        self.exit_policy = self.exit_policy.trim().to_lowercase();
        match self.exit_policy.as_str() {
            "debounced" | "strict" => Ok(()),
            other => Err(anyhow!(
                "unknown exit policy '{}' (expected 'debounced' or 'strict')",
                other
            )),
        }
    }

    pub fn reader_settings(&self) -> ReaderSettings {
        let policy = match self.exit_policy.as_str() {
            "strict" => ExitPolicy::Strict,
            _ => ExitPolicy::Debounced {
                timeout: self.detection_timeout,
            },
        };
        ReaderSettings {
            poll_interval: self.poll_interval,
            stop_grace: self.stop_grace,
            tracker: TrackerConfig { policy },
        }
    }

    pub fn rtsp_config(&self) -> RtspConfig {
        RtspConfig {
            target_fps: self.stream.target_fps,
            width: self.stream.width,
            height: self.stream.height,
        }
    }
}

fn read_config_file(path: &Path) -> Result<TallydConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_ms(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => {
            let ms: u64 = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("{} must be an integer number of milliseconds", key))?;
            Ok(Some(ms))
        }
        _ => Ok(None),
    }
}
