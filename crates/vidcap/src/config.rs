use std::path::PathBuf;
use std::time::Duration;

use vidcap_frame::FrameConfig;

use crate::command::DEFAULT_PROGRAM;

pub const DEFAULT_MAX_JOBS: usize = 4;

/// Resolved host settings.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Directory captures are written into.
    pub download_dir: PathBuf,
    /// Capture tool executable, looked up on `PATH` when not absolute.
    pub program: PathBuf,
    /// Upper bound on concurrently running capture processes.
    pub max_jobs: usize,
    /// Kill a capture that runs longer than this. `None` waits forever.
    pub job_timeout: Option<Duration>,
    pub frame: FrameConfig,
}

impl HostConfig {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            program: PathBuf::from(DEFAULT_PROGRAM),
            max_jobs: DEFAULT_MAX_JOBS,
            job_timeout: None,
            frame: FrameConfig::default(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::new(default_download_dir())
    }
}

/// The user's Downloads folder, or `~/Downloads` where the platform has none.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| PathBuf::from("Downloads"))
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("duration must not be empty")]
    EmptyDuration,
    #[error("invalid duration value: {0}")]
    InvalidDuration(String),
    #[error("duration must be greater than zero")]
    ZeroDuration,
}

/// Parse `500ms`, `30s`, `2m`, or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ConfigError::EmptyDuration);
    }

    let (number, scale_ms) = if let Some(num) = input.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = input.strip_suffix('m') {
        (num, 60_000)
    } else {
        (input, 1_000)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(input.to_string()))?;

    if value == 0 {
        return Err(ConfigError::ZeroDuration);
    }
    value
        .checked_mul(scale_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| ConfigError::InvalidDuration(input.to_string()))
}
