use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::HlsError;

/// Container written for a finished job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Segments concatenated verbatim into an MPEG-TS file.
    #[default]
    Ts,
    /// Segments remuxed into a fragmented MP4.
    Mp4,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Ts => ".ts",
            OutputFormat::Mp4 => ".mp4",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = HlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ts" | "mpegts" => Ok(Self::Ts),
            "mp4" | "fmp4" => Ok(Self::Mp4),
            _ => Err(HlsError::Config(format!("unknown output format: {s}"))),
        }
    }
}

/// Segments in flight when nothing else is configured.
pub const DEFAULT_CONCURRENCY: NonZeroU32 = match NonZeroU32::new(5) {
    Some(n) => n,
    None => unreachable!(),
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Segments fetched and decrypted at the same time.
    pub concurrency: NonZeroU32,
    /// Window in which a repeated manifest URL of one session is ignored.
    pub dedup_window_ms: u64,
    /// Delay between a trigger and the manifest fetch.
    pub settle_delay_ms: u64,
    /// How long a terminal job status stays readable before it is cleared.
    pub cleanup_grace_ms: u64,
    /// Minimum interval between two progress events.
    pub progress_interval_ms: u64,
    pub http_timeout_secs: u64,
    pub output_format: OutputFormat,
    pub output_dir: Option<PathBuf>,
    /// Extra request headers in `Name: value` form.
    pub headers: Vec<String>,
    pub user_agent: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            dedup_window_ms: 3000,
            settle_delay_ms: 500,
            cleanup_grace_ms: 3000,
            progress_interval_ms: 1000,
            http_timeout_secs: 30,
            output_format: OutputFormat::Ts,
            output_dir: None,
            headers: Vec::new(),
            user_agent: None,
        }
    }
}

impl Config {
    pub fn from_toml(data: &str) -> Result<Self, HlsError> {
        toml::from_str(data).map_err(|e| HlsError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, HlsError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_toml(&data)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_millis(self.cleanup_grace_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}
