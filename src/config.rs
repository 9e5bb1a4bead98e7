use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line surface. Tuning knobs live in the optional TOML file; the
/// defaults match the upstream relay deployment.
#[derive(Debug, Parser)]
#[command(
    name = "telemetry-agent",
    about = "Reassembles chunked telemetry reports from rotating rsyslog files",
    version
)]
pub struct Cli {
    /// Glob pattern selecting candidate rsyslog files, e.g. '/var/log/**/*.log'.
    #[arg(short = 's', long)]
    pub source_glob: String,

    /// Directory reassembled reports are written under.
    #[arg(short = 'd', long, default_value = ".")]
    pub destination: String,

    /// Optional TOML file overriding tailer/discovery/writer/logging defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn source_glob_expanded(&self) -> String {
        shellexpand::tilde(&self.source_glob).into_owned()
    }

    pub fn destination_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.destination).as_ref())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub tailer: TailerSettings,
    #[serde(default)]
    pub discovery: DiscoverySettings,
    #[serde(default)]
    pub writer: WriterSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TailerSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscoverySettings {
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Case-insensitive marker a candidate path must contain.
    #[serde(default = "default_source_marker")]
    pub source_marker: String,
    /// Suffix a candidate path must end with.
    #[serde(default = "default_source_suffix")]
    pub source_suffix: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WriterSettings {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    /// Directory the daily-rotated process log is written to.
    #[serde(default = "default_log_directory")]
    pub directory: String,
    /// Default level filter when RUST_LOG is unset; "debug" enables
    /// per-fragment tracing.
    #[serde(default = "default_log_level")]
    pub level: String,
}

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_STALL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SCAN_INTERVAL_SECS: u64 = 2;
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_stall_timeout_secs() -> u64 {
    DEFAULT_STALL_TIMEOUT_SECS
}

fn default_scan_interval_secs() -> u64 {
    DEFAULT_SCAN_INTERVAL_SECS
}

fn default_source_marker() -> String {
    "idrac".to_string()
}

fn default_source_suffix() -> String {
    ".log".to_string()
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_log_directory() -> String {
    ".".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TailerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stall_timeout_secs: default_stall_timeout_secs(),
        }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval_secs(),
            source_marker: default_source_marker(),
            source_suffix: default_source_suffix(),
        }
    }
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or fall back to defaults when no file was
    /// given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings = match path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config file {}", path.display()))?
            }
            None => Settings::default(),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.tailer.poll_interval_ms == 0 {
            anyhow::bail!("tailer.poll_interval_ms must be positive");
        }
        if self.tailer.stall_timeout_secs == 0 {
            anyhow::bail!("tailer.stall_timeout_secs must be positive");
        }
        if self.discovery.scan_interval_secs == 0 {
            anyhow::bail!("discovery.scan_interval_secs must be positive");
        }
        if self.discovery.source_suffix.trim().is_empty() {
            anyhow::bail!("discovery.source_suffix cannot be empty");
        }
        if self.writer.channel_capacity == 0 {
            anyhow::bail!("writer.channel_capacity must be positive");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.tailer.poll_interval_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.tailer.stall_timeout_secs)
    }

    pub fn log_directory(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.logging.directory).as_ref())
    }
}

impl DiscoverySettings {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_no_config_file_is_given() {
        let settings = Settings::load(None).expect("defaults should validate");
        assert_eq!(settings.tailer.poll_interval_ms, 500);
        assert_eq!(settings.tailer.stall_timeout_secs, 60);
        assert_eq!(settings.discovery.scan_interval_secs, 2);
        assert_eq!(settings.discovery.source_marker, "idrac");
        assert_eq!(settings.discovery.source_suffix, ".log");
        assert_eq!(settings.writer.channel_capacity, 1024);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn partial_config_file_keeps_defaults_for_missing_sections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[tailer]\nstall_timeout_secs = 10\n").expect("write config");

        let settings = Settings::load(Some(&path)).expect("partial config should load");
        assert_eq!(settings.tailer.stall_timeout_secs, 10);
        assert_eq!(settings.tailer.poll_interval_ms, 500);
        assert_eq!(settings.discovery.source_marker, "idrac");
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[tailer]\npoll_interval_ms = 0\n").expect("write config");

        assert!(Settings::load(Some(&path)).is_err());
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[tailer\n").expect("write config");

        assert!(Settings::load(Some(&path)).is_err());
    }
}
