use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the aggregation core.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Ingest stream limits.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Aggregation window sizing.
    #[serde(default)]
    pub window: WindowConfig,
}

/// Limits applied while decoding an upload stream.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Largest accepted recording-header frame. Default: 4KiB.
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,

    /// Largest accepted work-status-entry frame. Default: 1MiB.
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: default_max_header_bytes(),
            max_entry_bytes: default_max_entry_bytes(),
        }
    }
}

/// Aggregation window sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    /// Window duration. Default: 20m.
    #[serde(default = "default_window_duration", with = "humantime_serde")]
    pub duration: Duration,

    /// Grace period after window close during which in-flight uploads may
    /// still land. Default: 2m.
    #[serde(default = "default_window_tolerance", with = "humantime_serde")]
    pub tolerance: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            duration: default_window_duration(),
            tolerance: default_window_tolerance(),
        }
    }
}

impl Config {
    /// Loads and validates a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks cross-field invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.ingest.max_header_bytes == 0 {
            bail!("ingest.max_header_bytes must be greater than zero");
        }
        if self.ingest.max_entry_bytes == 0 {
            bail!("ingest.max_entry_bytes must be greater than zero");
        }
        if self.window.duration.is_zero() {
            bail!("window.duration must be greater than zero");
        }
        Ok(())
    }
}

// --- Default value functions ---

fn default_max_header_bytes() -> usize {
    4 * 1024
}

fn default_max_entry_bytes() -> usize {
    1024 * 1024
}

fn default_window_duration() -> Duration {
    Duration::from_secs(20 * 60)
}

fn default_window_tolerance() -> Duration {
    Duration::from_secs(2 * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.ingest.max_header_bytes, 4096);
        assert_eq!(cfg.ingest.max_entry_bytes, 1024 * 1024);
        assert_eq!(cfg.window.duration, Duration::from_secs(1200));
        assert_eq!(cfg.window.tolerance, Duration::from_secs(120));
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn test_parse_yaml() {
        let cfg: Config = serde_yaml::from_str(
            r#"
ingest:
  max_header_bytes: 2048
  max_entry_bytes: 65536
window:
  duration: 10m
  tolerance: 30s
"#,
        )
        .expect("yaml parses");

        assert_eq!(cfg.ingest.max_header_bytes, 2048);
        assert_eq!(cfg.ingest.max_entry_bytes, 65536);
        assert_eq!(cfg.window.duration, Duration::from_secs(600));
        assert_eq!(cfg.window.tolerance, Duration::from_secs(30));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("ingest:\n  max_header_bytes: 512\n")
            .expect("yaml parses");
        assert_eq!(cfg.ingest.max_header_bytes, 512);
        assert_eq!(cfg.ingest.max_entry_bytes, 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut cfg = Config::default();
        cfg.ingest.max_header_bytes = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.ingest.max_entry_bytes = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.window.duration = Duration::ZERO;
        assert!(cfg.validate().is_err());
    }
}
