//! Configuration management for udp-impair.
//!
//! A config file is optional; every field has a default and the command line
//! overrides whatever the file sets.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::CaptureTarget;
use crate::error::{Error, Result};
use crate::impair::DelayDistribution;
use crate::types::Endpoint;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Relay endpoints and run limits.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Delay model configuration.
    #[serde(default)]
    pub delay: DelayConfig,

    /// Reorder controller configuration.
    #[serde(default)]
    pub reorder: ReorderConfig,

    /// Structured capture log configuration.
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Diagnostic logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        Ok(config)
    }

    /// Validate configuration.
    ///
    /// Called once the command line has been merged in, since the endpoints
    /// usually arrive as flags rather than from the file.
    pub fn validate(&self) -> Result<()> {
        if self.proxy.listen.is_none() {
            return Err(Error::InvalidConfig("listen address is required".into()));
        }

        if self.proxy.upstream.is_none() {
            return Err(Error::InvalidConfig("upstream address is required".into()));
        }

        if !self.reorder.rate.is_finite() || !(0.0..=1.0).contains(&self.reorder.rate) {
            return Err(Error::InvalidConfig(format!(
                "reorder rate must be within 0.0-1.0, got {}",
                self.reorder.rate
            )));
        }

        if !self.delay.base_ms.is_finite() || self.delay.base_ms < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "base delay must be a non-negative number of milliseconds, got {}",
                self.delay.base_ms
            )));
        }

        if !self.delay.jitter_ms.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "jitter must be finite, got {}",
                self.delay.jitter_ms
            )));
        }

        if self.delay.expected_packets == 0 {
            return Err(Error::InvalidConfig("expected packets must be at least 1".into()));
        }

        if self.delay.pool_size == Some(0) {
            return Err(Error::InvalidConfig("delay pool size must be at least 1".into()));
        }

        Ok(())
    }
}

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Address the relay listens on.
    pub listen: Option<Endpoint>,

    /// Upstream peer address.
    pub upstream: Option<Endpoint>,

    /// Stop after this many accepted packets (0 = unbounded).
    #[serde(default)]
    pub max_packets: u64,

    /// Receive buffer size in bytes.
    #[serde(default = "default_recv_buffer")]
    pub recv_buffer: usize,
}

fn default_recv_buffer() -> usize {
    crate::MAX_DATAGRAM
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: None,
            upstream: None,
            max_packets: 0,
            recv_buffer: default_recv_buffer(),
        }
    }
}

/// Delay model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayConfig {
    /// Base one-way delay in milliseconds.
    #[serde(default)]
    pub base_ms: f64,

    /// Jitter magnitude in milliseconds (standard deviation for `normal`,
    /// half-width for `uniform`). Zero or negative disables jitter.
    #[serde(default)]
    pub jitter_ms: f64,

    /// Jitter distribution.
    #[serde(default)]
    pub distribution: DelayDistribution,

    /// Expected packets per transfer; sets the pool walk stride.
    #[serde(default = "default_expected_packets")]
    pub expected_packets: usize,

    /// Delay pool size (defaults to `expected_packets`).
    pub pool_size: Option<usize>,

    /// Seed for reproducible delay sampling.
    pub seed: Option<u64>,
}

fn default_expected_packets() -> usize {
    20000
}

impl DelayConfig {
    /// Effective pool size.
    pub fn pool_size(&self) -> usize {
        self.pool_size.unwrap_or(self.expected_packets).max(1)
    }
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            base_ms: 0.0,
            jitter_ms: 0.0,
            distribution: DelayDistribution::default(),
            expected_packets: default_expected_packets(),
            pool_size: None,
            seed: None,
        }
    }
}

/// Reorder controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderConfig {
    /// Target fraction of packets swapped with their predecessor (0 disables).
    #[serde(default)]
    pub rate: f64,

    /// Spacing applied when a send has to be pushed past the floor.
    #[serde(default = "default_min_gap", with = "humantime_serde")]
    pub min_gap: Duration,

    /// Silence after which a held packet is released without a partner.
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,
}

fn default_min_gap() -> Duration {
    Duration::from_micros(100)
}
fn default_idle_timeout() -> Duration {
    Duration::from_millis(50)
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            rate: 0.0,
            min_gap: default_min_gap(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

/// Capture log configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Where scheduled-send records go (`-` for stdout).
    #[serde(default)]
    pub target: CaptureTarget,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
///
/// Diagnostics always go to stderr; stdout may be carrying the capture log.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_ansi(config.color)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Config {
        let mut config = Config::default();
        config.proxy.listen = Some("127.0.0.1:5300".parse().unwrap());
        config.proxy.upstream = Some("127.0.0.1:5301".parse().unwrap());
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.delay.expected_packets, 20000);
        assert_eq!(config.delay.pool_size(), 20000);
        assert_eq!(config.reorder.min_gap, Duration::from_micros(100));
        assert_eq!(config.reorder.idle_timeout, Duration::from_millis(50));
        assert_eq!(config.capture.target, CaptureTarget::Stdout);
        assert_eq!(config.proxy.max_packets, 0);
    }

    #[test]
    fn test_validate_requires_endpoints() {
        let mut config = endpoints();
        assert!(config.validate().is_ok());

        config.proxy.upstream = None;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_ranges() {
        let mut config = endpoints();
        config.reorder.rate = 1.5;
        assert!(config.validate().is_err());

        let mut config = endpoints();
        config.delay.base_ms = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = endpoints();
        config.delay.jitter_ms = -5.0;
        assert!(config.validate().is_ok(), "negative jitter only disables jitter");

        let mut config = endpoints();
        config.delay.pool_size = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            [proxy]
            listen = "[::1]:5300"
            upstream = "127.0.0.1:5301"
            max_packets = 2000

            [delay]
            base_ms = 400.0
            jitter_ms = 100.0
            distribution = "uniform"
            seed = 7

            [reorder]
            rate = 0.0006
            min_gap = "250us"
            idle_timeout = "20ms"

            [capture]
            target = "/tmp/capture.jsonl"
            "#,
        )
        .unwrap();

        assert_eq!(config.proxy.listen.as_ref().unwrap().host(), "::1");
        assert_eq!(config.proxy.max_packets, 2000);
        assert_eq!(config.delay.distribution, DelayDistribution::Uniform);
        assert_eq!(config.delay.seed, Some(7));
        assert_eq!(config.reorder.min_gap, Duration::from_micros(250));
        assert_eq!(config.reorder.idle_timeout, Duration::from_millis(20));
        assert_eq!(
            config.capture.target,
            CaptureTarget::File("/tmp/capture.jsonl".into())
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_endpoint() {
        let result: std::result::Result<Config, _> = toml::from_str(
            r#"
            [proxy]
            listen = "localhost"
            "#,
        );
        assert!(result.is_err());
    }
}
