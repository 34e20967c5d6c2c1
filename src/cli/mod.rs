//! Command line interface for udp-impair.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::debug;

use crate::capture::CaptureTarget;
use crate::config::Config;
use crate::error::Result;
use crate::impair::{delay_duration, DelayDistribution};
use crate::types::Endpoint;

/// udp-impair - UDP relay with sorted delay and controlled reordering
#[derive(Parser, Debug)]
#[command(
    name = "udp-impair",
    author,
    version,
    about = "UDP relay with sorted delay assignment and controlled reordering",
    long_about = r#"
udp-impair relays datagrams between one client and an upstream peer while:

  - Adding base delay plus normal or uniform jitter, assigned from a sorted
    pool so that jitter alone never reorders packets
  - Swapping exactly one adjacent pair every 1/reorder-rate packets per
    direction, making the observed reorder rate deterministic
  - Writing one JSON line per scheduled send to the capture log

EXAMPLE:
  udp-impair --listen 127.0.0.1:5300 --upstream 127.0.0.1:5301 \
             --delay-ms 400 --jitter-ms 100 --reorder-rate 0.0006 --log capture.jsonl
"#
)]
#[command(allow_negative_numbers = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen address (host:port, IPv6 as [addr]:port)
    #[arg(long)]
    pub listen: Option<Endpoint>,

    /// Upstream address (host:port, IPv6 as [addr]:port)
    #[arg(long)]
    pub upstream: Option<Endpoint>,

    /// Capture log path ("-" for stdout)
    #[arg(long)]
    pub log: Option<CaptureTarget>,

    /// Stop after N accepted packets (0 = unbounded)
    #[arg(long)]
    pub max_packets: Option<u64>,

    /// Random seed for reproducible delay sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// Base delay in milliseconds
    #[arg(long)]
    pub delay_ms: Option<f64>,

    /// Jitter in milliseconds (standard deviation for normal, half-width for uniform)
    #[arg(long)]
    pub jitter_ms: Option<f64>,

    /// Jitter distribution
    #[arg(long, value_enum)]
    pub dist: Option<Distribution>,

    /// Target reorder rate 0.0-1.0 (0 disables reordering)
    #[arg(long)]
    pub reorder_rate: Option<f64>,

    /// Alias for --reorder-rate (deprecated)
    #[arg(long, hide = true)]
    pub reorder_prob: Option<f64>,

    /// Expected packets per transfer (controls delay sampling stride)
    #[arg(long)]
    pub expected_packets: Option<usize>,

    /// Delay pool size (defaults to --expected-packets)
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Spacing in milliseconds when a send is pushed past the direction floor
    #[arg(long)]
    pub min_gap_ms: Option<f64>,

    /// Release a held packet after this many milliseconds without traffic
    #[arg(long)]
    pub idle_timeout_ms: Option<f64>,

    /// Accepted for compatibility; ignored
    #[arg(long, hide = true)]
    pub burst_correlation: Option<f64>,

    /// Accepted for compatibility; ignored
    #[arg(long, hide = true)]
    pub burst_window_ms: Option<f64>,

    /// Accepted for compatibility; ignored
    #[arg(long, hide = true)]
    pub jitter_slice_ms: Option<f64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    pub log_level: String,

    /// Diagnostic log format
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

/// Jitter distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Distribution {
    Normal,
    Uniform,
}

impl From<Distribution> for DelayDistribution {
    fn from(d: Distribution) -> Self {
        match d {
            Distribution::Normal => Self::Normal,
            Distribution::Uniform => Self::Uniform,
        }
    }
}

/// Diagnostic log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

impl Cli {
    /// Build the effective configuration: the config file (if any) with
    /// every flag given on the command line applied on top.
    pub fn to_config(&self) -> Result<Config> {
        let mut config = match self.config {
            Some(ref path) => Config::load(path)?,
            None => Config::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Apply command line overrides to `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(ref listen) = self.listen {
            config.proxy.listen = Some(listen.clone());
        }
        if let Some(ref upstream) = self.upstream {
            config.proxy.upstream = Some(upstream.clone());
        }
        if let Some(max_packets) = self.max_packets {
            config.proxy.max_packets = max_packets;
        }
        if let Some(ref log) = self.log {
            config.capture.target = log.clone();
        }

        if let Some(base_ms) = self.delay_ms {
            config.delay.base_ms = base_ms;
        }
        if let Some(jitter_ms) = self.jitter_ms {
            config.delay.jitter_ms = jitter_ms;
        }
        if let Some(dist) = self.dist {
            config.delay.distribution = dist.into();
        }
        if let Some(expected) = self.expected_packets {
            config.delay.expected_packets = expected;
        }
        if let Some(pool_size) = self.pool_size {
            config.delay.pool_size = Some(pool_size);
        }
        if self.seed.is_some() {
            config.delay.seed = self.seed;
        }

        // The deprecated alias wins when both are given.
        if let Some(rate) = self.reorder_prob.or(self.reorder_rate) {
            config.reorder.rate = rate;
        }
        if let Some(min_gap_ms) = self.min_gap_ms {
            config.reorder.min_gap = delay_duration(min_gap_ms);
        }
        if let Some(idle_ms) = self.idle_timeout_ms {
            config.reorder.idle_timeout = delay_duration(idle_ms);
        }

        config.logging.level = self.log_level.clone();
        config.logging.format = match self.log_format {
            LogFormat::Text => "text".into(),
            LogFormat::Json => "json".into(),
        };
        config.logging.color = !self.no_color;

        if self.burst_correlation.is_some()
            || self.burst_window_ms.is_some()
            || self.jitter_slice_ms.is_some()
        {
            debug!("Ignoring burst/jitter-slice compatibility flags");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["udp-impair"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_harness_flags() {
        let cli = parse(&[
            "--listen",
            "127.0.0.1:5300",
            "--upstream",
            "[::1]:5301",
            "--delay-ms",
            "400",
            "--jitter-ms",
            "100",
            "--reorder-rate",
            "0.0006",
            "--burst-correlation",
            "0.9",
            "--expected-packets",
            "2000",
            "--max-packets",
            "2000",
            "--dist",
            "uniform",
            "--seed",
            "11",
            "--log",
            "/dev/null",
        ]);
        let config = cli.to_config().unwrap();

        assert_eq!(config.proxy.listen.unwrap().to_string(), "127.0.0.1:5300");
        assert_eq!(config.proxy.upstream.unwrap().host(), "::1");
        assert_eq!(config.delay.base_ms, 400.0);
        assert_eq!(config.delay.jitter_ms, 100.0);
        assert_eq!(config.delay.distribution, DelayDistribution::Uniform);
        assert_eq!(config.delay.expected_packets, 2000);
        assert_eq!(config.delay.seed, Some(11));
        assert_eq!(config.reorder.rate, 0.0006);
        assert_eq!(config.proxy.max_packets, 2000);
        assert_eq!(config.capture.target, CaptureTarget::File("/dev/null".into()));
    }

    #[test]
    fn test_defaults_match_harness_expectations() {
        let config = parse(&["--listen", "127.0.0.1:1", "--upstream", "127.0.0.1:2"])
            .to_config()
            .unwrap();
        assert_eq!(config.capture.target, CaptureTarget::Stdout);
        assert_eq!(config.delay.expected_packets, 20000);
        assert_eq!(config.delay.distribution, DelayDistribution::Normal);
        assert_eq!(config.reorder.rate, 0.0);
        assert_eq!(config.reorder.min_gap, Duration::from_micros(100));
        assert_eq!(config.proxy.max_packets, 0);
    }

    #[test]
    fn test_reorder_prob_alias_wins() {
        let cli = parse(&[
            "--listen",
            "127.0.0.1:1",
            "--upstream",
            "127.0.0.1:2",
            "--reorder-rate",
            "0.1",
            "--reorder-prob",
            "0.25",
        ]);
        assert_eq!(cli.to_config().unwrap().reorder.rate, 0.25);
    }

    #[test]
    fn test_millisecond_durations() {
        let cli = parse(&[
            "--listen",
            "127.0.0.1:1",
            "--upstream",
            "127.0.0.1:2",
            "--min-gap-ms",
            "0.5",
            "--idle-timeout-ms",
            "20",
            "--jitter-ms",
            "-1",
        ]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.reorder.min_gap, Duration::from_micros(500));
        assert_eq!(config.reorder.idle_timeout, Duration::from_millis(20));
        assert_eq!(config.delay.jitter_ms, -1.0);
    }

    #[test]
    fn test_malformed_endpoint_rejected() {
        let mut argv = vec!["udp-impair", "--listen", "[::1:5300", "--upstream", "127.0.0.1:2"];
        assert!(Cli::try_parse_from(&argv).is_err());

        argv[2] = "localhost";
        assert!(Cli::try_parse_from(&argv).is_err());
    }

    #[test]
    fn test_missing_upstream_fails_validation() {
        let cli = parse(&["--listen", "127.0.0.1:1"]);
        assert!(cli.to_config().is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("impair.toml");
        std::fs::write(
            &path,
            r#"
            [proxy]
            listen = "127.0.0.1:7000"
            upstream = "127.0.0.1:7001"

            [delay]
            base_ms = 50.0
            jitter_ms = 5.0
            "#,
        )
        .unwrap();

        let cli = parse(&["--config", path.to_str().unwrap(), "--delay-ms", "80"]);
        let config = cli.to_config().unwrap();
        assert_eq!(config.proxy.listen.unwrap().port(), 7000);
        assert_eq!(config.delay.base_ms, 80.0);
        assert_eq!(config.delay.jitter_ms, 5.0);
    }
}
