use clap::Parser;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound on concurrent senders.
pub const MAX_RATE_LIMIT: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("rate limit must be at least 1")]
    ZeroRateLimit,

    #[error("rate limit must be at most {max}")]
    RateLimitTooLarge { max: usize },

    #[error("{name} interval must be at least one second")]
    ZeroInterval { name: &'static str },

    #[error("server address must not be empty")]
    EmptyAddress,
}

/// Command line and environment. Anything given here overrides the config
/// file.
#[derive(Debug, Default, Parser)]
#[command(name = "metrix-agent", version, about = "Samples host metrics and reports them to a metrix server")]
pub struct AgentArgs {
    /// Collector server address (host:port or URL)
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Seconds between samples
    #[arg(short = 'p', long = "poll-interval", env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Seconds between reports
    #[arg(short = 'r', long = "report-interval", env = "REPORT_INTERVAL")]
    pub report_interval: Option<u64>,

    /// Number of concurrent senders per report
    #[arg(short = 'l', long = "rate-limit", env = "RATE_LIMIT")]
    pub rate_limit: Option<usize>,

    /// HMAC-SHA256 signing key
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// PEM file with the server's public key or certificate
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// TOML config file
    #[arg(short = 'c', long, env = "CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    /// Shared secret for request signing. Empty disables signing.
    #[serde(default)]
    pub key: Option<String>,
    /// Public key or certificate used to encrypt payloads.
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_rate_limit() -> usize {
    3
}

fn default_request_timeout() -> u64 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            rate_limit: default_rate_limit(),
            key: None,
            crypto_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, then the config file if one is named, then flags and
    /// environment. The result is validated.
    pub fn from_args(args: AgentArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(address) = args.address {
            config.address = address;
        }
        if let Some(secs) = args.poll_interval {
            config.poll_interval_secs = secs;
        }
        if let Some(secs) = args.report_interval {
            config.report_interval_secs = secs;
        }
        if let Some(limit) = args.rate_limit {
            config.rate_limit = limit;
        }
        if args.key.is_some() {
            config.key = args.key;
        }
        if args.crypto_key.is_some() {
            config.crypto_key = args.crypto_key;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval { name: "poll" });
        }
        if self.report_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval { name: "report" });
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroInterval { name: "request timeout" });
        }
        self.workers()?;
        Ok(())
    }

    /// Worker pool size, between 1 and [`MAX_RATE_LIMIT`].
    pub fn workers(&self) -> Result<NonZeroUsize, ConfigError> {
        if self.rate_limit > MAX_RATE_LIMIT {
            return Err(ConfigError::RateLimitTooLarge {
                max: MAX_RATE_LIMIT,
            });
        }
        NonZeroUsize::new(self.rate_limit).ok_or(ConfigError::ZeroRateLimit)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
