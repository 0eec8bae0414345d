use clap::Parser;
use ip_network::IpNetwork;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

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

    #[error("listen address must not be empty")]
    EmptyAddress,

    #[error("invalid trusted subnet '{value}': expected CIDR or IP address")]
    Subnet { value: String },
}

/// Command line and environment. Anything given here overrides the config
/// file.
#[derive(Debug, Default, Parser)]
#[command(name = "metrix-server", version, about = "Collects metrics reported by metrix agents")]
pub struct ServerArgs {
    /// Listen address (host:port)
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// Seconds between snapshot flushes; 0 flushes on every write
    #[arg(short = 'i', long = "store-interval", env = "STORE_INTERVAL")]
    pub store_interval: Option<u64>,

    /// JSON snapshot file
    #[arg(short = 'f', long = "file-storage-path", env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<PathBuf>,

    /// Load the snapshot at startup
    #[arg(short = 'r', long, env = "RESTORE")]
    pub restore: Option<bool>,

    /// SQLite database path (optionally prefixed with sqlite://)
    #[arg(short = 'd', long = "database-dsn", env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// HMAC-SHA256 signing key
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// PEM file with the private key for payload decryption
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Only accept agents whose X-Real-IP is inside this CIDR
    #[arg(short = 't', long = "trusted-subnet", env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,

    /// TOML config file
    #[arg(short = 'c', long, env = "CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_store_interval")]
    pub store_interval_secs: u64,
    #[serde(default)]
    pub file_storage_path: Option<PathBuf>,
    #[serde(default = "default_restore")]
    pub restore: bool,
    #[serde(default)]
    pub database_dsn: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    #[serde(default)]
    pub trusted_subnet: Option<String>,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_restore() -> bool {
    true
}

/// Where metrics are kept, chosen database first, then file, then memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Sqlite(PathBuf),
    File(PathBuf),
    Memory,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            store_interval_secs: default_store_interval(),
            file_storage_path: None,
            restore: default_restore(),
            database_dsn: None,
            key: None,
            crypto_key: None,
            trusted_subnet: None,
        }
    }
}

fn non_empty<T: AsRef<std::ffi::OsStr>>(value: Option<T>) -> Option<T> {
    value.filter(|v| !v.as_ref().is_empty())
}

impl ServerConfig {
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
    pub fn from_args(args: ServerArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(address) = args.address {
            config.address = address;
        }
        if let Some(secs) = args.store_interval {
            config.store_interval_secs = secs;
        }
        if let Some(restore) = args.restore {
            config.restore = restore;
        }
        if args.file_storage_path.is_some() {
            config.file_storage_path = args.file_storage_path;
        }
        if args.database_dsn.is_some() {
            config.database_dsn = args.database_dsn;
        }
        if args.key.is_some() {
            config.key = args.key;
        }
        if args.crypto_key.is_some() {
            config.crypto_key = args.crypto_key;
        }
        if args.trusted_subnet.is_some() {
            config.trusted_subnet = args.trusted_subnet;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        self.trusted_subnet()?;
        Ok(())
    }

    pub fn store_interval(&self) -> Duration {
        Duration::from_secs(self.store_interval_secs)
    }

    pub fn backend(&self) -> StorageBackend {
        if let Some(dsn) = non_empty(self.database_dsn.as_deref()) {
            let path = dsn.strip_prefix("sqlite://").unwrap_or(dsn);
            return StorageBackend::Sqlite(PathBuf::from(path));
        }
        if let Some(path) = non_empty(self.file_storage_path.as_deref()) {
            return StorageBackend::File(path.to_path_buf());
        }
        StorageBackend::Memory
    }

    /// The trusted subnet; a bare address is a single-host network.
    pub fn trusted_subnet(&self) -> Result<Option<IpNetwork>, ConfigError> {
        let Some(value) = non_empty(self.trusted_subnet.as_deref()) else {
            return Ok(None);
        };
        let value = value.trim();
        let invalid = || ConfigError::Subnet {
            value: value.to_string(),
        };
        let net = match IpNetwork::from_str(value) {
            Ok(net) => net,
            Err(_) => match IpAddr::from_str(value).map_err(|_| invalid())? {
                IpAddr::V4(ip4) => IpNetwork::new(ip4, 32).map_err(|_| invalid())?,
                IpAddr::V6(ip6) => IpNetwork::new(ip6, 128).map_err(|_| invalid())?,
            },
        };
        Ok(Some(net))
    }

    pub fn crypto_key(&self) -> Option<&Path> {
        non_empty(self.crypto_key.as_deref())
    }
}
