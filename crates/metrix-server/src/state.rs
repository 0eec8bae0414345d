use crate::config::{ConfigError, ServerConfig, StorageBackend};
use ip_network::IpNetwork;
use metrix_common::cipher::PayloadDecryptor;
use metrix_common::signature::HashSigner;
use metrix_storage::error::StorageError;
use metrix_storage::file::FileStorage;
use metrix_storage::memory::MemStorage;
use metrix_storage::sqlite::SqliteStorage;
use metrix_storage::StorageEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageEngine>,
    pub signer: HashSigner,
    pub decryptor: Option<Arc<PayloadDecryptor>>,
    pub trusted_subnet: Option<IpNetwork>,
}

impl AppState {
    /// Unsigned, unencrypted and open to every address.
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self {
            storage,
            signer: HashSigner::default(),
            decryptor: None,
            trusted_subnet: None,
        }
    }

    /// Wires `storage` with the security settings from `config`.
    ///
    /// An unreadable private key disables decryption instead of failing.
    pub fn from_config(
        config: &ServerConfig,
        storage: Arc<dyn StorageEngine>,
    ) -> Result<Self, ConfigError> {
        let decryptor = config.crypto_key().and_then(|path| {
            match PayloadDecryptor::from_pem_file(path) {
                Ok(decryptor) => {
                    tracing::info!(path = %path.display(), "Payload decryption enabled");
                    Some(Arc::new(decryptor))
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Invalid private key, payload decryption disabled"
                    );
                    None
                }
            }
        });
        Ok(Self {
            storage,
            signer: HashSigner::new(config.key.as_deref()),
            decryptor,
            trusted_subnet: config.trusted_subnet()?,
        })
    }
}

/// The opened backend. `file` is set when the periodic flusher applies.
pub struct OpenedStorage {
    pub engine: Arc<dyn StorageEngine>,
    pub file: Option<Arc<FileStorage>>,
}

pub fn open_storage(config: &ServerConfig) -> Result<OpenedStorage, StorageError> {
    match config.backend() {
        StorageBackend::Sqlite(path) => {
            tracing::info!(path = %path.display(), "Using SQLite storage");
            Ok(OpenedStorage {
                engine: Arc::new(SqliteStorage::open(&path)?),
                file: None,
            })
        }
        StorageBackend::File(path) => {
            tracing::info!(
                path = %path.display(),
                store_interval_secs = config.store_interval_secs,
                restore = config.restore,
                "Using file storage"
            );
            let file = Arc::new(FileStorage::open(
                path,
                config.store_interval(),
                config.restore,
            )?);
            Ok(OpenedStorage {
                engine: file.clone(),
                file: Some(file),
            })
        }
        StorageBackend::Memory => {
            tracing::info!("Using in-memory storage");
            Ok(OpenedStorage {
                engine: Arc::new(MemStorage::new()),
                file: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrix_common::types::Metric;

    #[test]
    fn file_backend_keeps_a_flushable_handle() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            file_storage_path: Some(dir.path().join("metrics.json")),
            ..ServerConfig::default()
        };
        let opened = open_storage(&config).unwrap();
        let file = opened.file.expect("file handle");
        assert_eq!(file.path(), dir.path().join("metrics.json"));
        opened.engine.update(Metric::counter("PollCount", 2)).unwrap();
        file.flush().unwrap();
        assert!(file.path().exists());
    }

    #[test]
    fn database_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            file_storage_path: Some(dir.path().join("metrics.json")),
            database_dsn: Some(dir.path().join("metrics.db").display().to_string()),
            ..ServerConfig::default()
        };
        let opened = open_storage(&config).unwrap();
        assert!(opened.file.is_none());
        opened.engine.ping().unwrap();
        assert!(dir.path().join("metrics.db").exists());
    }

    #[test]
    fn unreadable_private_key_disables_decryption() {
        let dir = tempfile::tempdir().unwrap();
        let key = dir.path().join("private.pem");
        std::fs::write(&key, "not a key").unwrap();
        let config = ServerConfig {
            crypto_key: Some(key),
            key: Some("secret".to_string()),
            ..ServerConfig::default()
        };
        let state = AppState::from_config(&config, Arc::new(MemStorage::new())).unwrap();
        assert!(state.decryptor.is_none());
        assert!(state.signer.is_enabled());
    }
}
