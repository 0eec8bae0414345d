use metrix_common::types::MetricKind;
use std::path::PathBuf;

/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use metrix_common::types::MetricKind;
/// use metrix_storage::error::StorageError;
///
/// let err = StorageError::KindMismatch {
///     name: "PollCount".to_string(),
///     stored: MetricKind::Counter,
///     requested: MetricKind::Gauge,
/// };
/// assert!(err.to_string().contains("PollCount"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The metric name is already bound to the other kind.
    #[error("Storage: metric '{name}' is a {stored}, not a {requested}")]
    KindMismatch {
        name: String,
        stored: MetricKind,
        requested: MetricKind,
    },

    /// Adding the delta would overflow the counter's total. The stored
    /// total is left as it was.
    #[error("Storage: counter '{name}' overflows: {total} + {delta}")]
    CounterOverflow { name: String, total: i64, delta: i64 },

    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Snapshot file could not be encoded or decoded.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot file could not be read or written.
    #[error("Storage: I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored row does not describe a valid metric.
    #[error("Storage: corrupt record '{name}': {reason}")]
    Corrupt { name: String, reason: String },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
