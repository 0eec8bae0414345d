use crate::error::{Result, StorageError};
use crate::memory::MemStorage;
use crate::StorageEngine;
use chrono::{DateTime, Utc};
use metrix_common::types::Metric;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    saved_at: DateTime<Utc>,
    metrics: Vec<Metric>,
}

/// In-memory storage persisted as a JSON snapshot file.
///
/// With a zero store interval every write is flushed before it returns.
/// Otherwise the snapshot is written by [`FileStorage::spawn_flusher`] and
/// once more on [`StorageEngine::close`].
pub struct FileStorage {
    inner: MemStorage,
    path: PathBuf,
    store_interval: Duration,
    flush_lock: Mutex<()>,
}

impl FileStorage {
    /// Opens the snapshot at `path`, loading it first when `restore` is set.
    ///
    /// A missing file is not an error: the storage starts empty.
    pub fn open(path: impl Into<PathBuf>, store_interval: Duration, restore: bool) -> Result<Self> {
        let path = path.into();
        let inner = if restore {
            match load_snapshot(&path)? {
                Some(snapshot) => {
                    tracing::info!(
                        path = %path.display(),
                        count = snapshot.metrics.len(),
                        saved_at = %snapshot.saved_at,
                        "Restored metrics snapshot"
                    );
                    MemStorage::with_metrics(snapshot.metrics)
                }
                None => {
                    tracing::info!(path = %path.display(), "No snapshot to restore, starting empty");
                    MemStorage::new()
                }
            }
        } else {
            MemStorage::new()
        };
        Ok(Self {
            inner,
            path,
            store_interval,
            flush_lock: Mutex::new(()),
        })
    }

    /// The snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `true` when every write is flushed synchronously.
    pub fn is_synchronous(&self) -> bool {
        self.store_interval.is_zero()
    }

    /// Writes the current contents to a temporary file and renames it over
    /// the snapshot.
    pub fn flush(&self) -> Result<()> {
        let _guard = self
            .flush_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut metrics = self.inner.get_all()?;
        metrics.sort_by(|a, b| a.id.cmp(&b.id));
        let snapshot = Snapshot {
            saved_at: Utc::now(),
            metrics,
        };
        let body = serde_json::to_vec_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, body).map_err(|e| StorageError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StorageError::io(&self.path, e))?;

        tracing::debug!(path = %self.path.display(), count = snapshot.metrics.len(), "Snapshot flushed");
        Ok(())
    }

    /// Starts the periodic flush task. Returns `None` in synchronous mode.
    ///
    /// The task stops when `token` is cancelled; the final flush is left to
    /// [`StorageEngine::close`].
    pub fn spawn_flusher(self: &Arc<Self>, token: CancellationToken) -> Option<JoinHandle<()>> {
        if self.is_synchronous() {
            return None;
        }
        let storage = Arc::clone(self);
        let period = self.store_interval;
        tracing::info!(
            path = %self.path().display(),
            interval_secs = period.as_secs(),
            "Snapshot flusher started"
        );
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = storage.flush() {
                            tracing::error!(
                                path = %storage.path().display(),
                                error = %e,
                                "Periodic snapshot flush failed"
                            );
                        }
                    }
                }
            }
        }))
    }

    fn after_write(&self) -> Result<()> {
        if self.is_synchronous() {
            self.flush()?;
        }
        Ok(())
    }
}

fn load_snapshot(path: &Path) -> Result<Option<Snapshot>> {
    let body = match std::fs::read(path) {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    Ok(Some(serde_json::from_slice(&body)?))
}

impl StorageEngine for FileStorage {
    fn update(&self, metric: Metric) -> Result<Metric> {
        let stored = self.inner.update(metric)?;
        self.after_write()?;
        Ok(stored)
    }

    fn bulk_update(&self, metrics: Vec<Metric>) -> Result<()> {
        self.inner.bulk_update(metrics)?;
        self.after_write()
    }

    fn get(&self, name: &str) -> Result<Option<Metric>> {
        self.inner.get(name)
    }

    fn get_all(&self) -> Result<Vec<Metric>> {
        self.inner.get_all()
    }

    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.flush()
    }
}
