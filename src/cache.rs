use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use tracing::{debug, error, warn};

use crate::records::PriceRecord;

/// Last successful batch per market, kept in memory and mirrored to
/// `<dir>/<market_id>.json` so a restart can still serve a fallback.
pub struct BatchCache {
    dir: Option<PathBuf>,
    batches: Mutex<HashMap<String, Vec<PriceRecord>>>,
}

impl BatchCache {
    #[cfg(test)]
    pub fn in_memory() -> Self {
        BatchCache {
            dir: None,
            batches: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        BatchCache {
            dir: Some(dir.into()),
            batches: Mutex::new(HashMap::new()),
        }
    }

    fn file_for(dir: &Path, market_id: &str) -> PathBuf {
        dir.join(format!("{}.json", market_id))
    }

    /// A panic while the lock was held only interrupts a map update, so the
    /// map is still usable.
    fn batches(&self) -> MutexGuard<'_, HashMap<String, Vec<PriceRecord>>> {
        self.batches.lock().unwrap_or_else(|poisoned| {
            warn!("Batch cache lock was poisoned, recovering");
            self.batches.clear_poison();
            poisoned.into_inner()
        })
    }

    /// Replace the cached batch. A failed disk write is logged; the in-memory
    /// copy is kept either way.
    pub async fn store(&self, market_id: &str, records: &[PriceRecord]) {
        self.batches().insert(market_id.to_string(), records.to_vec());

        let Some(dir) = &self.dir else {
            return;
        };
        let path = Self::file_for(dir, market_id);
        let records = records.to_vec();
        match tokio::task::spawn_blocking(move || write_batch(&path, &records)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(market = market_id, "Cache write failed: {:#}", e),
            Err(e) => error!(market = market_id, "Cache write task failed: {}", e),
        }
    }

    pub async fn load(&self, market_id: &str) -> Option<Vec<PriceRecord>> {
        let cached = self.batches().get(market_id).cloned();
        if cached.is_some() {
            return cached;
        }
        let path = Self::file_for(self.dir.as_deref()?, market_id);
        let read = tokio::task::spawn_blocking(move || {
            if path.exists() {
                read_batch(&path).map(Some)
            } else {
                Ok(None)
            }
        })
        .await;

        match read {
            Ok(Ok(Some(batch))) => {
                debug!(market = market_id, rows = batch.len(), "Loaded cached batch from disk");
                Some(batch)
            }
            Ok(Ok(None)) => None,
            Ok(Err(e)) => {
                error!(market = market_id, "Cache read failed: {:#}", e);
                None
            }
            Err(e) => {
                error!(market = market_id, "Cache read task failed: {}", e);
                None
            }
        }
    }
}

fn write_batch(path: &Path, records: &[PriceRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec(records)?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}

fn read_batch(path: &Path) -> Result<Vec<PriceRecord>> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(serde_json::from_slice(&bytes)?)
}
