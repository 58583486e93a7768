//! JSON-file mirror of the in-memory store.
//!
//! Each key is written to `<cache_dir>/<file_stem>.json`. The mirror is only
//! used to warm the store on startup; the in-memory map stays authoritative.
//!
//! File I/O never runs on the caller's thread. The store enqueues a
//! [`MirrorOp`] while it still holds its slot lock, and a dedicated writer
//! thread applies them in that order.

use std::path::PathBuf;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::CacheKey;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key: CacheKey,
    pub data: Value,
    pub cached_at: DateTime<Utc>,
}

pub struct DiskMirror {
    cache_dir: PathBuf,
}

impl DiskMirror {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir).with_context(|| {
            format!("Failed to create cache directory: {}", cache_dir.display())
        })?;
        Ok(Self { cache_dir })
    }

    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{}.json", key.file_stem()))
    }

    /// Read every mirrored entry. Unreadable files are skipped with a warning.
    pub fn load_all(&self) -> Result<Vec<PersistedEntry>> {
        let mut entries = Vec::new();
        let dir = std::fs::read_dir(&self.cache_dir).with_context(|| {
            format!("Failed to read cache directory: {}", self.cache_dir.display())
        })?;

        for file in dir {
            let path = match file {
                Ok(file) => file.path(),
                Err(e) => {
                    warn!(error = %e, "Failed to read cache directory entry");
                    continue;
                }
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let parsed = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read cache file: {}", path.display()))
                .and_then(|contents| {
                    serde_json::from_str::<PersistedEntry>(&contents).with_context(|| {
                        format!("Failed to parse cache file: {}", path.display())
                    })
                });

            match parsed {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(error = %e, "Skipping unreadable cache file"),
            }
        }

        debug!(count = entries.len(), dir = %self.cache_dir.display(), "Loaded cache mirror");
        Ok(entries)
    }

    pub fn save(&self, entry: &PersistedEntry) -> Result<()> {
        let path = self.cache_path(&entry.key);
        let contents = serde_json::to_string_pretty(entry)?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write cache file: {}", path.display()))?;
        Ok(())
    }

    pub fn remove(&self, key: &CacheKey) -> Result<()> {
        let path = self.cache_path(key);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove cache file: {}", path.display()))?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        for entry in std::fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn apply(&self, op: MirrorOp) {
        match op {
            MirrorOp::Save(entry) => {
                if let Err(e) = self.save(&entry) {
                    warn!(key = %entry.key, error = %e, "Failed to mirror cache entry to disk");
                }
            }
            MirrorOp::Remove(key) => {
                if let Err(e) = self.remove(&key) {
                    warn!(key = %key, error = %e, "Failed to remove mirrored cache entry");
                }
            }
            MirrorOp::Clear => {
                if let Err(e) = self.clear() {
                    warn!(error = %e, "Failed to clear cache mirror");
                }
            }
            MirrorOp::Flush(done) => {
                let _ = done.send(());
            }
            #[cfg(test)]
            MirrorOp::Hold(release) => {
                let _ = release.recv();
            }
        }
    }
}

/// One pending change to the mirror.
pub(crate) enum MirrorOp {
    Save(PersistedEntry),
    Remove(CacheKey),
    Clear,
    /// Answered once every earlier op has been applied.
    Flush(oneshot::Sender<()>),
    /// Stalls the writer until the paired sender fires or is dropped.
    #[cfg(test)]
    Hold(std::sync::mpsc::Receiver<()>),
}

/// Owns the writer thread. Dropping it drains the queue and joins the thread.
pub(crate) struct MirrorWriter {
    tx: Option<mpsc::UnboundedSender<MirrorOp>>,
    thread: Option<JoinHandle<()>>,
}

impl MirrorWriter {
    pub fn spawn(disk: DiskMirror) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<MirrorOp>();
        let thread = std::thread::Builder::new()
            .name("huddle-cache-mirror".into())
            .spawn(move || {
                while let Some(op) = rx.blocking_recv() {
                    disk.apply(op);
                }
                debug!("Cache mirror writer stopped");
            })
            .context("Failed to start cache mirror writer")?;

        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    /// Queue an op. Never blocks and never touches the filesystem.
    pub fn send(&self, op: MirrorOp) {
        let Some(ref tx) = self.tx else { return };
        if tx.send(op).is_err() {
            warn!("Cache mirror writer is gone, dropping mirror update");
        }
    }

    /// Wait until everything queued so far has reached disk.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.send(MirrorOp::Flush(done));
        let _ = wait.await;
    }
}

impl Drop for MirrorWriter {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Cache mirror writer panicked");
            }
        }
    }
}
