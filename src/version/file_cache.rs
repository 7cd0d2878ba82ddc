//! File-persisted version cache
//!
//! Reads and writes go to an in-memory map. Mutations mark the cache dirty and
//! nudge a single background saver task, which debounces bursts of writes and
//! also saves on a fixed interval. The saver is the only writer of the cache
//! file; every save is a full rewrite through a temp file and rename, so a crash
//! can lose the last few writes but never leaves a corrupt file behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};
use tracing::{debug, info, warn};

use crate::config::{CACHE_FILE_NAME, CACHE_SAVE_DEBOUNCE_MS, CACHE_SAVE_INTERVAL_MS};
use crate::fs::write_atomic;
use crate::version::cache::{CacheEntry, EntryMap, VersionCache};
use crate::version::error::CacheError;

enum SaverSignal {
    Dirty,
    Flush(oneshot::Sender<Result<(), CacheError>>),
    Shutdown(oneshot::Sender<Result<(), CacheError>>),
}

struct SaverState {
    entries: Arc<EntryMap>,
    path: PathBuf,
    dirty: Arc<AtomicBool>,
}

impl SaverState {
    async fn save(&self) -> Result<(), CacheError> {
        let snapshot = self.entries.snapshot();
        let contents = serde_json::to_vec_pretty(&snapshot)?;
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            write_atomic(&path, &contents).map_err(|source| CacheError::Io {
                path: path.clone(),
                source,
            })
        })
        .await
        .map_err(|e| CacheError::Io {
            path: self.path.clone(),
            source: std::io::Error::other(e),
        })??;

        debug!("Saved {} cache entries to {:?}", snapshot.len(), self.path);
        Ok(())
    }

    async fn save_if_dirty(&self) -> Result<(), CacheError> {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.save().await;
        if let Err(e) = &result {
            // Leave the cache dirty so the next tick retries
            self.dirty.store(true, Ordering::SeqCst);
            warn!("Failed to save version cache to {:?}: {}", self.path, e);
        }
        result
    }

    async fn run(self, mut rx: mpsc::Receiver<SaverSignal>, debounce: Duration, every: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        // Each write pushes the deadline back; the interval tick bounds the delay
        let mut deadline: Option<Instant> = None;

        loop {
            let pending = deadline;
            let debounce_timer = async move {
                match pending {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                signal = rx.recv() => match signal {
                    Some(SaverSignal::Dirty) => {
                        deadline = Some(Instant::now() + debounce);
                    }
                    Some(SaverSignal::Flush(reply)) => {
                        deadline = None;
                        self.dirty.store(false, Ordering::SeqCst);
                        let result = self.save().await;
                        if result.is_err() {
                            self.dirty.store(true, Ordering::SeqCst);
                        }
                        let _ = reply.send(result);
                    }
                    Some(SaverSignal::Shutdown(reply)) => {
                        let _ = reply.send(self.save_if_dirty().await);
                        break;
                    }
                    None => {
                        let _ = self.save_if_dirty().await;
                        break;
                    }
                },
                _ = debounce_timer => {
                    deadline = None;
                    let _ = self.save_if_dirty().await;
                }
                _ = ticker.tick() => {
                    let _ = self.save_if_dirty().await;
                }
            }
        }

        debug!("Version cache saver stopped");
    }
}

/// Version cache persisted to `<cache_dir>/version_cache.json`
///
/// Must be created inside a tokio runtime because it spawns the saver task.
pub struct FileCache {
    entries: Arc<EntryMap>,
    path: PathBuf,
    dirty: Arc<AtomicBool>,
    signal: mpsc::Sender<SaverSignal>,
    saver: Mutex<Option<JoinHandle<()>>>,
}

impl FileCache {
    pub fn new(cache_dir: &Path, ttl: Duration) -> Self {
        Self::with_intervals(
            cache_dir,
            ttl,
            Duration::from_millis(CACHE_SAVE_DEBOUNCE_MS),
            Duration::from_millis(CACHE_SAVE_INTERVAL_MS),
        )
    }

    pub fn with_intervals(
        cache_dir: &Path,
        ttl: Duration,
        debounce: Duration,
        save_interval: Duration,
    ) -> Self {
        let path = cache_dir.join(CACHE_FILE_NAME);
        let entries = Arc::new(EntryMap::new(ttl, load_entries(&path)));
        let dirty = Arc::new(AtomicBool::new(false));
        let (signal, rx) = mpsc::channel(1);

        let state = SaverState {
            entries: entries.clone(),
            path: path.clone(),
            dirty: dirty.clone(),
        };
        let saver = tokio::spawn(state.run(rx, debounce, save_interval));

        info!("Version cache initialized at {:?}", path);

        Self {
            entries,
            path,
            dirty,
            signal,
            saver: Mutex::new(Some(saver)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ttl(&self) -> Duration {
        self.entries.ttl()
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        // A full channel already has a pending signal for the saver
        let _ = self.signal.try_send(SaverSignal::Dirty);
    }

    /// Write the current entries to disk now
    pub async fn flush(&self) -> Result<(), CacheError> {
        let (reply, done) = oneshot::channel();
        if self.signal.send(SaverSignal::Flush(reply)).await.is_err() {
            return self.save_directly().await;
        }
        match done.await {
            Ok(result) => result,
            Err(_) => self.save_directly().await,
        }
    }

    /// Stop the saver after a final save of pending changes
    pub async fn shutdown(&self) -> Result<(), CacheError> {
        let (reply, done) = oneshot::channel();
        let result = if self.signal.send(SaverSignal::Shutdown(reply)).await.is_ok() {
            done.await.unwrap_or(Ok(()))
        } else {
            Ok(())
        };

        let handle = self
            .saver
            .lock()
            .map_err(|_| CacheError::LockPoisoned)?
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        result
    }

    async fn save_directly(&self) -> Result<(), CacheError> {
        SaverState {
            entries: self.entries.clone(),
            path: self.path.clone(),
            dirty: self.dirty.clone(),
        }
        .save()
        .await
    }
}

impl VersionCache for FileCache {
    fn get(&self, key: &str) -> Option<String> {
        let (version, evicted) = self.entries.get(key);
        if evicted {
            self.mark_dirty();
        }
        version
    }

    fn set(&self, key: &str, version: &str) -> Result<(), CacheError> {
        self.entries.set(key, version);
        self.mark_dirty();
        Ok(())
    }

    fn delete(&self, key: &str) {
        if self.entries.delete(key) {
            self.mark_dirty();
        }
    }

    fn clear(&self) {
        if self.entries.clear() {
            self.mark_dirty();
        }
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys()
    }

    fn clean_expired(&self) -> usize {
        let removed = self.entries.clean_expired();
        if removed > 0 {
            self.mark_dirty();
        }
        removed
    }
}

/// Load persisted entries, dropping expired ones; any failure yields an empty cache
fn load_entries(path: &Path) -> HashMap<String, CacheEntry> {
    let contents = match std::fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No cache file at {:?}, starting empty", path);
            return HashMap::new();
        }
        Err(e) => {
            warn!("Failed to read cache file {:?}: {}. Starting empty", path, e);
            return HashMap::new();
        }
    };

    match serde_json::from_slice::<HashMap<String, CacheEntry>>(&contents) {
        Ok(mut entries) => {
            let now = Utc::now();
            entries.retain(|_, entry| !entry.is_expired(now));
            debug!("Loaded {} cache entries from {:?}", entries.len(), path);
            entries
        }
        Err(e) => {
            warn!("Cache file {:?} is corrupt: {}. Starting empty", path, e);
            HashMap::new()
        }
    }
}
