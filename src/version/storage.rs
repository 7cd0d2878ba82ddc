//! Durable version store
//!
//! A single `VersionStore` lives behind one `RwLock` and is persisted as YAML or
//! JSON. Every mutation rewrites the whole file through a temp file and rename
//! while the write lock is held, so the file on disk always parses and saves
//! from concurrent callers never interleave. There is no cross-process locking.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::BACKUP_DIR_NAME;
use crate::fs::write_atomic;
use crate::version::error::StorageError;
use crate::version::types::{UpdatePolicy, VersionInfo, VersionKind, VersionStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    Yaml,
    Json,
}

impl StorageFormat {
    /// `.json` files are JSON, everything else is YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => StorageFormat::Json,
            _ => StorageFormat::Yaml,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            StorageFormat::Yaml => "yaml",
            StorageFormat::Json => "json",
        }
    }

    fn serialize(&self, store: &VersionStore) -> Result<Vec<u8>, StorageError> {
        match self {
            StorageFormat::Yaml => Ok(serde_yaml::to_string(store)?.into_bytes()),
            StorageFormat::Json => Ok(serde_json::to_vec_pretty(store)?),
        }
    }

    fn deserialize(&self, contents: &[u8]) -> Result<VersionStore, StorageError> {
        match self {
            StorageFormat::Yaml => Ok(serde_yaml::from_slice(contents)?),
            StorageFormat::Json => Ok(serde_json::from_slice(contents)?),
        }
    }
}

/// Predicate filter for [`VersionStorage::query`]; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionQuery {
    pub name_contains: Option<String>,
    pub language: Option<String>,
    pub kind: Option<VersionKind>,
    pub outdated: bool,
    pub insecure: bool,
    pub checked_before: Option<DateTime<Utc>>,
}

impl VersionQuery {
    pub fn matches(&self, info: &VersionInfo) -> bool {
        if let Some(needle) = &self.name_contains {
            if !info.name.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(language) = &self.language {
            if &info.language != language {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if info.kind != kind {
                return false;
            }
        }
        if self.outdated && !info.is_outdated() {
            return false;
        }
        if self.insecure && info.is_secure {
            return false;
        }
        if let Some(before) = self.checked_before {
            if info.checked_at >= before {
                return false;
            }
        }
        true
    }
}

pub struct VersionStorage {
    path: PathBuf,
    format: StorageFormat,
    store: RwLock<VersionStore>,
}

impl VersionStorage {
    /// Open the store at `path`, inferring the format from its extension
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        Self::new(path, StorageFormat::from_path(path))
    }

    /// Open the store at `path`; a missing file starts an empty store
    pub fn new(path: &Path, format: StorageFormat) -> Result<Self, StorageError> {
        let store = read_store(path, format)?;
        info!(
            "Version storage opened at {:?} ({} records)",
            path,
            store.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            format,
            store: RwLock::new(store),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> StorageFormat {
        self.format
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(BACKUP_DIR_NAME)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, VersionStore>, StorageError> {
        self.store.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, VersionStore>, StorageError> {
        self.store.write().map_err(|_| StorageError::LockPoisoned)
    }

    fn persist(&self, store: &mut VersionStore) -> Result<(), StorageError> {
        store.last_updated = Utc::now();
        let contents = self.format.serialize(store)?;
        write_atomic(&self.path, &contents).map_err(|e| StorageError::io(&self.path, e))?;
        debug!("Saved {} records to {:?}", store.len(), self.path);
        Ok(())
    }

    /// Apply `f` and persist; the in-memory store is rolled back if saving fails
    fn mutate<T>(&self, f: impl FnOnce(&mut VersionStore) -> T) -> Result<T, StorageError> {
        let mut store = self.write()?;
        let previous = store.clone();
        let output = f(&mut store);
        if let Err(e) = self.persist(&mut store) {
            *store = previous;
            return Err(e);
        }
        Ok(output)
    }

    /// Re-read the file, replacing the in-memory store
    pub fn load(&self) -> Result<(), StorageError> {
        let loaded = read_store(&self.path, self.format)?;
        *self.write()? = loaded;
        Ok(())
    }

    /// Write the in-memory store to disk
    pub fn save(&self) -> Result<(), StorageError> {
        let mut store = self.write()?;
        self.persist(&mut store)
    }

    pub fn snapshot(&self) -> Result<VersionStore, StorageError> {
        Ok(self.read()?.clone())
    }

    pub fn get_version_info(&self, name: &str) -> Result<Option<VersionInfo>, StorageError> {
        Ok(self.read()?.get(name).cloned())
    }

    /// Store `info` in the map for its kind and persist synchronously
    pub fn set_version_info(&self, info: VersionInfo) -> Result<(), StorageError> {
        debug!("Storing {} {} as {}", info.kind.as_str(), info.name, info.current_version);
        self.mutate(|store| store.insert(info))
    }

    /// Read-modify-write a record under the write lock
    pub fn modify_version_info<F>(&self, name: &str, f: F) -> Result<VersionInfo, StorageError>
    where
        F: FnOnce(&mut VersionInfo),
    {
        let mut store = self.write()?;
        let previous = store.clone();

        let mut info = store
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        f(&mut info);
        info.normalize();
        store.insert(info.clone());

        if let Err(e) = self.persist(&mut store) {
            *store = previous;
            return Err(e);
        }
        Ok(info)
    }

    pub fn remove_version_info(&self, name: &str) -> Result<Option<VersionInfo>, StorageError> {
        let removed = self.mutate(|store| store.remove(name))?;
        if removed.is_some() {
            info!("Removed version record {}", name);
        }
        Ok(removed)
    }

    pub fn all_version_infos(&self) -> Result<Vec<VersionInfo>, StorageError> {
        Ok(self.read()?.iter().cloned().collect())
    }

    pub fn query(&self, query: &VersionQuery) -> Result<Vec<VersionInfo>, StorageError> {
        Ok(self
            .read()?
            .iter()
            .filter(|info| query.matches(info))
            .cloned()
            .collect())
    }

    pub fn update_policy(&self) -> Result<UpdatePolicy, StorageError> {
        Ok(self.read()?.update_policy.clone())
    }

    pub fn set_update_policy(&self, policy: UpdatePolicy) -> Result<(), StorageError> {
        self.mutate(|store| store.update_policy = policy)
    }

    /// Copy the store file to `backups/versions_backup_<YYYYMMDD_HHMMSS>.<ext>`
    pub fn backup(&self) -> Result<PathBuf, StorageError> {
        let store = self.read()?;
        let backup_dir = self.backup_dir();
        fs::create_dir_all(&backup_dir).map_err(|e| StorageError::io(&backup_dir, e))?;

        let backup_path = next_backup_path(&backup_dir, self.format);
        if self.path.exists() {
            fs::copy(&self.path, &backup_path).map_err(|e| StorageError::io(&backup_path, e))?;
        } else {
            // Nothing saved yet: back up what is in memory
            let contents = self.format.serialize(&store)?;
            write_atomic(&backup_path, &contents).map_err(|e| StorageError::io(&backup_path, e))?;
        }

        info!("Backed up version store to {:?}", backup_path);
        Ok(backup_path)
    }

    /// Backup files, oldest first
    pub fn list_backups(&self) -> Result<Vec<PathBuf>, StorageError> {
        let backup_dir = self.backup_dir();
        let entries = match fs::read_dir(&backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&backup_dir, e)),
        };

        let mut backups: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("versions_backup_"))
            })
            .collect();
        backups.sort();
        Ok(backups)
    }

    /// Replace the live file with a backup and reload it
    pub fn restore(&self, backup_path: &Path) -> Result<(), StorageError> {
        if !backup_path.is_file() {
            return Err(StorageError::BackupNotFound(backup_path.to_path_buf()));
        }

        let contents = fs::read(backup_path).map_err(|e| StorageError::io(backup_path, e))?;
        let restored = StorageFormat::from_path(backup_path).deserialize(&contents)?;

        let mut store = self.write()?;
        let live_contents = self.format.serialize(&restored)?;
        write_atomic(&self.path, &live_contents).map_err(|e| StorageError::io(&self.path, e))?;
        *store = restored;

        warn!("Restored version store from {:?}", backup_path);
        Ok(())
    }
}

fn read_store(path: &Path, format: StorageFormat) -> Result<VersionStore, StorageError> {
    match fs::read(path) {
        Ok(contents) => {
            let mut store = format.deserialize(&contents)?;
            for kind in [
                VersionKind::Language,
                VersionKind::Framework,
                VersionKind::Package,
            ] {
                for info in store.map_mut(kind).values_mut() {
                    info.kind = kind;
                    info.normalize();
                }
            }
            Ok(store)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No version store at {:?}, starting empty", path);
            Ok(VersionStore::default())
        }
        Err(e) => Err(StorageError::io(path, e)),
    }
}

fn next_backup_path(backup_dir: &Path, format: StorageFormat) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let extension = format.extension();

    let mut candidate = backup_dir.join(format!("versions_backup_{}.{}", stamp, extension));
    let mut suffix = 1;
    while candidate.exists() {
        candidate = backup_dir.join(format!(
            "versions_backup_{}_{}.{}",
            stamp, suffix, extension
        ));
        suffix += 1;
    }
    candidate
}
