use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;

pub const ALARMS_KEY: &str = "alarms";
pub const SNOOZES_KEY: &str = "alarm-snoozes";
pub const CUSTOM_SOUNDS_KEY: &str = "customSounds";
pub const VOLUME_KEY: &str = "alarmVolume";
pub const TIMER_STATE_KEY: &str = "timer-state";
pub const TIMER_RECENTS_KEY: &str = "timer-recents";
pub const STOPWATCH_KEY: &str = "stopwatch-state";
pub const SETTINGS_KEY: &str = "settings";
pub const WORLD_CLOCKS_KEY: &str = "worldClocks";

/// Flat key-value storage for JSON blobs, one blob per logical entity.
///
/// Writes are independent puts; there is no transaction spanning keys, so
/// readers must tolerate related blobs that disagree with each other.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("unable to create data directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            bail!("invalid storage key '{key}'");
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("unable to read {}", path.display()))
            }
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        fs::write(&path, format!("{value}\n"))
            .with_context(|| format!("unable to write {}", path.display()))
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("unable to remove {}", path.display()))
            }
        }
    }
}

/// Reads `key` and decodes it, substituting `T::default()` when the blob is
/// missing, unreadable or malformed. Corruption is logged, never returned.
pub fn load_or_default<T>(store: &dyn KeyValueStore, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    load_optional(store, key).unwrap_or_default()
}

pub fn load_optional<T>(store: &dyn KeyValueStore, key: &str) -> Option<T>
where
    T: DeserializeOwned,
{
    let text = match store.get(key) {
        Ok(Some(text)) => text,
        Ok(None) => return None,
        Err(err) => {
            log::warn!("unable to read '{key}', using defaults: {err:#}");
            return None;
        }
    };
    match serde_json::from_str::<T>(&text) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!(
                "discarding malformed '{key}' (line {}, column {}): {err}",
                err.line(),
                err.column()
            );
            None
        }
    }
}

/// Serialises `value` under `key`. Returns whether the write landed; the
/// failure itself is logged.
pub fn save<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> bool
where
    T: Serialize + ?Sized,
{
    let result = serde_json::to_string(value)
        .context("unable to serialise state")
        .and_then(|text| store.put(key, &text));
    match result {
        Ok(()) => true,
        Err(err) => {
            log::error!("failed to persist '{key}': {err:#}");
            false
        }
    }
}
