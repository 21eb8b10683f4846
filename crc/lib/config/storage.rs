use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde_json::{Map, Value};

use super::CRC_ENV_PREFIX;
use crate::CrcResult;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A raw key/value store backing [`Config`](super::Config).
///
/// Stores hold values exactly as given. Typing and validation happen in `Config`.
pub trait Storage: Send + Sync {
    /// Returns the raw value of `key`, if one is set.
    fn get(&self, key: &str) -> Option<Value>;

    /// Persists `value` under `key`.
    fn set(&self, key: &str, value: Value) -> CrcResult<()>;

    /// Removes `key`.
    fn unset(&self, key: &str) -> CrcResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A store persisted as a flat JSON object, with `CRC_*` environment overrides on top.
///
/// The file is re-read on every access so edits made by another process are picked up.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    env: BTreeMap<String, Value>,
    lock: Mutex<()>,
}

/// A store that only lives in memory.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    values: Mutex<BTreeMap<String, Value>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl JsonFileStorage {
    /// Opens the store at `path`, capturing overrides from the process environment.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_env(path, std::env::vars())
    }

    /// Opens the store at `path` with overrides taken from `vars`.
    ///
    /// `CRC_DISK_SIZE=40` overrides the `disk-size` key.
    pub fn with_env(path: impl Into<PathBuf>, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let env = vars
            .into_iter()
            .filter_map(|(name, value)| {
                let key = name.strip_prefix(CRC_ENV_PREFIX)?;
                Some((key.to_lowercase().replace('_', "-"), Value::String(value)))
            })
            .collect();

        Self {
            path: path.into(),
            env,
            lock: Mutex::new(()),
        }
    }

    /// The file backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> CrcResult<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }

        Ok(serde_json::from_str(&contents)?)
    }

    fn write(&self, values: &Map<String, Value>) -> CrcResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Storage for JsonFileStorage {
    fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.env.get(key) {
            return Some(value.clone());
        }

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        match self.read() {
            Ok(mut values) => values.remove(key),
            Err(e) => {
                tracing::error!("cannot read config file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    fn set(&self, key: &str, value: Value) -> CrcResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut values = self.read()?;
        values.insert(key.to_string(), value);
        self.write(&values)
    }

    fn unset(&self, key: &str) -> CrcResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut values = self.read()?;
        if values.remove(key).is_some() {
            self.write(&values)?;
        }
        Ok(())
    }
}

impl Storage for InMemoryStorage {
    fn get(&self, key: &str) -> Option<Value> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> CrcResult<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn unset(&self, key: &str) -> CrcResult<()> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
