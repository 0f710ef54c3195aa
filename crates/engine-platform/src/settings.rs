//! Key/value settings persistence consumed by engine callers.
//!
//! The engine itself never reads settings; callers use this store to remember
//! the last endpoint and preset selections between launches.

use std::{
    collections::HashMap,
    fs, io,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use thiserror::Error;

use crate::identity::write_atomically;

/// Key under which callers remember the last connected endpoint.
pub const LAST_ENDPOINT_KEY: &str = "last_endpoint";
/// Key under which callers remember the last preset selection.
pub const LAST_PRESET_KEY: &str = "last_preset";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("settings store unavailable: {0}")]
    Unavailable(String),
    #[error("settings store backend failure: {0}")]
    Backend(String),
}

/// Simple string get/put store.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError>;

    fn put(&self, key: &str, value: &str) -> Result<(), SettingsError>;

    fn remove(&self, key: &str) -> Result<(), SettingsError>;
}

#[derive(Clone, Default)]
pub struct InMemorySettingsStore {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl SettingsStore for InMemorySettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let data = self
            .data
            .read()
            .map_err(|_| SettingsError::Backend("poisoned lock".to_owned()))?;
        Ok(data.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SettingsError::Backend("poisoned lock".to_owned()))?;
        data.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SettingsError::Backend("poisoned lock".to_owned()))?;
        data.remove(key);
        Ok(())
    }
}

/// JSON-file-backed store; the whole document is rewritten atomically on
/// every mutation.
#[derive(Debug, Clone)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
}

impl JsonFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<HashMap<String, String>, SettingsError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => {
                return Err(SettingsError::Backend(format!(
                    "failed reading settings {}: {err}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_str(&raw).map_err(|err| {
            SettingsError::Backend(format!(
                "failed parsing settings {}: {err}",
                self.path.display()
            ))
        })
    }

    fn save(&self, data: &HashMap<String, String>) -> Result<(), SettingsError> {
        let encoded =
            serde_json::to_vec(data).map_err(|err| SettingsError::Backend(err.to_string()))?;
        write_atomically(&self.path, &encoded).map_err(SettingsError::Backend)
    }
}

impl SettingsStore for JsonFileSettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.load()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut data = self.load()?;
        data.insert(key.to_owned(), value.to_owned());
        self.save(&data)
    }

    fn remove(&self, key: &str) -> Result<(), SettingsError> {
        let mut data = self.load()?;
        if data.remove(key).is_some() {
            self.save(&data)?;
        }
        Ok(())
    }
}
