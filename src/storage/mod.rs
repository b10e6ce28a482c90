//! Persistent settings and credentials
//!
//! Device-scoped records in a pluggable backend. On load, stored fields
//! overwrite matching configuration fields; fields absent from storage
//! preserve whatever the caller configured. Serialization omits
//! default-valued fields so upgraded defaults propagate to existing
//! records.

pub mod settings;

#[cfg(test)]
mod tests;

pub use settings::{DeviceSettings, ProtocolSettings, StorageModel};

use crate::types::{DeviceConfiguration, Protocol};
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Settings/credentials store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Load persisted state from the backend.
    async fn load(&mut self) -> Result<(), StorageError>;

    /// Persist current state to the backend.
    async fn save(&mut self) -> Result<(), StorageError>;

    /// Settings for a device, created empty when unseen.
    fn get_settings(&mut self, config: &DeviceConfiguration) -> DeviceSettings;

    /// Write the configuration's credentials/passwords/ports through to
    /// the stored record. Only actual changes mark the store dirty.
    fn update_settings(&mut self, config: &DeviceConfiguration);

    /// True when unsaved changes exist.
    fn changed(&self) -> bool;

    /// Clear the dirty flag.
    fn mark_as_saved(&mut self);
}

/// Overlay stored settings onto a configuration before connect.
///
/// Storage wins for fields it carries; everything else keeps the
/// configured value.
pub fn apply_settings(config: &mut DeviceConfiguration, settings: &DeviceSettings) {
    if let Some(mac) = &settings.mac {
        config.device_info.mac = Some(mac.clone());
    }
    for protocol in Protocol::ALL {
        let stored = settings.protocol(protocol);
        if let Some(service) = config.service_mut(protocol) {
            if let Some(credentials) = &stored.credentials
                && let Ok(parsed) = credentials.parse()
            {
                service.credentials = Some(parsed);
            }
            if let Some(password) = &stored.password {
                service.password = Some(password.clone());
            }
            if let Some(port) = stored.port {
                service.port = port;
            }
        }
    }
    debug!("applied stored settings to {}", config.name);
}

/// Shared in-memory state for the built-in backends.
#[derive(Default)]
pub(crate) struct StorageState {
    model: StorageModel,
    changed: bool,
}

impl StorageState {
    fn entry_key(&self, config: &DeviceConfiguration) -> Option<String> {
        config
            .identifiers()
            .into_iter()
            .find(|id| self.model.devices.contains_key(*id))
            .map(str::to_string)
            .or_else(|| config.identifier().map(str::to_string))
    }

    fn get_settings(&mut self, config: &DeviceConfiguration) -> DeviceSettings {
        let Some(key) = self.entry_key(config) else {
            return DeviceSettings::default();
        };
        self.model.devices.entry(key).or_default().clone()
    }

    fn update_settings(&mut self, config: &DeviceConfiguration) {
        let Some(key) = self.entry_key(config) else {
            return;
        };
        let entry = self.model.devices.entry(key).or_default();
        let before = entry.clone();

        if entry.name.is_none() {
            entry.name = Some(config.name.clone());
        }
        if let Some(mac) = &config.device_info.mac {
            entry.mac = Some(mac.clone());
        }
        for service in config.services() {
            let slot = entry.protocol_mut(service.protocol);
            if let Some(credentials) = &service.credentials {
                slot.credentials = Some(credentials.to_string());
            }
            if let Some(password) = &service.password {
                slot.password = Some(password.clone());
            }
        }

        if *entry != before {
            self.changed = true;
        }
    }
}

/// Volatile in-memory backend, the default.
#[derive(Default)]
pub struct MemoryStorage {
    state: StorageState,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn save(&mut self) -> Result<(), StorageError> {
        self.state.changed = false;
        Ok(())
    }

    fn get_settings(&mut self, config: &DeviceConfiguration) -> DeviceSettings {
        self.state.get_settings(config)
    }

    fn update_settings(&mut self, config: &DeviceConfiguration) {
        self.state.update_settings(config);
    }

    fn changed(&self) -> bool {
        self.state.changed
    }

    fn mark_as_saved(&mut self) {
        self.state.changed = false;
    }
}

/// JSON file backend.
pub struct FileStorage {
    state: StorageState,
    path: std::path::PathBuf,
}

impl FileStorage {
    /// Create a store backed by a file (created on first save).
    #[must_use]
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            state: StorageState::default(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn load(&mut self) -> Result<(), StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                self.state.model = serde_json::from_slice(&bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                self.state.changed = false;
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&mut self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(&self.state.model)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        tokio::fs::write(&self.path, json).await?;
        self.state.changed = false;
        Ok(())
    }

    fn get_settings(&mut self, config: &DeviceConfiguration) -> DeviceSettings {
        self.state.get_settings(config)
    }

    fn update_settings(&mut self, config: &DeviceConfiguration) {
        self.state.update_settings(config);
    }

    fn changed(&self) -> bool {
        self.state.changed
    }

    fn mark_as_saved(&mut self) {
        self.state.changed = false;
    }
}
