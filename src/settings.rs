//! Settings Store
//!
//! Named configuration values persisted through an ordinary manager.
//! Each value is kept as a generic document and converted on access.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, Result};
use crate::manager::{Manager, SaveStats};
use crate::record::{Document, Record};

/// One named setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingValue {
    pub name: String,
    pub value: Document,
}

impl Record for SettingValue {
    fn record_key(&self) -> String {
        self.name.clone()
    }
}

/// Typed access to a `Manager<SettingValue>`
#[derive(Clone)]
pub struct Settings {
    manager: Arc<Manager<SettingValue>>,
}

impl Settings {
    pub fn new(manager: Arc<Manager<SettingValue>>) -> Self {
        Self { manager }
    }

    /// Underlying manager, e.g. for registration with a sequencer
    pub fn manager(&self) -> &Arc<Manager<SettingValue>> {
        &self.manager
    }

    /// Read a setting as `V`
    ///
    /// Returns `Ok(None)` when the setting does not exist and an error when
    /// the stored value does not fit `V`.
    pub fn value<V: DeserializeOwned>(&self, name: &str) -> Result<Option<V>> {
        let Some(setting) = self.manager.get(name)? else {
            return Ok(None);
        };
        V::deserialize(&setting.value)
            .map(Some)
            .map_err(|e| AtlasError::Decode {
                key: name.to_string(),
                reason: e.to_string(),
                document: Box::new(setting.value),
            })
    }

    /// Set a setting, replacing any previous value
    pub fn set_value<V: Serialize>(&self, name: &str, value: V) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| AtlasError::Encode {
            key: name.to_string(),
            reason: e.to_string(),
        })?;
        self.manager.put(
            name,
            SettingValue {
                name: name.to_string(),
                value,
            },
        );
        Ok(())
    }

    /// Set a setting only if it is not known yet (hot or stored)
    ///
    /// Returns whether the default was applied.
    pub fn set_default<V: Serialize>(&self, name: &str, value: V) -> Result<bool> {
        if self.manager.contains_key(name) {
            return Ok(false);
        }
        self.set_value(name, value)?;
        Ok(true)
    }

    pub fn save(&self) -> Result<SaveStats> {
        self.manager.save()
    }
}
