use super::kv::KeyValueStore;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

const PREFS_KEY: &str = "bagtag_prefs";

/// Operator preferences remembered across runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_camera_id: Option<String>,
    #[serde(default)]
    pub torch_preferred: bool,
}

pub struct PreferenceStore {
    kv: Arc<dyn KeyValueStore>,
}

impl PreferenceStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Load preferences; unreadable data falls back to defaults
    pub fn load(&self) -> Preferences {
        match self.kv.get(PREFS_KEY) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable preferences: {}", e);
                Preferences::default()
            }),
            Ok(None) => Preferences::default(),
            Err(e) => {
                warn!("Failed to read preferences: {}", e);
                Preferences::default()
            }
        }
    }

    pub fn save(&self, prefs: &Preferences) -> Result<(), StoreError> {
        let raw = serde_json::to_string(prefs).map_err(|e| StoreError::Corrupt {
            key: PREFS_KEY.to_string(),
            details: e.to_string(),
        })?;
        self.kv.set(PREFS_KEY, &raw)
    }

    pub fn update<F: FnOnce(&mut Preferences)>(&self, f: F) -> Result<(), StoreError> {
        let mut prefs = self.load();
        f(&mut prefs);
        self.save(&prefs)
    }
}
