use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::storage::PersistenceStore;

const SETTINGS_KEY: &str = "settings";

/// Generation parameters plus the active conversation, persisted in the
/// settings table independently of conversation records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default)]
    pub active_conversation_id: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
            active_conversation_id: None,
        }
    }
}

pub struct SettingsService;

impl SettingsService {
    pub async fn load(storage: &dyn PersistenceStore) -> Settings {
        match storage.get_setting(SETTINGS_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_default(),
            _ => Settings::default(),
        }
    }

    pub async fn save(storage: &dyn PersistenceStore, settings: &Settings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        storage.set_setting(SETTINGS_KEY, &json).await
    }
}
