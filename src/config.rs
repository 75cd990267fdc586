use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

const DATA_DIR_ENV: &str = "CRM_MIGRATION_DATA_DIR";
const BIND_ENV: &str = "CRM_MIGRATION_BIND";
const DEFAULT_BIND: &str = "127.0.0.1:8787";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", default)]
pub struct SuggestionSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_seconds: u64,
    pub max_sample_values: usize,
}

impl Default for SuggestionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "CRM_MIGRATION_AI_KEY".to_string(),
            timeout_seconds: 20,
            max_sample_values: 5,
        }
    }
}

/// Runtime knobs persisted in the `settings` table under the `engine` key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", default)]
pub struct EngineSettings {
    /// Upper bound on records materialized per migration.
    pub record_batch_cap: usize,
    pub preview_chars: usize,
    pub type_sample_size: usize,
    pub worker_limit: usize,
    pub max_queue_size: usize,
    pub redact_preview: bool,
    pub suggestion: SuggestionSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            record_batch_cap: 1_000,
            preview_chars: 4_000,
            type_sample_size: 25,
            worker_limit: 4,
            max_queue_size: 256,
            redact_preview: true,
            suggestion: SuggestionSettings::default(),
        }
    }
}

/// Process-level configuration read from the environment at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub bind: SocketAddr,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, String> {
        let data_dir = std::env::var(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let raw_bind = std::env::var(BIND_ENV).unwrap_or_else(|_| DEFAULT_BIND.to_string());
        let bind = raw_bind
            .parse::<SocketAddr>()
            .map_err(|error| format!("invalid {} '{}': {}", BIND_ENV, raw_bind, error))?;
        Ok(Self { data_dir, bind })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("migrations.sqlite")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

pub fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
