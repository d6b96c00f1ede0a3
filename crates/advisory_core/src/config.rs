use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const ENV_BACKEND_URL: &str = "ADVISORY_BACKEND_URL";
pub const ENV_ANON_KEY: &str = "ADVISORY_ANON_KEY";
pub const ENV_DATA_DIR: &str = "ADVISORY_DATA_DIR";
pub const ENV_ACCESS_TOKEN: &str = "ADVISORY_ACCESS_TOKEN";

const APP_DIR_NAME: &str = "advisory-board";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub anon_key: Option<String>,
    /// Signed-in user's token; requests fall back to the anon key without it.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub realtime_url: Option<String>,
    #[serde(default = "default_auto_select_limit")]
    pub auto_select_limit: usize,
    #[serde(default = "default_persist")]
    pub persist: bool,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            backend_url: None,
            anon_key: None,
            access_token: None,
            realtime_url: None,
            auto_select_limit: default_auto_select_limit(),
            persist: default_persist(),
            log_filter: default_log_filter(),
        }
    }
}

fn default_auto_select_limit() -> usize {
    3
}

fn default_persist() -> bool {
    true
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl StoreConfig {
    /// Parses a JSON config; an empty string means defaults. Environment
    /// variables fill fields the JSON left unset.
    pub fn from_json(config_json: &str) -> Result<Self> {
        let mut config = if config_json.trim().is_empty() {
            Self::default()
        } else {
            serde_json::from_str(config_json).context("invalid store config JSON")?
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.backend_url.is_none() {
            self.backend_url = lookup(ENV_BACKEND_URL);
        }
        if self.anon_key.is_none() {
            self.anon_key = lookup(ENV_ANON_KEY);
        }
        if self.data_dir.is_none() {
            self.data_dir = lookup(ENV_DATA_DIR);
        }
        if self.access_token.is_none() {
            self.access_token = lookup(ENV_ACCESS_TOKEN);
        }
    }

    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(PathBuf::from(dir));
        }
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR_NAME))
            .context("no data directory available on this platform")
    }

    /// Realtime websocket URL, derived from the backend URL when not given.
    pub fn resolve_realtime_url(&self) -> Option<String> {
        if let Some(url) = &self.realtime_url {
            return Some(url.clone());
        }
        let backend = self.backend_url.as_deref()?.trim_end_matches('/');
        let socket_base = backend
            .strip_prefix("https://")
            .map(|rest| format!("wss://{rest}"))
            .or_else(|| backend.strip_prefix("http://").map(|rest| format!("ws://{rest}")))?;
        let key = self.anon_key.as_deref().unwrap_or_default();
        Some(format!(
            "{socket_base}/realtime/v1/websocket?apikey={key}&vsn=1.0.0"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let mut config: StoreConfig = serde_json::from_str("{}").unwrap();
        config.apply_env(|_| None);
        assert_eq!(config, StoreConfig::default());
        assert_eq!(config.auto_select_limit, 3);
        assert!(config.persist);
    }

    #[test]
    fn env_only_fills_missing_fields() {
        let mut config: StoreConfig =
            serde_json::from_str(r#"{"backendUrl":"https://json.example"}"#).unwrap();
        config.apply_env(|key| match key {
            ENV_BACKEND_URL => Some("https://env.example".to_string()),
            ENV_ANON_KEY => Some("anon-from-env".to_string()),
            _ => None,
        });

        assert_eq!(config.backend_url.as_deref(), Some("https://json.example"));
        assert_eq!(config.anon_key.as_deref(), Some("anon-from-env"));
    }

    #[test]
    fn realtime_url_derives_from_backend() {
        let config = StoreConfig {
            backend_url: Some("https://abc.example.co/".to_string()),
            anon_key: Some("k".to_string()),
            ..StoreConfig::default()
        };
        assert_eq!(
            config.resolve_realtime_url().as_deref(),
            Some("wss://abc.example.co/realtime/v1/websocket?apikey=k&vsn=1.0.0")
        );
    }

    #[test]
    fn explicit_data_dir_wins() {
        let config = StoreConfig {
            data_dir: Some("/tmp/advisory".to_string()),
            ..StoreConfig::default()
        };
        assert_eq!(config.resolve_data_dir().unwrap(), PathBuf::from("/tmp/advisory"));
    }
}
