use crate::error::ConfigError;
use crate::utils::normalize_url;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const CONFIG_FILE: &str = "zap-inbox.toml";

fn default_cooldown_ms() -> u64 {
    5000
}
fn default_poll_interval_secs() -> u64 {
    5
}
fn default_poll_max_interval_secs() -> u64 {
    60
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_message_limit() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub access_token: Option<String>,
    pub organization_id: String,
    /// Messaging instance used when a conversation does not name one.
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_max_interval_secs")]
    pub poll_max_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            access_token: None,
            organization_id: String::new(),
            instance_id: None,
            cooldown_ms: default_cooldown_ms(),
            poll_interval_secs: default_poll_interval_secs(),
            poll_max_interval_secs: default_poll_max_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            message_limit: default_message_limit(),
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join(CONFIG_FILE))
    }

    /// Loads the TOML file (a missing file means defaults), then applies
    /// `ZAP_INBOX_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path(),
        };
        let mut config = match path {
            Some(p) if p.exists() => toml::from_str::<Config>(&fs::read_to_string(&p)?)?,
            _ => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("ZAP_INBOX_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = var("ZAP_INBOX_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = var("ZAP_INBOX_ACCESS_TOKEN") {
            self.access_token = Some(v);
        }
        if let Some(v) = var("ZAP_INBOX_ORGANIZATION_ID") {
            self.organization_id = v;
        }
        if let Some(v) = var("ZAP_INBOX_INSTANCE_ID") {
            self.instance_id = Some(v);
        }
    }

    pub fn save(&self, path: Option<&Path>) -> Result<(), ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path().ok_or(ConfigError::NoConfigDir)?,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("base_url"));
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("api_key"));
        }
        if self.organization_id.trim().is_empty() {
            return Err(ConfigError::Missing("organization_id"));
        }
        self.base_url()?;
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Ok(Url::parse(&normalize_url(&self.base_url))?)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn poll_max_interval(&self) -> Duration {
        Duration::from_secs(self.poll_max_interval_secs).max(self.poll_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join(CONFIG_FILE))).unwrap();
        assert_eq!(config.cooldown_ms, 5000);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config = toml::from_str("base_url = \"x\"\napi_key = \"k\"\norganization_id = \"o\"").unwrap();
        assert_eq!(config.cooldown(), Duration::from_millis(5000));
        assert_eq!(config.message_limit, 200);
        assert!(config.instance_id.is_none());
    }

    #[test]
    fn save_then_load_round_trip_with_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = Config {
            base_url: "crm.backend.test".into(),
            api_key: "anon".into(),
            organization_id: "org-1".into(),
            ..Config::default()
        };
        config.save(Some(&path)).unwrap();

        let mut loaded: Config = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, config);
        loaded.apply_env(|k| (k == "ZAP_INBOX_ORGANIZATION_ID").then(|| "org-2".to_string()));
        assert_eq!(loaded.organization_id, "org-2");
    }

    #[test]
    fn validate_requires_connection_settings() {
        let mut config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("base_url"))));
        config.base_url = "crm.backend.test".into();
        config.api_key = "anon".into();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("organization_id"))));
        config.organization_id = "org-1".into();
        config.validate().unwrap();
        assert_eq!(config.base_url().unwrap().as_str(), "https://crm.backend.test/");
    }
}
