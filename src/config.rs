use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{Result, SyncError};
use crate::utils::{normalize_url, socket_url_for};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_url: String,
    /// Empty means "same origin as `api_url`".
    pub socket_url: String,
    pub token: String,
    /// Resolved from `auth/me` when left empty.
    pub user_id: String,
    pub typing_debounce_ms: u64,
    pub typing_indicator_ms: u64,
    pub reconnect_min_ms: u64,
    pub reconnect_max_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".to_string(),
            socket_url: String::new(),
            token: String::new(),
            user_id: String::new(),
            typing_debounce_ms: 1000,
            typing_indicator_ms: 3000,
            reconnect_min_ms: 500,
            reconnect_max_ms: 30_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("chatsync.toml"))
    }

    /// Reads the default config file if there is one, then applies env overrides.
    pub fn load() -> Result<Self> {
        let from_file = match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        Ok(from_file.with_env())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str::<AppConfig>(&text)
            .map_err(|e| SyncError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self).map_err(|e| SyncError::Config(e.to_string()))?;
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::default_path()
            .ok_or_else(|| SyncError::Config("No config dir".into()))?;
        self.save_to(&path)
    }

    fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = var("CHATSYNC_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = var("CHATSYNC_SOCKET_URL") {
            self.socket_url = v;
        }
        if let Some(v) = var("CHATSYNC_TOKEN") {
            self.token = v;
        }
        if let Some(v) = var("CHATSYNC_USER_ID") {
            self.user_id = v;
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(SyncError::Config("api_url is not set".into()));
        }
        if self.token.trim().is_empty() {
            return Err(SyncError::Config(
                "token is not set (CHATSYNC_TOKEN or chatsync.toml)".into(),
            ));
        }
        Ok(())
    }

    pub fn api_url(&self) -> String {
        normalize_url(&self.api_url)
    }

    pub fn socket_url(&self) -> Result<Url> {
        if self.socket_url.trim().is_empty() {
            socket_url_for(&self.api_url)
        } else {
            Ok(Url::parse(&normalize_url(&self.socket_url))?)
        }
    }

    pub fn typing_debounce(&self) -> Duration {
        Duration::from_millis(self.typing_debounce_ms)
    }

    pub fn typing_indicator(&self) -> Duration {
        Duration::from_millis(self.typing_indicator_ms)
    }

    pub fn reconnect_min(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_ms.max(1))
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms.max(self.reconnect_min_ms).max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatsync.toml");
        fs::write(&path, "token = \"abc\"\ntyping_debounce_ms = 250\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.token, "abc");
        assert_eq!(config.typing_debounce(), Duration::from_millis(250));
        assert_eq!(config.typing_indicator(), Duration::from_millis(3000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chatsync.toml");
        let config = AppConfig {
            token: "t".into(),
            user_id: "u1".into(),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.user_id, "u1");
        assert_eq!(loaded.reconnect_max_ms, 30_000);
        assert_eq!(loaded.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatsync.toml");
        fs::write(&path, "token = ").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(SyncError::Config(_))));
    }

    #[test]
    fn env_overrides_file_values() {
        let config = AppConfig::default().with_overrides(|key| match key {
            "CHATSYNC_TOKEN" => Some("from-env".into()),
            "CHATSYNC_SOCKET_URL" => Some("ws://push.local:9000".into()),
            _ => None,
        });
        assert_eq!(config.token, "from-env");
        assert_eq!(config.socket_url().unwrap().as_str(), "ws://push.local:9000/");
    }

    #[test]
    fn missing_token_fails_validation() {
        assert!(matches!(AppConfig::default().validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn socket_url_defaults_to_api_origin() {
        let config = AppConfig::default();
        assert_eq!(config.socket_url().unwrap().as_str(), "ws://localhost:5000/");
    }
}
