use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use gigi_llm::{DEFAULT_OPENAI_MODEL, ProviderConfig};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::chat::DeliveryConfig;
use crate::chat::controller::{
    DEFAULT_HISTORY_WINDOW, DEFAULT_REQUEST_TIMEOUT, DEFAULT_REVEAL_INTERVAL,
};

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u64 = 2048;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Gigi, a helpful and concise AI assistant. \
Provide clear, accurate, and well-formatted responses. Keep answers focused and to the point \
unless specifically asked for detailed explanations. Use markdown formatting when appropriate: \
**bold** for emphasis, `code` for inline code, ```language for code blocks, and bullet points \
for lists.";
pub const SETTINGS_DIRECTORY_NAME: &str = "gigi";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const CONVERSATIONS_FILE_NAME: &str = "conversations.json";
pub const ENV_PREFIX: &str = "GIGI_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub model_name: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub system_prompt: String,
    pub reveal_interval_ms: u64,
    pub request_timeout_secs: u64,
    pub history_window: usize,
    /// Falls back to `<config dir>/gigi/conversations.json` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversations_path: Option<PathBuf>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            provider_id: DEFAULT_PROVIDER_ID.to_string(),
            api_key: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model_name: DEFAULT_OPENAI_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            reveal_interval_ms: DEFAULT_REVEAL_INTERVAL.as_millis() as u64,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            history_window: DEFAULT_HISTORY_WINDOW,
            conversations_path: None,
        }
    }
}

impl ChatSettings {
    /// Provider config for these settings, `None` until an API key is set.
    pub fn to_provider_config(&self) -> Option<ProviderConfig> {
        if !self.has_api_key() {
            return None;
        }

        Some(ProviderConfig::new(
            &self.provider_id,
            &self.api_key,
            &self.endpoint,
        ))
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Returns the request and pacing parameters for the stream controller.
    pub fn delivery_config(&self) -> DeliveryConfig {
        let mut config = DeliveryConfig::new(self.model_name.clone())
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
            .with_reveal_interval(Duration::from_millis(self.reveal_interval_ms))
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_history_window(self.history_window);
        if !self.system_prompt.trim().is_empty() {
            config = config.with_system_prompt(self.system_prompt.clone());
        }
        config
    }

    /// Returns the configured conversation file, or the one beside the settings file.
    pub fn conversations_path(&self) -> PathBuf {
        self.conversations_path
            .clone()
            .unwrap_or_else(|| SettingsStore::default_config_dir().join(CONVERSATIONS_FILE_NAME))
    }

    /// Trims text fields, falling back to defaults when blank, and clamps numeric ones.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();

        self.provider_id = normalized_or(&self.provider_id, &defaults.provider_id);
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = normalized_or(&self.endpoint, &defaults.endpoint);
        self.model_name = normalized_or(&self.model_name, &defaults.model_name);
        if !self.temperature.is_finite() {
            self.temperature = defaults.temperature;
        }
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.max_tokens = self.max_tokens.max(1);
        self.reveal_interval_ms = self.reveal_interval_ms.max(1);
        self.request_timeout_secs = self.request_timeout_secs.max(1);
        self.history_window = self.history_window.max(1);
        self.conversations_path = self
            .conversations_path
            .filter(|path| !path.as_os_str().is_empty());

        self
    }
}

fn normalized_or(value: &str, fallback: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ChatSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".gigi"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    /// Creates a store over the default settings file.
    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.load_full()
    }

    /// Normalizes and persists `settings`, then swaps them in.
    pub fn update(&self, settings: ChatSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Defaults, then the JSON file, then `GIGI_*` environment variables.
    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(ChatSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    fn load_from_disk(path: &Path) -> ChatSettings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
        }

        match Self::figment(path).extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                ChatSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ChatSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!("saved settings to {:?}", self.config_path);
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let settings = store.settings();
        assert_eq!(settings.provider_id, DEFAULT_PROVIDER_ID);
        assert_eq!(settings.reveal_interval_ms, 40);
        assert_eq!(settings.history_window, 20);
        assert!(settings.to_provider_config().is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"api_key": "  sk-test  ", "model_name": "gpt-4o", "reveal_interval_ms": 0}"#,
        )
        .unwrap();

        let settings = SettingsStore::new(path).settings();
        assert_eq!(settings.model_name, "gpt-4o");
        assert_eq!(settings.reveal_interval_ms, 1);
        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);

        let provider = settings.to_provider_config().unwrap();
        assert_eq!(provider.api_key, "sk-test");
        assert_eq!(provider.base_url, DEFAULT_ENDPOINT);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(*SettingsStore::new(path).settings(), ChatSettings::default());
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone());

        store
            .update(ChatSettings {
                api_key: "sk-live".into(),
                model_name: "  ".into(),
                temperature: 9.0,
                ..ChatSettings::default()
            })
            .unwrap();

        assert_eq!(store.settings().model_name, DEFAULT_OPENAI_MODEL);
        assert_eq!(store.settings().temperature, 2.0);
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = SettingsStore::new(path).settings();
        assert_eq!(reloaded.api_key, "sk-live");
        assert_eq!(reloaded.temperature, 2.0);
    }

    #[test]
    fn delivery_config_carries_request_and_pacing_values() {
        let settings = ChatSettings {
            reveal_interval_ms: 15,
            request_timeout_secs: 9,
            history_window: 4,
            ..ChatSettings::default()
        };
        let config = settings.delivery_config();
        assert_eq!(config.model_id, DEFAULT_OPENAI_MODEL);
        assert_eq!(config.reveal_interval, Duration::from_millis(15));
        assert_eq!(config.request_timeout, Duration::from_secs(9));
        assert_eq!(config.history_window, 4);
        assert_eq!(config.max_tokens, Some(DEFAULT_MAX_TOKENS));
        assert_eq!(config.system_prompt.as_deref(), Some(DEFAULT_SYSTEM_PROMPT));
    }

    #[test]
    fn explicit_conversations_path_wins() {
        let settings = ChatSettings {
            conversations_path: Some(PathBuf::from("/tmp/gigi/chats.json")),
            ..ChatSettings::default()
        };
        assert_eq!(
            settings.conversations_path(),
            PathBuf::from("/tmp/gigi/chats.json")
        );
        assert!(
            ChatSettings::default()
                .conversations_path()
                .ends_with("conversations.json")
        );
    }
}
