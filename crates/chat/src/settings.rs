use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use ragchat_api::ApiConfig;
use ragchat_store::ChatId;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::chat::StreamTimeouts;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";
pub const SETTINGS_DIRECTORY_NAME: &str = "ragchat";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "RAGCHAT_";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_OPEN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CHUNK_TIMEOUT_SECS: u64 = 120;

/// Connection and chat selection for the terminal client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub tenant_id: String,
    /// Chat (agent configuration) whose sessions the client works with.
    #[serde(default)]
    pub chat_id: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_token: String::new(),
            tenant_id: String::new(),
            chat_id: String::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            open_timeout_secs: DEFAULT_OPEN_TIMEOUT_SECS,
            chunk_timeout_secs: DEFAULT_CHUNK_TIMEOUT_SECS,
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.api_base_url = if self.api_base_url.trim().is_empty() {
            default_api_base_url()
        } else {
            self.api_base_url.trim().trim_end_matches('/').to_string()
        };
        self.api_token = self.api_token.trim().to_string();
        self.tenant_id = self.tenant_id.trim().to_string();
        self.chat_id = self.chat_id.trim().to_string();

        // Zero would make every wait expire immediately.
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT_SECS;
        }
        if self.open_timeout_secs == 0 {
            self.open_timeout_secs = DEFAULT_OPEN_TIMEOUT_SECS;
        }
        if self.chunk_timeout_secs == 0 {
            self.chunk_timeout_secs = DEFAULT_CHUNK_TIMEOUT_SECS;
        }

        self
    }

    pub fn to_api_config(&self) -> ApiConfig {
        ApiConfig::new(&self.api_base_url)
            .with_token(&self.api_token)
            .with_tenant(&self.tenant_id)
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs))
    }

    pub fn stream_timeouts(&self) -> StreamTimeouts {
        StreamTimeouts {
            open: Duration::from_secs(self.open_timeout_secs),
            chunk: Duration::from_secs(self.chunk_timeout_secs),
        }
    }

    /// The configured chat, or `None` while it is unset.
    pub fn chat_id(&self) -> Option<ChatId> {
        ChatId::parse(&self.chat_id).ok()
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ClientSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".ragchat"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_layers(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ClientSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    /// Defaults, then the JSON file if present, then `RAGCHAT_*` variables.
    fn load_layers(path: &Path) -> ClientSettings {
        let mut figment = Figment::from(Serialized::defaults(ClientSettings::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        } else {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                ClientSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ClientSettings) -> Result<(), SettingsError> {
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

        tracing::info!(path = %self.config_path.display(), "saved settings");
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

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_open_timeout_secs() -> u64 {
    DEFAULT_OPEN_TIMEOUT_SECS
}

fn default_chunk_timeout_secs() -> u64 {
    DEFAULT_CHUNK_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_trims_and_restores_defaults() {
        let settings = ClientSettings {
            api_base_url: "  https://rag.example.com/api/  ".into(),
            api_token: " token ".into(),
            tenant_id: "\ttenant-1\n".into(),
            chat_id: "   ".into(),
            request_timeout_secs: 0,
            open_timeout_secs: 5,
            chunk_timeout_secs: 0,
        }
        .normalized();

        assert_eq!(settings.api_base_url, "https://rag.example.com/api");
        assert_eq!(settings.api_token, "token");
        assert_eq!(settings.tenant_id, "tenant-1");
        assert_eq!(settings.chat_id(), None);
        assert_eq!(settings.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(settings.open_timeout_secs, 5);
        assert_eq!(settings.chunk_timeout_secs, DEFAULT_CHUNK_TIMEOUT_SECS);

        let blank = ClientSettings {
            api_base_url: " ".into(),
            ..ClientSettings::default()
        }
        .normalized();
        assert_eq!(blank.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn blank_credentials_are_not_sent() {
        let config = ClientSettings::default().to_api_config();
        assert_eq!(config.api_token, None);
        assert_eq!(config.tenant_id, None);
        assert_eq!(config.base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("missing.json"));
        assert_eq!(store.settings().chat_id, "");
        assert_eq!(store.settings().chunk_timeout_secs, DEFAULT_CHUNK_TIMEOUT_SECS);
    }

    #[test]
    fn partial_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, r#"{ "chat_id": " chat-9 ", "chunk_timeout_secs": 15 }"#).unwrap();

        let settings = SettingsStore::new(path).settings();
        assert_eq!(settings.chat_id(), Some(ChatId::new("chat-9")));
        assert_eq!(settings.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(
            settings.stream_timeouts(),
            StreamTimeouts {
                open: Duration::from_secs(DEFAULT_OPEN_TIMEOUT_SECS),
                chunk: Duration::from_secs(15),
            }
        );
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(*SettingsStore::new(path).settings(), ClientSettings::default());
    }

    #[test]
    fn update_persists_atomically_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE_NAME);
        let store = SettingsStore::new(path.clone());

        let mut settings = (*store.settings()).clone();
        settings.chat_id = "chat-1".into();
        settings.tenant_id = " acme ".into();
        store.update(settings).unwrap();

        assert_eq!(store.settings().tenant_id, "acme");
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = SettingsStore::new(path);
        assert_eq!(reloaded.settings().chat_id, "chat-1");
        assert_eq!(reloaded.settings().tenant_id, "acme");
    }
}
