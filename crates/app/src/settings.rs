use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use magpie_chat::{Assistant, AssistantSettings};
use magpie_llm::ProviderConfig;
use magpie_storage::AssistantId;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const SETTINGS_DIRECTORY_NAME: &str = "magpie";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
const DATABASE_FILE_NAME: &str = "conversations.db";
const EXPORT_DIRECTORY_NAME: &str = "exports";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub default_model: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: default_endpoint(),
            default_model: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantDefaults {
    /// Stable assistant identity; minted on first run so topics stay
    /// attached to the same assistant across restarts.
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_assistant_name")]
    pub name: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_context_count")]
    pub context_count: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default = "default_stream_output")]
    pub stream_output: bool,
}

impl Default for AssistantDefaults {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: default_assistant_name(),
            prompt: String::new(),
            context_count: default_context_count(),
            temperature: default_temperature(),
            max_tokens: None,
            stream_output: default_stream_output(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub assistant: AssistantDefaults,
    /// Sqlite database location; empty selects the default path under the
    /// settings directory.
    #[serde(default)]
    pub database_path: String,
    /// Directory for exported topic images; empty selects the default path.
    #[serde(default)]
    pub export_directory: String,
}

impl Settings {
    pub fn to_provider_config(&self) -> Option<ProviderConfig> {
        if self.provider.api_key.trim().is_empty() {
            return None;
        }

        Some(ProviderConfig::new(
            &self.provider.provider_id,
            &self.provider.api_key,
            &self.provider.endpoint,
            self.provider.default_model.clone(),
        ))
    }

    pub fn to_assistant(&self) -> Assistant {
        let mut assistant = Assistant::new(&self.assistant.name, &self.assistant.prompt)
            .with_settings(AssistantSettings {
                context_count: self.assistant.context_count,
                temperature: self.assistant.temperature,
                max_tokens: self.assistant.max_tokens,
                stream_output: self.assistant.stream_output,
                ..AssistantSettings::default()
            });
        if let Ok(parsed) = AssistantId::parse(self.assistant.id.trim()) {
            assistant.id = parsed;
        }
        if let Some(model) = &self.provider.default_model {
            assistant = assistant.with_default_model(model.clone());
        }
        assistant
    }

    pub fn database_path(&self) -> PathBuf {
        if self.database_path.trim().is_empty() {
            SettingsStore::default_config_dir().join(DATABASE_FILE_NAME)
        } else {
            PathBuf::from(self.database_path.trim())
        }
    }

    pub fn export_directory(&self) -> PathBuf {
        if self.export_directory.trim().is_empty() {
            SettingsStore::default_config_dir().join(EXPORT_DIRECTORY_NAME)
        } else {
            PathBuf::from(self.export_directory.trim())
        }
    }

    pub fn normalized(mut self) -> Self {
        self.provider.provider_id = if self.provider.provider_id.trim().is_empty() {
            default_provider_id()
        } else {
            self.provider.provider_id.trim().to_string()
        };
        self.provider.api_key = self.provider.api_key.trim().to_string();
        self.provider.endpoint = if self.provider.endpoint.trim().is_empty() {
            default_endpoint()
        } else {
            self.provider.endpoint.trim().to_string()
        };
        self.provider.default_model = self
            .provider
            .default_model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .map(str::to_string);

        if self.assistant.name.trim().is_empty() {
            self.assistant.name = default_assistant_name();
        }
        if self.assistant.context_count == 0 {
            self.assistant.context_count = default_context_count();
        }

        self
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<Settings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".magpie"))
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

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &PathBuf) -> Settings {
        if !path.exists() {
            tracing::info!("settings file not found at {:?}, using defaults", path);
            return Settings::default().normalized();
        }

        let figment =
            Figment::from(Serialized::defaults(Settings::default())).merge(Json::file(path));

        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    "failed to parse settings from {:?}: {}. using defaults",
                    path,
                    error
                );
                Settings::default().normalized()
            }
        }
    }

    fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
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

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_assistant_name() -> String {
    "Assistant".to_string()
}

fn default_context_count() -> usize {
    20
}

fn default_temperature() -> f64 {
    0.7
}

fn default_stream_output() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_api_key_yields_no_provider_config() {
        let settings = Settings::default();
        assert!(settings.to_provider_config().is_none());
    }

    #[test]
    fn normalization_restores_required_defaults() {
        let settings = Settings {
            provider: ProviderSettings {
                provider_id: "   ".to_string(),
                api_key: " key ".to_string(),
                endpoint: String::new(),
                default_model: Some("  ".to_string()),
            },
            assistant: AssistantDefaults {
                name: String::new(),
                context_count: 0,
                ..AssistantDefaults::default()
            },
            ..Settings::default()
        }
        .normalized();

        assert_eq!(settings.provider.provider_id, DEFAULT_PROVIDER_ID);
        assert_eq!(settings.provider.api_key, "key");
        assert_eq!(settings.provider.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.provider.default_model, None);
        assert_eq!(settings.assistant.name, "Assistant");
        assert_eq!(settings.assistant.context_count, 20);
    }

    #[test]
    fn assistant_inherits_configured_behavior() {
        let mut settings = Settings::default();
        settings.provider.default_model = Some("gpt-4o".to_string());
        settings.assistant.context_count = 8;
        settings.assistant.temperature = 0.2;

        let assistant = settings.to_assistant();
        assert_eq!(assistant.default_model.as_deref(), Some("gpt-4o"));
        assert_eq!(assistant.settings.context_count, 8);
        assert_eq!(assistant.settings.temperature, 0.2);
    }
}
