//! Local generation settings, persisted as JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use codechat_api::{ServerSettings, SettingsUpdate};
use codechat_core::GenerationParams;
use codechat_session::GenerationSettings;

/// Errors loading, saving or editing settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file could not be read or written.
    #[error("settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON.
    #[error("settings file {path} is invalid: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// `/set` named a key that does not exist.
    #[error("unknown setting '{0}' (use model, provider, temperature or max_tokens)")]
    UnknownKey(String),

    /// `/set` got a value that does not parse or is out of range.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Settings used for every outgoing message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSettings {
    #[serde(default = "LocalSettings::default_model")]
    pub model: String,
    #[serde(default = "LocalSettings::default_provider")]
    pub provider: String,
    #[serde(default = "LocalSettings::default_temperature")]
    pub temperature: f32,
    #[serde(default = "LocalSettings::default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            model: Self::default_model(),
            provider: Self::default_provider(),
            temperature: Self::default_temperature(),
            max_tokens: Self::default_max_tokens(),
        }
    }
}

impl LocalSettings {
    fn default_model() -> String {
        "gpt-4o-mini".to_string()
    }

    fn default_provider() -> String {
        "openai".to_string()
    }

    const fn default_temperature() -> f32 {
        0.7
    }

    const fn default_max_tokens() -> u32 {
        2048
    }

    /// Load settings from `path`. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(SettingsError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw).map_err(|source| SettingsError::Format {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write settings to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let io_err = |source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| SettingsError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }

    /// Take over the values the server reports.
    pub fn adopt(&mut self, server: &ServerSettings) {
        self.model.clone_from(&server.model);
        self.provider.clone_from(&server.provider);
        self.temperature = server.temperature;
        self.max_tokens = server.max_tokens;
    }

    /// Apply `/set <key> <value>`, returning the matching server update.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown keys or invalid values; the settings are
    /// left unchanged in that case.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<SettingsUpdate, SettingsError> {
        let mut update = SettingsUpdate::default();
        let key: &'static str = match key {
            "model" => {
                update.model = Some(value.to_string());
                "model"
            }
            "provider" => {
                update.provider = Some(value.to_string());
                "provider"
            }
            "temperature" => {
                let temperature: f32 =
                    value.parse().map_err(|_| SettingsError::InvalidValue {
                        key: "temperature",
                        reason: format!("'{value}' is not a number"),
                    })?;
                update.temperature = Some(temperature);
                "temperature"
            }
            "max_tokens" => {
                let max_tokens: u32 = value.parse().map_err(|_| SettingsError::InvalidValue {
                    key: "max_tokens",
                    reason: format!("'{value}' is not a whole number"),
                })?;
                update.max_tokens = Some(max_tokens);
                "max_tokens"
            }
            other => return Err(SettingsError::UnknownKey(other.to_string())),
        };

        update.validate().map_err(|e| SettingsError::InvalidValue {
            key,
            reason: e.to_string(),
        })?;

        if let Some(model) = &update.model {
            self.model.clone_from(model);
        }
        if let Some(provider) = &update.provider {
            self.provider.clone_from(provider);
        }
        if let Some(temperature) = update.temperature {
            self.temperature = temperature;
        }
        if let Some(max_tokens) = update.max_tokens {
            self.max_tokens = max_tokens;
        }
        Ok(update)
    }
}

impl GenerationSettings for LocalSettings {
    fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}
