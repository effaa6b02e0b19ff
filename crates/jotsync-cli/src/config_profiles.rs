//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use jotsync_core::config::{BackendConfig, ClientOptions};
use jotsync_core::util::normalize_text_option;
use serde::{Deserialize, Serialize};

const CONFIG_DIR_NAME: &str = "jotsync";
const CONFIG_FILE_NAME: &str = "cli-config.json";
const SESSIONS_DIR_NAME: &str = "sessions";
pub const ENV_PROFILE: &str = "JOTSYNC_PROFILE";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub options: ClientOptions,
}

const fn default_config_version() -> u32 {
    1
}

pub fn config_dir() -> Result<PathBuf, String> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME))
        .ok_or_else(|| "Failed to resolve CLI config directory".to_string())
}

pub fn default_config_path() -> Result<PathBuf, String> {
    config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}

/// Where the signed-in session for `profile_name` is persisted.
pub fn session_path(profile_name: &str) -> Result<PathBuf, String> {
    config_dir().map(|dir| session_path_in(&dir, profile_name))
}

pub fn session_path_in(dir: &Path, profile_name: &str) -> PathBuf {
    let file_name = profile_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    dir.join(SESSIONS_DIR_NAME).join(format!("{file_name}.json"))
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path()?)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path()?;
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    /// Explicit name, then `JOTSYNC_PROFILE`, then the active profile, then `default`.
    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        self.resolve_profile_name_with(explicit, std::env::var(ENV_PROFILE).ok().as_deref())
    }

    fn resolve_profile_name_with(&self, explicit: Option<&str>, env: Option<&str>) -> String {
        normalize_profile_name(explicit)
            .or_else(|| normalize_profile_name(env))
            .or_else(|| normalize_profile_name(self.active_profile.as_deref()))
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize();
        }
    }
}

impl CliProfile {
    fn normalize(&mut self) {
        let backend = &mut self.backend;
        backend.manifest_url = normalize_text_option(backend.manifest_url.take());
        backend.auth_url = normalize_text_option(backend.auth_url.take());
        backend.api_key = normalize_text_option(backend.api_key.take());
        backend.graphql_url = normalize_text_option(backend.graphql_url.take());
        backend.storage_url = normalize_text_option(backend.storage_url.take());
        self.options.image_workers = self.options.image_workers.max(1);
        self.options.storage_prefix = self.options.storage_prefix.trim().trim_matches('/').to_string();
    }
}
