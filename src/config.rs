//! Layered configuration (spec §6.2) — on-disk `config.toml` plus an
//! in-process per-request override, resolved request > user > server (spec
//! §9 Open Question 2).
//!
//! Grounded on the teacher's `Config::load`/`save`/`config_paths` search
//! path and `ObservabilityConfig`, kept verbatim; the provider/library
//! settings are new.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::ProviderId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub server: ServerSettings,
    #[serde(default)]
    pub users: HashMap<String, UserSettings>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerSettings::default(),
            users: HashMap::new(),
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub data_dir: PathBuf,
    pub log_level: String,
    pub suppress_connection_errors: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            data_dir: base.join("renamarr"),
            log_level: "info".to_string(),
            suppress_connection_errors: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,
    pub metrics_port: Option<u16>,
    pub loki_enabled: bool,
    pub loki_url: String,
    pub loki_labels: HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = HashMap::new();
        labels.insert("app".to_string(), "renamarr".to_string());
        Self {
            metrics_enabled: true,
            metrics_port: None,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

/// Server-wide provider credentials and the configured library roots — the
/// bottom layer of the precedence chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub tmdb_api_key: Option<String>,
    pub anilist_api_key: Option<String>,
    pub tvdb_v4_api_key: Option<String>,
    pub tvdb_v4_user_pin: Option<String>,
    pub anidb_username: Option<String>,
    pub anidb_password: Option<String>,
    pub anidb_client_name: Option<String>,
    pub anidb_client_version: Option<String>,
    pub libraries: Vec<LibraryRoot>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            tmdb_api_key: None,
            anilist_api_key: None,
            tvdb_v4_api_key: None,
            tvdb_v4_user_pin: None,
            anidb_username: None,
            anidb_password: None,
            anidb_client_name: None,
            anidb_client_version: None,
            libraries: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryRoot {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFolder {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientOs {
    Windows,
    Mac,
    Linux,
}

impl From<ClientOs> for crate::services::render::TargetOs {
    fn from(os: ClientOs) -> Self {
        match os {
            ClientOs::Windows => Self::Windows,
            ClientOs::Mac => Self::MacOs,
            ClientOs::Linux => Self::Linux,
        }
    }
}

/// Per-user overrides of provider credentials and naming/output behavior
/// (spec §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub tmdb_api_key: Option<String>,
    pub anilist_api_key: Option<String>,
    pub tvdb_v4_api_key: Option<String>,
    pub tvdb_v4_user_pin: Option<String>,
    pub anidb_username: Option<String>,
    pub anidb_password: Option<String>,
    pub anidb_client_name: Option<String>,
    pub anidb_client_version: Option<String>,

    pub metadata_provider_order: Vec<ProviderId>,
    pub default_meta_provider: Option<ProviderId>,
    pub scan_input_path: Option<PathBuf>,
    pub scan_output_path: Option<PathBuf>,
    pub rename_template: Option<String>,
    pub client_os: Option<ClientOs>,
    pub enable_folder_watch: bool,
    pub delete_hardlinks_on_unapprove: bool,
    pub output_folders: Vec<OutputFolder>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            tmdb_api_key: None,
            anilist_api_key: None,
            tvdb_v4_api_key: None,
            tvdb_v4_user_pin: None,
            anidb_username: None,
            anidb_password: None,
            anidb_client_name: None,
            anidb_client_version: None,
            metadata_provider_order: vec![
                ProviderId::Anidb,
                ProviderId::Anilist,
                ProviderId::Tvdb,
                ProviderId::Tmdb,
            ],
            default_meta_provider: None,
            scan_input_path: None,
            scan_output_path: None,
            rename_template: None,
            client_os: None,
            enable_folder_watch: false,
            // Defaults to true: a user who never set this opts into the
            // safer "fully reversible" unapprove behavior (spec §4.10,
            // §9 Open Question 3).
            delete_hardlinks_on_unapprove: true,
            output_folders: Vec::new(),
        }
    }
}

/// Resolved provider credentials after applying the precedence chain (spec
/// §9 "request override > per-user setting > server default > env").
#[derive(Debug, Clone, Default)]
pub struct ResolvedProviderSettings {
    pub tmdb_api_key: Option<String>,
    pub anilist_api_key: Option<String>,
    pub tvdb_v4_api_key: Option<String>,
    pub tvdb_v4_user_pin: Option<String>,
    pub anidb_username: Option<String>,
    pub anidb_password: Option<String>,
    pub anidb_client_name: Option<String>,
    pub anidb_client_version: Option<String>,
}

/// Per-request credential overrides, the topmost layer of the precedence
/// chain. Populated from CLI flags or (were an HTTP surface ever added) a
/// request body.
#[derive(Debug, Clone, Default)]
pub struct RequestOverrides {
    pub tmdb_api_key: Option<String>,
    pub anilist_api_key: Option<String>,
}

impl Config {
    #[must_use]
    pub fn user_settings(&self, username: &str) -> UserSettings {
        self.users.get(username).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn resolve_provider_settings(&self, username: &str, request: &RequestOverrides) -> ResolvedProviderSettings {
        let user = self.users.get(username);
        ResolvedProviderSettings {
            tmdb_api_key: request
                .tmdb_api_key
                .clone()
                .or_else(|| user.and_then(|u| u.tmdb_api_key.clone()))
                .or_else(|| self.server.tmdb_api_key.clone()),
            anilist_api_key: request
                .anilist_api_key
                .clone()
                .or_else(|| user.and_then(|u| u.anilist_api_key.clone()))
                .or_else(|| self.server.anilist_api_key.clone()),
            tvdb_v4_api_key: user
                .and_then(|u| u.tvdb_v4_api_key.clone())
                .or_else(|| self.server.tvdb_v4_api_key.clone()),
            tvdb_v4_user_pin: user
                .and_then(|u| u.tvdb_v4_user_pin.clone())
                .or_else(|| self.server.tvdb_v4_user_pin.clone()),
            anidb_username: user
                .and_then(|u| u.anidb_username.clone())
                .or_else(|| self.server.anidb_username.clone()),
            anidb_password: user
                .and_then(|u| u.anidb_password.clone())
                .or_else(|| self.server.anidb_password.clone()),
            anidb_client_name: user
                .and_then(|u| u.anidb_client_name.clone())
                .or_else(|| self.server.anidb_client_name.clone()),
            anidb_client_version: user
                .and_then(|u| u.anidb_client_version.clone())
                .or_else(|| self.server.anidb_client_version.clone()),
        }
    }

    pub fn load() -> Result<Self> {
        for path in Self::config_paths() {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(&path);
            }
        }
        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::default_config_path())
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("renamarr").join("config.toml"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".renamarr").join("config.toml"));
        }
        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            return Ok(false);
        }
        Self::default().save_to_path(&path)?;
        info!("Created default config file: {}", path.display());
        Ok(true)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.libraries.iter().any(|l| l.id.trim().is_empty()) {
            anyhow::bail!("every library must have a non-empty id");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_provider_settings_prefers_request_over_user_over_server() {
        let mut config = Config::default();
        config.server.tmdb_api_key = Some("server-key".into());
        config.users.insert(
            "alice".into(),
            UserSettings { tmdb_api_key: Some("user-key".into()), ..UserSettings::default() },
        );

        let no_override = config.resolve_provider_settings("alice", &RequestOverrides::default());
        assert_eq!(no_override.tmdb_api_key.as_deref(), Some("user-key"));

        let with_override = config.resolve_provider_settings(
            "alice",
            &RequestOverrides { tmdb_api_key: Some("request-key".into()), ..RequestOverrides::default() },
        );
        assert_eq!(with_override.tmdb_api_key.as_deref(), Some("request-key"));

        let unknown_user = config.resolve_provider_settings("bob", &RequestOverrides::default());
        assert_eq!(unknown_user.tmdb_api_key.as_deref(), Some("server-key"));
    }

    #[test]
    fn user_settings_defaults_delete_hardlinks_on_unapprove_to_true() {
        let settings = UserSettings::default();
        assert!(settings.delete_hardlinks_on_unapprove);
    }
}
