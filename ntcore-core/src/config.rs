//! Configuration for the NTCore SDK.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Default DSP server address.
pub const DEFAULT_SERVER: &str = "http://localhost:8000/";

/// Top-level SDK configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Base address of the DSP server.
    pub server: String,
    /// Bearer token. Takes precedence over basic auth.
    pub api_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    pub monitor: MonitorConfig,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            api_token: None,
            username: None,
            password: None,
            timeout_secs: 30,
            monitor: MonitorConfig::default(),
        }
    }
}

impl SdkConfig {
    /// Configuration pointing at `server` with every other field defaulted.
    pub fn with_server(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }
}

/// Settings for the monitoring client and system-metrics daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub workspace_id: Option<String>,
    pub publish_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            workspace_id: None,
            publish_interval_secs: 60,
        }
    }
}

/// Explicit overrides applied on top of every other layer. Unset fields leave
/// the underlying value alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("io", "ntcore", "ntcore")
}

/// Load configuration by merging all layers.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<SdkConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(SdkConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".ntcore").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // NTCORE_SERVER, NTCORE_MONITOR__WORKSPACE_ID, ...
    figment = figment.merge(Env::prefixed("NTCORE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment
        .extract()
        .map_err(|e| ConfigError::Load(Box::new(e)))
}

/// Whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = project_dirs() {
        if dirs.config_dir().join("config.toml").exists() {
            return true;
        }
    }
    workspace.is_some_and(|ws| ws.join(".ntcore").join("config.toml").exists())
}

/// Token stored by `ntcore login`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub token: Option<String>,
}

impl Credentials {
    /// `~/.ntcore/credentials.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".ntcore").join("credentials.toml"))
    }

    /// Read credentials from `path`. A missing file yields empty credentials.
    pub fn load_from(path: &Path) -> std::io::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    pub fn load() -> std::io::Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self) -> std::io::Result<PathBuf> {
        let path = Self::default_path().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "home directory not found")
        })?;
        self.save_to(&path)?;
        Ok(path)
    }
}
