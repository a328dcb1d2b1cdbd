use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::{
    APP_NAME, BACKEND_TIMEOUT_SECS, DEFAULT_API_KEY_ENV, DEFAULT_GEMINI_BASE_URL, DEFAULT_HOST,
    DEFAULT_MAX_FRAME_BYTES, DEFAULT_MAX_RETRIES, DEFAULT_MODEL, DEFAULT_PORT, DEFAULT_PROVIDER,
    DEFAULT_RETRY_BACKOFF_MS, ENV_PREFIX, SHUTDOWN_GRACE_SECS,
};
use crate::utils::RelayError;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Generation backend configuration
    #[serde(default)]
    pub backend: BackendSettings,

    /// Per-connection conversation configuration
    #[serde(default)]
    pub session: SessionSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            backend: BackendSettings::default(),
            session: SessionSettings::default(),
        }
    }
}

impl Config {
    /// Apply command line overrides on top of the loaded layers
    pub fn apply_overrides(
        &mut self,
        host: Option<String>,
        port: Option<u16>,
        model: Option<String>,
    ) {
        if let Some(host) = host {
            self.server.host = host;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        if let Some(model) = model {
            self.backend.model = model;
        }
    }
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Interface to bind
    pub host: String,
    /// Port to bind (0 picks a free port)
    pub port: u16,
    /// Largest accepted inbound text frame, in bytes
    pub max_frame_bytes: usize,
    /// How long shutdown waits for in-flight turns
    pub shutdown_grace_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            shutdown_grace_secs: SHUTDOWN_GRACE_SECS,
        }
    }
}

impl ServerSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Provider name (gemini, echo)
    pub provider: String,
    /// Model identifier passed to the provider
    pub model: String,
    /// Base URL of the provider API
    pub base_url: String,
    /// Environment variable containing the API key
    pub api_key_env: String,
    /// API key fallback when the environment variable is unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Deadline for one generation, retries included
    pub timeout_secs: u64,
    /// Extra attempts after a transient failure
    pub max_retries: u32,
    /// First retry delay; doubles on each attempt
    pub retry_backoff_ms: u64,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Upper bound on generated tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    /// Nucleus sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// System instruction sent with every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            api_key: None,
            timeout_secs: BACKEND_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            temperature: None,
            max_output_tokens: None,
            top_p: None,
            system_prompt: None,
        }
    }
}

impl BackendSettings {
    /// Providers that talk to a remote API need a key
    pub fn requires_credential(&self) -> bool {
        self.provider != "echo"
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Resolve the API key from the process environment, then the config file
    pub fn credential(&self) -> Result<ApiKey, RelayError> {
        self.credential_from(|name| std::env::var(name).ok())
    }

    /// Resolve the API key using `lookup` in place of the process environment
    pub fn credential_from(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<ApiKey, RelayError> {
        lookup(&self.api_key_env)
            .filter(|key| !key.trim().is_empty())
            .or_else(|| {
                self.api_key
                    .clone()
                    .filter(|key| !key.trim().is_empty())
            })
            .map(ApiKey::new)
            .ok_or_else(|| RelayError::MissingCredential {
                env_var: self.api_key_env.clone(),
            })
    }
}

/// Conversation settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Most recent turns sent to the backend; unbounded when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_history_turns: Option<usize>,
}

/// Backend credential. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Load configuration from multiple sources
///
/// Later layers win: defaults, global file, local `.chat-relay/config.toml`,
/// the explicit `--config` file, then `CHAT_RELAY_*` environment variables.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut files = Vec::new();

    if let Some(dir) = config_dir() {
        files.push(dir.join("config.toml"));
    }
    files.push(PathBuf::from(format!(".{APP_NAME}/config.toml")));

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(RelayError::Config(format!(
                "config file {} does not exist",
                path.display()
            ))
            .into());
        }
        files.push(path.to_path_buf());
    }

    load_from_files(&files)
}

/// Layer the given TOML files (missing ones are skipped) over the defaults
pub fn load_from_files(files: &[PathBuf]) -> Result<Config> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));

    for file in files.iter().filter(|f| f.exists()) {
        figment = figment.merge(Toml::file(file));
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    figment
        .extract()
        .map_err(|e| RelayError::Config(e.to_string()).into())
}

/// Platform configuration directory, if one can be determined
fn config_dir() -> Option<PathBuf> {
    if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
        return Some(proj_dirs.config_dir().to_path_buf());
    }
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .ok()
        .map(|home| PathBuf::from(home).join(".config").join(APP_NAME))
}

/// Get the configuration directory, creating it if needed
pub fn get_config_dir() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine home directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir)
}

/// Save configuration to file
pub fn save_config(config: &Config, path: Option<PathBuf>) -> Result<PathBuf> {
    let path = if let Some(p) = path {
        p
    } else {
        get_config_dir()?.join("config.toml")
    };

    let toml_string = toml::to_string_pretty(config)?;
    std::fs::write(&path, toml_string)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;

    Ok(path)
}

/// Create a default configuration file if it doesn't exist.
/// Returns the path and whether it was newly written.
pub fn init_config(path: Option<PathBuf>) -> Result<(PathBuf, bool)> {
    let path = match path {
        Some(p) => p,
        None => get_config_dir()?.join("config.toml"),
    };

    if path.exists() {
        return Ok((path, false));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let path = save_config(&Config::default(), Some(path))?;
    Ok((path, true))
}
