//! Configuration types and loading.
//!
//! A session is described by one TOML file with three tables: `[transport]`
//! selects and tunes the connection, `[rpc]` tunes the engine and `[client]`
//! shapes the `initialize` request.

mod transport;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
pub use transport::{TransportConfig, TransportKind};

use crate::error::{Error, Result};
use crate::rpc::RpcConfig;

/// Environment variable holding an explicit config path.
pub const CONFIG_ENV: &str = "LSPMUX_CONFIG";

/// File name looked up in the working and user config directories.
pub const CONFIG_FILE_NAME: &str = "lspmux.toml";

/// Complete configuration of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Connection settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Engine settings.
    #[serde(default)]
    pub rpc: RpcSettings,

    /// Client identity and workspace.
    #[serde(default)]
    pub client: ClientConfig,
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RpcSettings {
    /// Default per-request deadline in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl RpcSettings {
    /// Engine configuration for these settings.
    #[must_use]
    pub const fn rpc_config(&self) -> RpcConfig {
        RpcConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

/// Client identity sent with `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Name reported in `clientInfo`.
    #[serde(default = "default_client_name")]
    pub name: String,

    /// Workspace root announced as the single workspace folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Server-specific `initializationOptions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<Value>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            root: None,
            initialization_options: None,
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_client_name() -> String {
    "lspmux".to_string()
}

impl SessionConfig {
    /// Load configuration from the default locations.
    ///
    /// Paths checked in order:
    /// 1. `$LSPMUX_CONFIG`
    /// 2. `./lspmux.toml`
    /// 3. `<config dir>/lspmux/lspmux.toml`
    ///
    /// Falls back to defaults when none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file fails to parse or validate.
    pub fn load() -> Result<Self> {
        match Self::locate() {
            Some(path) => Self::load_from(&path),
            None => {
                tracing::debug!("no configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// First existing configuration file in lookup order.
    ///
    /// `$LSPMUX_CONFIG` is returned even if it does not exist, so loading
    /// reports it as missing instead of silently falling through.
    #[must_use]
    pub fn locate() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }

        let local_config = PathBuf::from(CONFIG_FILE_NAME);
        if local_config.exists() {
            return Some(local_config);
        }

        dirs::config_dir()
            .map(|dir| dir.join("lspmux").join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file doesn't exist or parsing fails.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ConfigNotFound(path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;

        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Serialize to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if a value cannot be expressed in TOML.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.transport.validate()?;
        if self.rpc.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "rpc.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.client.name.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "client.name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Engine configuration.
    #[must_use]
    pub const fn rpc_config(&self) -> RpcConfig {
        self.rpc.rpc_config()
    }
}
