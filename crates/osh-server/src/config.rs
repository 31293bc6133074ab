//! Server configuration: TOML file + CLI overrides.
//!
//! Only key-material paths are configurable. The listen address and port
//! are fixed in the transport layer.

use osh_core::{OshError, OshResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host_key_path")]
    pub host_key: String,
    #[serde(default = "default_authorized_keys_path")]
    pub authorized_keys: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host_key: default_host_key_path(),
            authorized_keys: default_authorized_keys_path(),
        }
    }
}

fn default_host_key_path() -> String {
    "~/.osh/host_key".to_string()
}
fn default_authorized_keys_path() -> String {
    "~/.osh/authorized_keys".to_string()
}

/// Resolved configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host_key_path: PathBuf,
    pub authorized_keys_path: PathBuf,
}

impl ServerConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    pub fn load(
        config_path: Option<&Path>,
        cli_host_key: Option<&str>,
        cli_authorized_keys: Option<&str>,
    ) -> OshResult<Self> {
        let file_config = if let Some(path) = config_path {
            let expanded = expand_tilde(path);
            if expanded.exists() {
                info!(path = %expanded.display(), "loading config file");
                let content = std::fs::read_to_string(&expanded)?;
                toml::from_str::<ConfigFile>(&content)
                    .map_err(|e| OshError::Config(format!("config parse error: {e}")))?
            } else {
                ConfigFile::default()
            }
        } else {
            ConfigFile::default()
        };

        let host_key = cli_host_key
            .map(|s| s.to_string())
            .unwrap_or(file_config.server.host_key);
        let authorized_keys = cli_authorized_keys
            .map(|s| s.to_string())
            .unwrap_or(file_config.server.authorized_keys);

        Ok(Self {
            host_key_path: expand_tilde_str(&host_key),
            authorized_keys_path: expand_tilde_str(&authorized_keys),
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
