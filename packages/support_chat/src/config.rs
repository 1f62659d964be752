use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use chat_sync::ReconnectPolicy;
use chat_sync::supervisor::DEFAULT_MAX_DASHBOARD_FAILURES;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
//   config.toml:     [server]
//                    api_url = "https://support.example.com"
//
//   env var:         SUPPORT_CHAT_SERVER__API_URL=https://support.example.com
//
//   (double underscore = nesting, single underscore stays within field names)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Backend endpoints (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
        }
    }
}

/// Connection behaviour (lives under `[session]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    /// 0 disables the timeout.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_max_dashboard_failures")]
    pub max_dashboard_failures: u32,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            max_dashboard_failures: default_max_dashboard_failures(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

fn default_api_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_ws_url() -> String {
    "ws://localhost:8080".to_string()
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_max_dashboard_failures() -> u32 {
    DEFAULT_MAX_DASHBOARD_FAILURES
}
fn default_reconnect_backoff_ms() -> u64 {
    1000
}

/// Build the layered figment: struct defaults, then `config.toml` in the data
/// directory, then `SUPPORT_CHAT_*` environment variables.
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("SUPPORT_CHAT_").split("__"))
}

// =============================================================================
// Runtime config
// =============================================================================

/// Resolved settings handed to the REST client, connector and supervisor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub ws_url: String,
    pub connect_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
    pub reconnect_backoff: Duration,
}

impl ClientConfig {
    pub fn from_file(file: &FileConfig) -> Self {
        let connect_timeout = match file.session.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self {
            api_url: file.server.api_url.trim_end_matches('/').to_string(),
            ws_url: file.server.ws_url.trim_end_matches('/').to_string(),
            connect_timeout,
            reconnect: ReconnectPolicy {
                // Zero would refuse the very first reconnect.
                max_dashboard_failures: file.session.max_dashboard_failures.max(1),
            },
            reconnect_backoff: Duration::from_millis(file.session.reconnect_backoff_ms),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}

// =============================================================================
// Data directory layout
// =============================================================================

#[derive(Clone, Debug)]
pub struct SupportChatDirs {
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub credentials_path: PathBuf,
}

impl SupportChatDirs {
    /// Resolve (and create) the data directory. Defaults to `~/.support-chat`.
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".support-chat"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        debug!("Data directory: {}", data_dir.display());

        Ok(Self {
            config_path: data_dir.join("config.toml"),
            credentials_path: data_dir.join("credentials.json"),
            data_dir,
        })
    }

    /// Extract the figment layers for this directory into runtime settings.
    pub fn load_client_config(&self) -> Result<ClientConfig> {
        let file: FileConfig = load_config(&self.data_dir)
            .extract()
            .with_context(|| format!("Invalid configuration in {:?}", self.config_path))?;
        Ok(ClientConfig::from_file(&file))
    }
}
