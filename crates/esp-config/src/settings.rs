//! Gateway settings from `gateway.yaml`

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// File name of the settings file inside the config directory
pub const SETTINGS_FILE: &str = "gateway.yaml";

/// Where the gateway keeps its files and how it behaves
///
/// Relative paths are resolved against the config directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Directory holding `.storage/`
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    #[serde(default = "default_config_file")]
    pub config_file: PathBuf,

    #[serde(default = "default_templates_file")]
    pub templates_file: PathBuf,

    /// SQLite database of internal states
    #[serde(default = "default_state_db")]
    pub state_db: PathBuf,

    /// Default timeout of outbound RPC calls, in seconds
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout: f64,

    /// Maximum nesting of action calls
    #[serde(default = "default_action_max_depth")]
    pub action_max_depth: usize,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_config_file() -> PathBuf {
    PathBuf::from("config.yaml")
}

fn default_templates_file() -> PathBuf {
    PathBuf::from("templates.yaml")
}

fn default_state_db() -> PathBuf {
    PathBuf::from("internal_states.db")
}

fn default_rpc_timeout() -> f64 {
    5.0
}

fn default_action_max_depth() -> usize {
    esp_actions::DEFAULT_MAX_DEPTH
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            config_file: default_config_file(),
            templates_file: default_templates_file(),
            state_db: default_state_db(),
            rpc_timeout: default_rpc_timeout(),
            action_max_depth: default_action_max_depth(),
        }
    }
}

impl GatewaySettings {
    /// Load `gateway.yaml` from `config_dir`, or defaults if it is absent
    ///
    /// Paths in the result are resolved against `config_dir`.
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        let settings = if config_dir.join(SETTINGS_FILE).is_file() {
            Self::from_yaml(load_yaml(config_dir, SETTINGS_FILE)?)?
        } else {
            debug!("No {} in {:?}, using defaults", SETTINGS_FILE, config_dir);
            Self::default()
        };
        settings.validated().map(|s| s.resolved(config_dir))
    }

    pub fn from_yaml(yaml: Value) -> ConfigResult<Self> {
        serde_yaml::from_value(yaml).map_err(|e| ConfigError::InvalidValue {
            key: SETTINGS_FILE.to_string(),
            reason: e.to_string(),
        })
    }

    fn validated(self) -> ConfigResult<Self> {
        if !self.rpc_timeout.is_finite() || self.rpc_timeout <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "rpc_timeout".to_string(),
                reason: "must be a positive number of seconds".to_string(),
            });
        }
        Ok(self)
    }

    /// Copy with every relative path joined onto `base`
    pub fn resolved(mut self, base: &Path) -> Self {
        for path in [
            &mut self.storage_dir,
            &mut self.config_file,
            &mut self.templates_file,
            &mut self.state_db,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.rpc_timeout)
    }
}
