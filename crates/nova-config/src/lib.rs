//! Configuration for the element model.
//!
//! A workspace configures its model through a TOML file (`nova-model.toml`):
//!
//! ```toml
//! encoding = "UTF-8"
//!
//! [units]
//! space_limit = 2000
//! overflow = 200
//!
//! [buffers]
//! space_limit = 500
//!
//! [logging]
//! level = "nova.model=debug,info"
//! ```
//!
//! Every section is optional; missing values take the defaults of
//! [`nova_model::StoreConfig`].

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use nova_memory::CachePolicy;
use nova_model::StoreConfig;
use parking_lot::ReentrantMutex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod diagnostics;
mod logging;
mod schema;
mod validation;

pub use diagnostics::{
    ConfigDiagnostics, ConfigValidationError, ConfigWarning, ValidationDiagnostics,
};
pub use logging::{init_tracing, LoggingConfig};
pub use schema::json_schema;

/// Sizing of one of the model's caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct CacheConfig {
    /// Space the cache tries to stay within. Every entry costs 1.
    #[schemars(range(min = 1))]
    pub space_limit: usize,

    /// Transient tolerance above `space_limit` before a retry sweep is
    /// forced. Defaults to a tenth of `space_limit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overflow: Option<usize>,

    /// Full sweeps retried before an overrun is accepted.
    #[serde(default = "CacheConfig::default_sweep_retries")]
    pub sweep_retries: u32,
}

impl CacheConfig {
    fn default_sweep_retries() -> u32 {
        1
    }

    pub fn effective_overflow(&self) -> usize {
        self.overflow.unwrap_or(self.space_limit / 10)
    }

    pub fn policy(&self) -> CachePolicy {
        CachePolicy::new(self.space_limit, self.effective_overflow())
            .with_sweep_retries(self.sweep_retries)
    }
}

impl From<CachePolicy> for CacheConfig {
    fn from(policy: CachePolicy) -> Self {
        Self {
            space_limit: policy.space_limit,
            overflow: Some(policy.overflow),
            sweep_retries: policy.sweep_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct ModelConfig {
    /// Encoding used when reading unit contents.
    #[serde(default = "ModelConfig::default_encoding")]
    pub encoding: String,

    /// Cache of opened roots, packages and compilation units.
    #[serde(default = "ModelConfig::default_units")]
    pub units: CacheConfig,

    /// Cache of editable buffers.
    #[serde(default = "ModelConfig::default_buffers")]
    pub buffers: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ModelConfig {
    fn default_units() -> CacheConfig {
        StoreConfig::default().units.into()
    }

    fn default_buffers() -> CacheConfig {
        StoreConfig::default().buffers.into()
    }

    fn default_encoding() -> String {
        StoreConfig::default().encoding
    }

    /// The body store sizing described by this config.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            units: self.units.policy(),
            buffers: self.buffers.policy(),
            encoding: self.encoding.trim().to_owned(),
        }
    }

    /// Parse and validate a config. Validation errors fail the load;
    /// warnings and unknown keys are ignored.
    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config: ModelConfig = toml::from_str(text)?;
        if let Some(error) = config.validate().errors.into_iter().next() {
            return Err(error.into());
        }
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_from_str(&read_config(path.as_ref())?)
    }

    /// Parse a config and return it along with everything that looked wrong
    /// about it. Only TOML syntax and type errors fail the load.
    pub fn load_from_str_with_diagnostics(
        text: &str,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let (config, unknown_keys) =
            diagnostics::deserialize_toml_with_unknown_keys::<ModelConfig>(text)?;

        let mut diagnostics = ConfigDiagnostics {
            unknown_keys,
            ..ConfigDiagnostics::default()
        };
        diagnostics.extend_validation(config.validate());

        for key in &diagnostics.unknown_keys {
            tracing::debug!(target: "nova.config", key = %key, "ignoring unknown config key");
        }

        Ok((config, diagnostics))
    }

    pub fn load_from_path_with_diagnostics(
        path: impl AsRef<Path>,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        Self::load_from_str_with_diagnostics(&read_config(path.as_ref())?)
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            encoding: Self::default_encoding(),
            units: Self::default_units(),
            buffers: Self::default_buffers(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error(transparent)]
    Invalid(#[from] ConfigValidationError),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The `Display` impl quotes the offending source line; keep only the
        // message.
        ConfigError::Toml(err.message().to_owned())
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub const CONFIG_ENV_VAR: &str = "NOVA_MODEL_CONFIG";

static CONFIG_ENV_LOCK: OnceLock<ReentrantMutex<()>> = OnceLock::new();

fn config_env_lock() -> &'static ReentrantMutex<()> {
    CONFIG_ENV_LOCK.get_or_init(|| ReentrantMutex::new(()))
}

/// Run `f` while holding the config environment lock.
///
/// Environment variables are process-global; tests that set
/// [`CONFIG_ENV_VAR`] wrap the mutation and the discovery in this helper so
/// concurrent discovery never observes the temporary value.
pub fn with_config_env_lock<R>(f: impl FnOnce() -> R) -> R {
    let _guard = config_env_lock().lock();
    f()
}

/// Discover the model configuration file for a workspace root.
///
/// Search order:
/// 1) `NOVA_MODEL_CONFIG` (absolute or relative to `workspace_root`)
/// 2) `nova-model.toml` in `workspace_root`
/// 3) `.nova/model.toml` in `workspace_root`
pub fn discover_config_path(workspace_root: &Path) -> Option<PathBuf> {
    let _guard = config_env_lock().lock();
    if let Some(value) = std::env::var_os(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(value);
        let path = if candidate.is_absolute() {
            candidate
        } else {
            workspace_root.join(candidate)
        };
        return Some(path.canonicalize().unwrap_or(path));
    }

    ["nova-model.toml", ".nova/model.toml"]
        .into_iter()
        .map(|name| workspace_root.join(name))
        .find(|path| path.is_file())
        .map(|path| path.canonicalize().unwrap_or(path))
}

/// Load the model configuration for a workspace root.
///
/// If no config is present, returns [`ModelConfig::default`] and `None`.
pub fn load_for_workspace(
    workspace_root: &Path,
) -> Result<(ModelConfig, Option<PathBuf>), ConfigError> {
    let Some(path) = discover_config_path(workspace_root) else {
        return Ok((ModelConfig::default(), None));
    };

    let config = ModelConfig::load_from_path(&path)?;
    tracing::debug!(target: "nova.config", path = %path.display(), "loaded model config");
    Ok((config, Some(path)))
}
