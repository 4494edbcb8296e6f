use crate::diagnostics::{ConfigValidationError, ConfigWarning, ValidationDiagnostics};
use crate::{CacheConfig, LoggingConfig, ModelConfig};

impl ModelConfig {
    /// Validate semantic invariants, reporting every problem found in one
    /// pass.
    #[must_use]
    pub fn validate(&self) -> ValidationDiagnostics {
        let mut out = ValidationDiagnostics::default();

        validate_cache("units", &self.units, &mut out);
        validate_cache("buffers", &self.buffers, &mut out);
        validate_encoding(self, &mut out);
        validate_logging(self, &mut out);

        out
    }
}

fn validate_cache(section: &str, cache: &CacheConfig, out: &mut ValidationDiagnostics) {
    if cache.space_limit == 0 {
        out.errors.push(ConfigValidationError::InvalidValue {
            toml_path: format!("{section}.space_limit"),
            message: "must be >= 1".to_owned(),
        });
        return;
    }

    if let Some(overflow) = cache.overflow {
        if overflow > cache.space_limit {
            out.warnings.push(ConfigWarning::InvalidValue {
                toml_path: format!("{section}.overflow"),
                message: format!(
                    "overflow {overflow} exceeds space_limit {}; the cache may hold more than twice its limit",
                    cache.space_limit
                ),
            });
        }
    }

    if cache.sweep_retries == 0 {
        out.warnings.push(ConfigWarning::InvalidValue {
            toml_path: format!("{section}.sweep_retries"),
            message: "0 disables retry sweeps; refused evictions are never retried".to_owned(),
        });
    }
}

fn validate_encoding(config: &ModelConfig, out: &mut ValidationDiagnostics) {
    if config.encoding.trim().is_empty() {
        out.errors.push(ConfigValidationError::InvalidValue {
            toml_path: "encoding".to_owned(),
            message: "must not be empty".to_owned(),
        });
    }
}

fn validate_logging(config: &ModelConfig, out: &mut ValidationDiagnostics) {
    let normalized = LoggingConfig::normalize_level_directives(&config.logging.level);
    if !config.logging.level.trim().is_empty()
        && tracing_subscriber::EnvFilter::try_new(normalized.clone()).is_err()
    {
        out.warnings.push(ConfigWarning::LoggingLevelInvalid {
            value: config.logging.level.clone(),
            normalized,
        });
    }
}
