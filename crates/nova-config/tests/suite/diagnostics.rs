use nova_config::{ConfigValidationError, ConfigWarning, ModelConfig};
use pretty_assertions::assert_eq;

#[test]
fn reports_unknown_keys_with_full_paths() {
    let text = r#"
typo = 1

[units]
space_limit = 10
overfow = 2

[logging]
colour = true
"#;

    let (config, diagnostics) = ModelConfig::load_from_str_with_diagnostics(text).unwrap();

    assert_eq!(
        diagnostics.unknown_keys,
        vec!["logging.colour", "typo", "units.overfow"]
    );
    assert_eq!(config.units.space_limit, 10);
    assert!(diagnostics.is_ok());
}

#[test]
fn validation_errors_are_reported_instead_of_failing() {
    let text = r#"
encoding = "  "

[units]
space_limit = 0

[buffers]
space_limit = 0
"#;

    let (_config, diagnostics) = ModelConfig::load_from_str_with_diagnostics(text).unwrap();

    let paths: Vec<&str> = diagnostics
        .errors
        .iter()
        .map(|error| match error {
            ConfigValidationError::InvalidValue { toml_path, .. } => toml_path.as_str(),
            other => panic!("unexpected error: {other:?}"),
        })
        .collect();
    assert_eq!(paths, vec!["units.space_limit", "buffers.space_limit", "encoding"]);
    assert!(!diagnostics.is_ok());
}

#[test]
fn oversized_overflow_is_a_warning() {
    let text = "[buffers]\nspace_limit = 4\noverflow = 10\nsweep_retries = 0\n";
    let (_config, diagnostics) = ModelConfig::load_from_str_with_diagnostics(text).unwrap();

    assert!(diagnostics.is_ok());
    let paths: Vec<&str> = diagnostics
        .warnings
        .iter()
        .filter_map(|warning| match warning {
            ConfigWarning::InvalidValue { toml_path, .. } => Some(toml_path.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(paths, vec!["buffers.overflow", "buffers.sweep_retries"]);

    // Warnings never fail a plain load.
    assert!(ModelConfig::load_from_str(text).is_ok());
}

#[test]
fn invalid_logging_level_is_a_warning() {
    let text = "[logging]\nlevel = \"nova.model=loud\"\n";
    let (_config, diagnostics) = ModelConfig::load_from_str_with_diagnostics(text).unwrap();

    assert_eq!(
        diagnostics.warnings,
        vec![ConfigWarning::LoggingLevelInvalid {
            value: "nova.model=loud".to_owned(),
            normalized: "nova.model=loud".to_owned(),
        }]
    );
}

#[test]
fn default_config_is_clean() {
    let (config, diagnostics) = ModelConfig::load_from_str_with_diagnostics("").unwrap();
    assert!(diagnostics.is_empty());
    assert_eq!(config, ModelConfig::default());
    assert!(config.validate().errors.is_empty());
}
