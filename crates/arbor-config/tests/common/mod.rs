// crates/arbor-config/tests/common/mod.rs
// =============================================================================
// Module: Config Test Helpers
// Description: Shared helpers for config validation tests.
// Purpose: Reduce duplication across integration tests for arbor-config.
// =============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]

use arbor_config::ArborConfig;
use arbor_config::ConfigError;

/// Result type for config tests.
pub type TestResult = Result<(), String>;

/// Parses a TOML string into an `ArborConfig` for tests.
pub fn config_from_toml(toml_str: &str) -> Result<ArborConfig, toml::de::Error> {
    toml::from_str(toml_str)
}

/// Returns a minimal config with all defaults applied.
pub fn minimal_config() -> Result<ArborConfig, toml::de::Error> {
    config_from_toml("")
}

/// Parses and validates a TOML string, flattening errors to strings.
pub fn validated(toml_str: &str) -> Result<ArborConfig, String> {
    let config = config_from_toml(toml_str).map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;
    Ok(config)
}

/// Asserts that a validation result is an error containing a specific substring.
pub fn assert_invalid(result: Result<(), ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error '{message}' did not contain '{needle}'"))
            }
        }
        Ok(()) => Err("expected invalid config".to_string()),
    }
}

/// Asserts that a TOML string fails validation with a specific substring.
pub fn assert_toml_invalid(toml_str: &str, needle: &str) -> TestResult {
    let config = config_from_toml(toml_str).map_err(|err| err.to_string())?;
    assert_invalid(config.validate(), needle)
}
