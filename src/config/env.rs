//! Environment variable substitution for credentials.

use crate::error::ConfigError;
use regex::Regex;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

/// Resolves `${VAR_NAME}` patterns in a string.
///
/// # Errors
/// Returns [`ConfigError::ValidationError`] naming every undefined variable.
pub fn resolve_env_vars(value: &str) -> Result<String, ConfigError> {
    let mut missing = Vec::new();

    let resolved = ENV_VAR_PATTERN.replace_all(value, |cap: &regex::Captures<'_>| {
        match std::env::var(&cap[1]) {
            Ok(var_value) => var_value,
            Err(_) => {
                missing.push(cap[1].to_string());
                String::new()
            }
        }
    });

    if missing.is_empty() {
        Ok(resolved.into_owned())
    } else {
        Err(ConfigError::ValidationError(format!(
            "undefined environment variable{}: {}",
            if missing.len() > 1 { "s" } else { "" },
            missing.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn resolve_env_vars_substitutes_single_variable() {
        temp_env::with_var("TEST_SMTP_PASSWORD", Some("hunter2"), || {
            let result = resolve_env_vars("${TEST_SMTP_PASSWORD}");
            assert_eq!(result.unwrap(), "hunter2");
        });
    }

    #[test]
    #[serial]
    fn resolve_env_vars_substitutes_multiple_variables() {
        temp_env::with_vars(
            [
                ("TEST_SMTP_USER_PREFIX", Some("alerts")),
                ("TEST_SMTP_USER_DOMAIN", Some("example.com")),
            ],
            || {
                let result = resolve_env_vars("${TEST_SMTP_USER_PREFIX}@${TEST_SMTP_USER_DOMAIN}");
                assert_eq!(result.unwrap(), "alerts@example.com");
            },
        );
    }

    #[test]
    fn resolve_env_vars_returns_unchanged_without_pattern() {
        let input = "plain-password";
        assert_eq!(resolve_env_vars(input).unwrap(), input);
    }

    #[test]
    fn resolve_env_vars_ignores_unbraced_dollar() {
        let input = "pa$$word$HOME";
        assert_eq!(resolve_env_vars(input).unwrap(), input);
    }

    #[test]
    #[serial]
    fn resolve_env_vars_error_lists_all_undefined_variables() {
        temp_env::with_vars(
            [
                ("UNDEFINED_SMTP_A", None::<&str>),
                ("UNDEFINED_SMTP_B", None::<&str>),
            ],
            || {
                let err = resolve_env_vars("${UNDEFINED_SMTP_A}:${UNDEFINED_SMTP_B}").unwrap_err();
                let message = err.to_string();
                assert!(message.contains("variables"));
                assert!(message.contains("UNDEFINED_SMTP_A"));
                assert!(message.contains("UNDEFINED_SMTP_B"));
            },
        );
    }
}
