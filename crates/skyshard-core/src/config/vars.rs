//! Environment variable interpolation for config files.
//!
//! Recognized forms:
//! - `${VAR}` - value of VAR, error if unset
//! - `${VAR:-default}` - default when VAR is unset or empty
//! - `$$` - a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("placeholder pattern is valid")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Every unresolved placeholder, so all of them can be reported at once.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Substitute environment variables into `input`.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = PLACEHOLDER
        .replace_all(input, |caps: &Captures| {
            let Some(name) = caps.get(1).map(|m| m.as_str()) else {
                return "$".to_string();
            };
            let default = caps.get(2).map(|m| m.as_str());

            match (env::var(name), default) {
                (Ok(value), _) if value.contains(['\n', '\r']) => {
                    errors.push(format!("environment variable '{name}' contains newlines"));
                    caps[0].to_string()
                }
                (Ok(value), Some(default)) if value.is_empty() => default.to_string(),
                (Ok(value), _) => value,
                (Err(_), Some(default)) => default.to_string(),
                (Err(_), None) => {
                    errors.push(format!("environment variable '{name}' is not set"));
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    InterpolationResult { text, errors }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitutes_set_variable() {
        // SAFETY: the variable name is unique to this test.
        unsafe { env::set_var("SKYSHARD_TEST_ROOT", "/data/gphoton") };
        let result = interpolate("root: ${SKYSHARD_TEST_ROOT}/partitions");
        assert!(result.is_ok());
        assert_eq!(result.text, "root: /data/gphoton/partitions");
    }

    #[test]
    fn test_default_used_when_unset() {
        let result = interpolate("workers: ${SKYSHARD_TEST_NEVER_SET:-4}");
        assert!(result.is_ok());
        assert_eq!(result.text, "workers: 4");
    }

    #[test]
    fn test_default_used_when_empty() {
        // SAFETY: the variable name is unique to this test.
        unsafe { env::set_var("SKYSHARD_TEST_EMPTY", "") };
        let result = interpolate("delimiter: '${SKYSHARD_TEST_EMPTY:-|}'");
        assert_eq!(result.text, "delimiter: '|'");
    }

    #[test]
    fn test_missing_variables_are_all_reported() {
        let result = interpolate("${SKYSHARD_TEST_MISSING_A} ${SKYSHARD_TEST_MISSING_B}");
        assert!(!result.is_ok());
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("SKYSHARD_TEST_MISSING_A"));
        assert_eq!(
            result.text,
            "${SKYSHARD_TEST_MISSING_A} ${SKYSHARD_TEST_MISSING_B}"
        );
    }

    #[test]
    fn test_dollar_escape() {
        let result = interpolate("label: $$ra");
        assert!(result.is_ok());
        assert_eq!(result.text, "label: $ra");
    }
}
