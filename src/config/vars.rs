//! Environment variable interpolation for config files.
//!
//! Supported syntax:
//! - `${VAR}` - substitute with the variable's value, error if unset
//! - `${VAR:-default}` - use `default` if VAR is unset or empty
//! - `$$` - literal `$`

use std::env;
use std::sync::LazyLock;

use regex::Regex;

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # literal dollar escape
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)   # variable name
            (?: :- ([^}]*) )?          # optional default
        \}
        ",
    )
    .expect("invalid interpolation pattern")
});

/// Result of environment variable interpolation.
#[derive(Debug)]
pub struct InterpolationResult {
    /// The interpolated text.
    pub text: String,
    /// Errors encountered, accumulated so all missing variables surface at once.
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Interpolate environment variables in the given text.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let whole = caps.get(0).unwrap().as_str();
            if whole == "$$" {
                return "$".to_string();
            }

            let name = caps.get(1).map(|m| m.as_str()).unwrap_or("");
            let default = caps.get(2).map(|m| m.as_str());

            match (env::var(name), default) {
                (Ok(value), _) if !value.is_empty() => value,
                // Set but empty with no default: keep the empty value.
                (Ok(value), None) => value,
                (Ok(_), Some(d)) | (Err(_), Some(d)) => d.to_string(),
                (Err(_), None) => {
                    errors.push(format!("environment variable '{name}' is not set"));
                    whole.to_string()
                }
            }
        })
        .to_string();

    InterpolationResult { text, errors }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_braced_variable() {
        // SAFETY: tests in this module use distinct variable names
        unsafe { env::set_var("AVALANCHE_TEST_DIR", "/data/in") };
        let result = interpolate("dir: ${AVALANCHE_TEST_DIR}/2022");
        assert!(result.is_ok());
        assert_eq!(result.text, "dir: /data/in/2022");
    }

    #[test]
    fn default_applies_when_unset() {
        let result = interpolate("dir: ${AVALANCHE_TEST_UNSET:-/fallback}");
        assert!(result.is_ok());
        assert_eq!(result.text, "dir: /fallback");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let result = interpolate("dir: ${AVALANCHE_TEST_MISSING}");
        assert!(!result.is_ok());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("AVALANCHE_TEST_MISSING"));
    }

    #[test]
    fn double_dollar_escapes() {
        let result = interpolate("price: $$5");
        assert!(result.is_ok());
        assert_eq!(result.text, "price: $5");
    }

    #[test]
    fn plain_text_passes_through() {
        let result = interpolate("pattern: '*_2022_NMRC.CSV'");
        assert!(result.is_ok());
        assert_eq!(result.text, "pattern: '*_2022_NMRC.CSV'");
    }
}
