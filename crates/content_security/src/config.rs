//! Gate configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the content-policy stage does with types it cannot classify yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnsupportedContentTypes {
    /// Fail closed with a configuration error.
    #[default]
    Reject,
    /// Ask the policy service anyway, with no mime hint and no node.
    Consult,
}

/// Mixed content blocking options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixedContentConfig {
    /// Block passive content as well as active content.
    pub strict: bool,
    /// Treat insecure loads as upgradable instead of blocking them.
    pub upgrade_insecure: bool,
}

/// Content security configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Log same-origin refusals as security errors.
    pub report_sop_violations: bool,
    pub unsupported_content_types: UnsupportedContentTypes,
    pub mixed_content: MixedContentConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            report_sop_violations: true,
            unsupported_content_types: UnsupportedContentTypes::default(),
            mixed_content: MixedContentConfig::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl SecurityConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SecurityConfig::default();
        assert!(config.report_sop_violations);
        assert_eq!(config.unsupported_content_types, UnsupportedContentTypes::Reject);
        assert!(!config.mixed_content.strict);
    }

    #[test]
    fn test_partial_json() {
        let config = SecurityConfig::from_json(
            r#"{"unsupported_content_types": "consult", "mixed_content": {"strict": true}}"#,
        )
        .unwrap();
        assert_eq!(config.unsupported_content_types, UnsupportedContentTypes::Consult);
        assert!(config.mixed_content.strict);
        assert!(!config.mixed_content.upgrade_insecure);
        assert!(config.report_sop_violations);
    }

    #[test]
    fn test_invalid_json() {
        let err = SecurityConfig::from_json(r#"{"unsupported_content_types": "maybe"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"report_sop_violations": false}}"#).unwrap();

        let config = SecurityConfig::from_file(file.path()).unwrap();
        assert!(!config.report_sop_violations);

        let missing = SecurityConfig::from_file(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}
