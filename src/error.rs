//! Engine error types

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Per-path validation messages, keyed by canonical path.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ─────────────────────────────────────────────────────────────
    // Form Definition Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error at '{path}': {message}")]
    Config { path: String, message: String },

    #[error("Form configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Runtime Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Validation failed for {} field(s)", .0.len())]
    Validation(FieldErrors),

    #[error("Submission failed: {message}")]
    Submission { message: String },

    #[error(transparent)]
    ArrayOp(#[from] ArrayOpError),

    #[error("Resource '{id}' failed to load: {message}")]
    Load { id: String, message: String },
}

/// Refusals from the field array controller. None of these change state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArrayOpError {
    #[error("field array '{path}' is not registered")]
    UnknownArray { path: String },

    #[error("field array '{path}' already holds the maximum of {max} items")]
    AtCapacity { path: String, max: usize },

    #[error("field array '{path}' already holds the minimum of {min} items")]
    AtMinimum { path: String, min: usize },

    #[error("index {index} is out of range for field array '{path}' ({len} items)")]
    OutOfRange {
        path: String,
        index: usize,
        len: usize,
    },
}

impl Error {
    pub fn config(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn submission(message: impl Into<String>) -> Self {
        Self::Submission {
            message: message.into(),
        }
    }

    pub fn load(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Errors caused by a malformed form definition rather than user input.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config { .. } | Error::ConfigNotFound { .. } | Error::Yaml(_)
        )
    }

    /// Single-line message suitable for a form-level error banner.
    pub fn user_message(&self) -> String {
        match self {
            Error::Validation(errors) => match errors.len() {
                1 => errors
                    .values()
                    .next()
                    .cloned()
                    .unwrap_or_else(|| self.to_string()),
                n => format!("{n} fields need attention"),
            },
            Error::Submission { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_uses_single_field_message() {
        let mut errs = FieldErrors::new();
        errs.insert("email".into(), "Required".into());
        assert_eq!(Error::Validation(errs.clone()).user_message(), "Required");
        errs.insert("name".into(), "Required".into());
        assert_eq!(
            Error::Validation(errs).user_message(),
            "2 fields need attention"
        );
    }

    #[test]
    fn configuration_errors_are_classified() {
        assert!(Error::config("items", "bad").is_configuration());
        assert!(!Error::submission("down").is_configuration());
        let arr: Error = ArrayOpError::AtCapacity {
            path: "items".into(),
            max: 3,
        }
        .into();
        assert!(arr.to_string().contains("maximum of 3"));
    }
}
