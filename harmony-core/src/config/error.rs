//! Errors raised while loading a configuration or checking a conversation.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to turn a configuration file into a [`HarmonyConfig`](super::HarmonyConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read harmony config '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed harmony config '{}'{}: {message}", .path.display(), location(.line, .column))]
    Syntax {
        path: PathBuf,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("config references ${{{var}}} but it is not set")]
    MissingEnvVar { var: String },
}

fn location(line: &Option<usize>, column: &Option<usize>) -> String {
    match (*line, *column) {
        (Some(line), Some(column)) => format!(" at {line}:{column}"),
        (Some(line), None) => format!(" at line {line}"),
        _ => String::new(),
    }
}

/// A value that cannot be used, located by its path.
///
/// Config fields use their key (`vocab_file`); conversations use the message
/// path (`messages[2].content[0].tools.browser`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ValidationError {
    pub field_path: String,
    pub kind: ValidationErrorKind,
    /// Hint for fixing the value.
    pub context: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field_path, self.kind)?;
        if let Some(hint) = &self.context {
            write!(f, " ({hint})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationErrorKind {
    #[error("value is required")]
    RequiredFieldMissing,

    #[error("expected {expected}, found {actual:?}")]
    InvalidValue { expected: String, actual: String },

    #[error("{value:?} appears more than once")]
    DuplicateValue { value: String },

    #[error("{message}")]
    Incompatible { message: String },
}

impl ValidationError {
    pub fn new(field_path: impl Into<String>, kind: ValidationErrorKind) -> Self {
        Self {
            field_path: field_path.into(),
            kind,
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn required(field_path: impl Into<String>) -> Self {
        Self::new(field_path, ValidationErrorKind::RequiredFieldMissing)
    }

    pub fn invalid_value(
        field_path: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::new(
            field_path,
            ValidationErrorKind::InvalidValue {
                expected: expected.into(),
                actual: actual.into(),
            },
        )
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
