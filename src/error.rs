//! Error types for the template compiler and cache.

use thiserror::Error;

/// Errors produced while compiling or binding a template.
///
/// Variants map onto the abstract error kinds of the compile/bind pipeline:
/// malformed templates and schema lookups abort the current compile or bind
/// and are always surfaced to the caller. The cache never stores a failed
/// compilation.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// Malformed template, unsupported composition, mismatched PK/FK arity,
    /// missing alias, or a `null` used where an explicit `IS_NULL` operator
    /// was required.
    #[error("template error: {0}")]
    Template(String),

    /// Missing primary key, or no matching foreign key between two joined
    /// record types.
    #[error("schema error: {0}")]
    Schema(String),

    /// A `BindVars` listener was set twice, or its handle was invoked with
    /// no batch listener / no registered extractors.
    #[error("state error: {0}")]
    State(String),

    /// An extractor registered on a `BindVars` handle failed; re-raised to
    /// the caller as a persistence-layer error.
    #[error("bind extraction failed: {0}")]
    RuntimeWrap(String),
}

impl TemplateError {
    pub fn template(message: impl Into<String>) -> Self {
        TemplateError::Template(message.into())
    }

    pub fn schema(message: impl Into<String>) -> Self {
        TemplateError::Schema(message.into())
    }

    pub fn state(message: impl Into<String>) -> Self {
        TemplateError::State(message.into())
    }
}

pub type Result<T> = std::result::Result<T, TemplateError>;
