//! Sandbox error types.

use thiserror::Error;

use crate::dice::RollError;
use crate::game::GameError;

/// Every way a single sandbox evaluation can fail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SandboxError {
    #[error("syntax not allowed: {0}")]
    SyntaxRejected(String),

    #[error("execution limit exceeded: {requested} more iterations after {used} (limit {limit})")]
    IterationBudgetExceeded {
        used: usize,
        requested: usize,
        limit: usize,
    },

    #[error("unequal unpack: {names} names, {values} values")]
    UnpackArityMismatch { names: usize, values: usize },

    #[error("assignment to {0} is not allowed")]
    UnknownAssignmentTarget(String),

    #[error("{0}() requires a character")]
    MissingCapability(String),

    #[error("variable name `{0}` contains an invalid character")]
    InvalidVariableName(String),

    #[error("name `{0}` is not defined")]
    UndefinedName(String),

    #[error("function `{0}` is not defined")]
    UnknownFunction(String),

    #[error("type error: {0}")]
    TypeMismatch(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("index out of range: {0}")]
    IndexOutOfRange(i64),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("value too large: {0}")]
    ValueTooLarge(String),

    #[error("{function}: {message}")]
    BadArgument { function: String, message: String },

    /// Raised by the `err()` builtin.
    #[error("{0}")]
    Raised(String),

    #[error(transparent)]
    Roll(#[from] RollError),

    #[error(transparent)]
    Game(#[from] GameError),
}

impl SandboxError {
    pub(crate) fn bad_arg(function: &str, message: impl Into<String>) -> Self {
        SandboxError::BadArgument {
            function: function.to_owned(),
            message: message.into(),
        }
    }
}

/// The public face of a failed evaluation or interpolation: the offending
/// text plus the underlying cause.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("error evaluating `{text}`: {source}")]
pub struct EvaluationError {
    pub text: String,
    #[source]
    pub source: SandboxError,
}

impl EvaluationError {
    pub fn new(text: impl Into<String>, source: SandboxError) -> Self {
        EvaluationError {
            text: text.into(),
            source,
        }
    }

    /// The underlying sandbox failure.
    pub fn cause(&self) -> &SandboxError {
        &self.source
    }
}
