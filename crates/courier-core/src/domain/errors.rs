//! Handler errors and their classification.
//!
//! A handler reports failure by returning a `HandlerError` whose `ErrorKind`
//! decides what the default failure policy does with the message:
//! - `Retryable`: re-enqueue until the retry budget is spent, then DLQ
//! - `NonRetryable`: straight to the DLQ

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Retryable,
    NonRetryable,
}

/// Failure reported by a handler callback (or by an exception handler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    kind: ErrorKind,
    error_code: String,
    message: String,
    stack_summary: Option<String>,
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retryable, message)
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NonRetryable, message)
    }

    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let error_code = match kind {
            ErrorKind::Retryable => "HandlerError",
            ErrorKind::NonRetryable => "NonRetryableError",
        };
        Self {
            kind,
            error_code: error_code.to_string(),
            message: message.into(),
            stack_summary: None,
        }
    }

    pub fn with_code(mut self, error_code: impl Into<String>) -> Self {
        self.error_code = error_code.into();
        self
    }

    pub fn with_stack_summary(mut self, summary: impl Into<String>) -> Self {
        self.stack_summary = Some(summary.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Retryable
    }

    pub fn error_code(&self) -> &str {
        &self.error_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn stack_summary(&self) -> Option<&str> {
        self.stack_summary.as_deref()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_code, self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::non_retryable(err.to_string()).with_code("SerializationError")
    }
}
