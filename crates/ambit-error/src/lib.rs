// Ambit Error Handling Framework
// Central location for error types, traits, and handling utilities

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;

// Re-export common error handling tools for convenience
pub use anyhow;
pub use thiserror;

mod context;

pub use context::{codes, ContextError, ContextResult};

/// Error domains representing different components of the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorDomain {
    Identity, Registry, Propagation, Telemetry, External,
}
impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDomain::Identity => write!(f, "identity"),
            ErrorDomain::Registry => write!(f, "registry"),
            ErrorDomain::Propagation => write!(f, "propagation"),
            ErrorDomain::Telemetry => write!(f, "telemetry"),
            ErrorDomain::External => write!(f, "external"),
        }
    }
}

/// Error code structure for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ErrorCode(pub u32);
impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// Standard error message format for serialization
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorMessage {
    pub code: ErrorCode,
    pub domain: ErrorDomain,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Base trait for all errors raised by the Ambit crates.
pub trait AmbitError: StdError + fmt::Debug + fmt::Display + Send + Sync + Any + 'static {
    /// Returns a unique static string code for this error type.
    fn error_code(&self) -> &'static str;

    /// Numeric code used in serialized error messages.
    fn code(&self) -> ErrorCode;

    /// Component the error originated from.
    fn domain(&self) -> ErrorDomain;

    /// Structured details attached to serialized messages (optional).
    fn details(&self) -> Option<serde_json::Value> { None }

    /// Indicates if the error is temporary and retrying might succeed (optional).
    fn is_transient(&self) -> bool { false }

    /// Converts the error into a boxed trait object.
    fn into_boxed(self) -> BoxError where Self: Sized { Box::new(self) }

    /// Builds the serializable representation of this error.
    fn to_message(&self) -> ErrorMessage {
        ErrorMessage {
            code: self.code(),
            domain: self.domain(),
            message: self.to_string(),
            details: self.details(),
        }
    }

    /// Emits the error through `tracing` with its code and domain attached.
    fn log(&self) {
        tracing::error!(
            code = self.error_code(),
            domain = %self.domain(),
            "{}", self
        );
    }

    /// Returns this error as a `&dyn Any` to allow downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Shorthand for a boxed AmbitError
pub type BoxError = Box<dyn AmbitError>;
/// Standard Result type using BoxError
pub type Result<T> = std::result::Result<T, BoxError>;
