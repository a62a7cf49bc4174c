// Context propagation error types
// These errors are raised by the identity deriver, the context registry
// and the public propagation entry points.

use std::any::Any;

use thiserror::Error;

use crate::{AmbitError, BoxError, ErrorCode, ErrorDomain};

/// Context error codes
pub mod codes {
    use crate::ErrorCode;

    // Context error codes start with 6000
    pub const NOT_IN_CONTEXT: ErrorCode = ErrorCode(6001);
    pub const CONTEXT_DESTROYED: ErrorCode = ErrorCode(6002);
    pub const DUPLICATE_KEY: ErrorCode = ErrorCode(6003);
    pub const MISSING_KEY: ErrorCode = ErrorCode(6004);
    pub const LOCK_POISONED: ErrorCode = ErrorCode(6005);
}

/// Errors raised while registering or resolving an invocation context.
///
/// Keys are carried as raw `u64` values so this crate stays free of
/// dependencies on the crates that define the key type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// No registration call is active on the current execution unit
    #[error("Context not found: not running inside with_context")]
    NotInContext,

    /// The invocation owning this key has already exited
    #[error("Context was already destroyed for invocation key {0:#018x}")]
    ContextDestroyed(u64),

    /// Another active invocation already owns this key
    #[error("Duplicate invocation key: {0:#018x}")]
    DuplicateKey(u64),

    /// Destroy was requested for a key with no entry
    #[error("Invocation key {0:#018x} wasn't found in the registry")]
    MissingKey(u64),

    /// The registry lock was poisoned
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl ContextError {
    /// The invocation key involved in this error, if any
    pub fn key(&self) -> Option<u64> {
        match self {
            ContextError::ContextDestroyed(key)
            | ContextError::DuplicateKey(key)
            | ContextError::MissingKey(key) => Some(*key),
            ContextError::NotInContext | ContextError::LockPoisoned(_) => None,
        }
    }

    /// Whether this error signals a broken store/destroy pairing rather
    /// than an expected lookup miss
    pub fn is_lifecycle_fault(&self) -> bool {
        matches!(self, ContextError::DuplicateKey(_) | ContextError::MissingKey(_))
    }
}

impl AmbitError for ContextError {
    fn error_code(&self) -> &'static str {
        match self {
            ContextError::NotInContext => "CONTEXT_NOT_IN_CONTEXT",
            ContextError::ContextDestroyed(_) => "CONTEXT_DESTROYED",
            ContextError::DuplicateKey(_) => "CONTEXT_DUPLICATE_KEY",
            ContextError::MissingKey(_) => "CONTEXT_MISSING_KEY",
            ContextError::LockPoisoned(_) => "CONTEXT_LOCK_POISONED",
        }
    }

    fn code(&self) -> ErrorCode {
        use codes::*;
        match self {
            ContextError::NotInContext => NOT_IN_CONTEXT,
            ContextError::ContextDestroyed(_) => CONTEXT_DESTROYED,
            ContextError::DuplicateKey(_) => DUPLICATE_KEY,
            ContextError::MissingKey(_) => MISSING_KEY,
            ContextError::LockPoisoned(_) => LOCK_POISONED,
        }
    }

    fn domain(&self) -> ErrorDomain {
        match self {
            ContextError::NotInContext | ContextError::ContextDestroyed(_) => ErrorDomain::Propagation,
            ContextError::DuplicateKey(_)
            | ContextError::MissingKey(_)
            | ContextError::LockPoisoned(_) => ErrorDomain::Registry,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        self.key()
            .map(|key| serde_json::json!({ "key": format!("{key:#018x}") }))
    }

    // A duplicate key can be resolved by deriving a fresh key
    fn is_transient(&self) -> bool {
        matches!(self, ContextError::DuplicateKey(_))
    }

    fn as_any(&self) -> &dyn Any { self }
}

/// Convenient Result type for context operations
pub type ContextResult<T> = Result<T, ContextError>;

/// Convert from context error to boxed error
impl From<ContextError> for BoxError {
    fn from(err: ContextError) -> Self {
        Box::new(err)
    }
}
