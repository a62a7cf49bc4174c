//! Implicit per-invocation context propagation.
//!
//! [`with_context`] binds a payload to one invocation of a unit of work;
//! any code running inside that unit, however deeply nested, reads it back
//! with [`context`] without a handle being threaded through its signature.
//!
//! ```
//! let seen = ambit_context::with_context("request-42", || {
//!     let payload = ambit_context::context().unwrap();
//!     *payload.downcast_ref::<&str>().unwrap()
//! })
//! .unwrap();
//! assert_eq!(seen, "request-42");
//! ```

pub mod config;
pub mod identity;
pub mod propagation;
pub mod registry;
pub mod telemetry;

use std::any::Any;
use std::future::Future;

pub use ambit_error::{ContextError, ContextResult};
pub use config::ContextConfig;
pub use identity::{derive_key, frame_signature, InvocationKey};
pub use propagation::{ContextHandle, ContextPropagator};
pub use registry::{ContextRegistry, Payload};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run `f` with `payload` as its context, using the process-wide registry
#[track_caller]
pub fn with_context<P, F, R>(payload: P, f: F) -> ContextResult<R>
where
    P: Any + Send + Sync,
    F: FnOnce() -> R,
{
    ContextPropagator::global().with_context(payload, f)
}

/// Run `fut` with `payload` as its context, using the process-wide registry
#[track_caller]
pub fn with_context_async<P, F>(payload: P, fut: F) -> impl Future<Output = ContextResult<F::Output>>
where
    P: Any + Send + Sync,
    F: Future,
{
    ContextPropagator::global().with_context_async(payload, fut)
}

/// The payload of the innermost enclosing registration call
pub fn context() -> ContextResult<Payload> {
    ContextPropagator::global().context()
}

/// Capture the active invocation so it can be resolved later
pub fn current_handle() -> ContextResult<ContextHandle> {
    ContextPropagator::global().current_handle()
}
