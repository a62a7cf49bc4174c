// Context propagation entry points
//
// This module binds payloads to registration calls and resolves them again
// from anywhere inside the call's dynamic extent, without a handle being
// passed down the call chain.

use std::any::Any;
use std::future::Future;
use std::panic::Location;
use std::sync::{Arc, OnceLock};
use std::thread;

use tracing::{error, warn};

use ambit_error::{AmbitError, ContextError, ContextResult};

use crate::config::ContextConfig;
use crate::identity::{self, ExecutionUnit, InvocationKey, Landmark};
use crate::registry::{ContextRegistry, Payload};

static GLOBAL_PROPAGATOR: OnceLock<ContextPropagator> = OnceLock::new();

/// Context propagator for registering and resolving invocation contexts
#[derive(Debug, Clone)]
pub struct ContextPropagator {
    /// Storage for active contexts
    registry: Arc<ContextRegistry>,
    /// Collision and lifecycle policy
    config: ContextConfig,
}

impl ContextPropagator {
    /// Create a new context propagator with the given registry
    pub fn new(registry: Arc<ContextRegistry>) -> Self {
        Self::with_config(registry, ContextConfig::default())
    }

    /// Create a context propagator with an explicit configuration
    pub fn with_config(registry: Arc<ContextRegistry>, config: ContextConfig) -> Self {
        ContextPropagator { registry, config }
    }

    /// The process-wide propagator used by the free functions of this crate.
    ///
    /// Initialized on first use and never torn down; entries remove
    /// themselves when their registration call exits.
    pub fn global() -> &'static ContextPropagator {
        GLOBAL_PROPAGATOR.get_or_init(|| ContextPropagator::new(Arc::new(ContextRegistry::new())))
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Run `f` with `payload` registered as the current context.
    ///
    /// `f` runs synchronously on the calling thread. The registration is
    /// removed on every exit path, including a panic in `f`, which then
    /// propagates unchanged. Fails with `DuplicateKey` without running `f`
    /// when no free key could be derived within the configured retries.
    #[track_caller]
    pub fn with_context<P, F, R>(&self, payload: P, f: F) -> ContextResult<R>
    where
        P: Any + Send + Sync,
        F: FnOnce() -> R,
    {
        let payload: Payload = Arc::new(payload);
        let caller = Location::caller();
        let call_site = self.config.include_call_site.then_some(caller);
        let mut landmark = Landmark::new(
            ExecutionUnit::current_thread(),
            call_site,
            (self.config.nonce_source)(),
        );
        let mut attempts = 0;

        loop {
            let Some(frame) = identity::enter(landmark) else {
                warn!("landmark storage unavailable; running without a registered context");
                return Ok(f());
            };

            // The key is derived from inside the frame, exactly as nested
            // lookups will derive it.
            let key = identity::derive_key();
            if key.is_none() {
                warn!("no landmark visible inside with_context; running without a registered context");
                return Ok(f());
            }

            match self.register(key, Arc::clone(&payload)) {
                Ok(registration) => {
                    let output = f();
                    drop(registration);
                    drop(frame);
                    return Ok(output);
                }
                Err(err) if err.is_transient() && attempts < self.config.max_collision_retries => {
                    attempts += 1;
                    warn!(%key, attempts, "invocation key collision; retrying with a fresh nonce");
                    drop(frame);
                    landmark.reseed((self.config.nonce_source)());
                }
                Err(err) => return Err(self.lifecycle_fault(err)),
            }
        }
    }

    /// Async counterpart of [`with_context`](Self::with_context).
    ///
    /// The payload is registered when the returned future is first polled
    /// and removed when it completes or is dropped. Tasks spawned from
    /// inside `fut` do not inherit the context.
    #[track_caller]
    pub fn with_context_async<P, F>(
        &self,
        payload: P,
        fut: F,
    ) -> impl Future<Output = ContextResult<F::Output>>
    where
        P: Any + Send + Sync,
        F: Future,
    {
        let payload: Payload = Arc::new(payload);
        let caller = Location::caller();
        let call_site = self.config.include_call_site.then_some(caller);
        let propagator = self.clone();

        async move {
            let mut landmark = Landmark::new(
                ExecutionUnit::next_task(),
                call_site,
                (propagator.config.nonce_source)(),
            );
            let mut attempts = 0;

            let registration = loop {
                let key = landmark.key();
                match propagator.register(key, Arc::clone(&payload)) {
                    Ok(registration) => break registration,
                    Err(err) if err.is_transient()
                        && attempts < propagator.config.max_collision_retries =>
                    {
                        attempts += 1;
                        warn!(%key, attempts, "invocation key collision; retrying with a fresh nonce");
                        landmark.reseed((propagator.config.nonce_source)());
                    }
                    Err(err) => return Err(propagator.lifecycle_fault(err)),
                }
            };

            let output = identity::scope_task(landmark, fut).await;
            drop(registration);
            Ok(output)
        }
    }

    /// The payload registered by the innermost enclosing registration call
    pub fn context(&self) -> ContextResult<Payload> {
        self.lookup(identity::derive_key())
    }

    /// Capture the active invocation as a value that may outlive it
    pub fn current_handle(&self) -> ContextResult<ContextHandle> {
        let key = identity::derive_key();
        if key.is_none() {
            return Err(ContextError::NotInContext);
        }

        Ok(ContextHandle {
            key,
            registry: Arc::clone(&self.registry),
        })
    }

    fn lookup(&self, key: InvocationKey) -> ContextResult<Payload> {
        if key.is_none() {
            return Err(ContextError::NotInContext);
        }

        self.registry
            .read(key)?
            .ok_or(ContextError::ContextDestroyed(key.as_u64()))
    }

    fn register(&self, key: InvocationKey, payload: Payload) -> ContextResult<Registration> {
        self.registry.store(key, payload)?;

        Ok(Registration {
            key,
            registry: Arc::clone(&self.registry),
            strict: self.config.strict_lifecycle,
        })
    }

    fn lifecycle_fault(&self, err: ContextError) -> ContextError {
        if self.config.strict_lifecycle && err.is_lifecycle_fault() {
            panic!("{err}");
        }
        err
    }
}

/// Removes a registry entry when the registration call exits
#[derive(Debug)]
struct Registration {
    key: InvocationKey,
    registry: Arc<ContextRegistry>,
    strict: bool,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Err(err) = self.registry.destroy(self.key) {
            if self.strict && err.is_lifecycle_fault() && !thread::panicking() {
                panic!("{err}");
            }
            error!(key = %self.key, "failed to remove invocation context");
            err.log();
        }
    }
}

/// A captured reference to one invocation's context.
///
/// Resolves to the payload while the invocation is active and to
/// `ContextDestroyed` once it has exited.
#[derive(Debug, Clone)]
pub struct ContextHandle {
    key: InvocationKey,
    registry: Arc<ContextRegistry>,
}

impl ContextHandle {
    pub fn key(&self) -> InvocationKey {
        self.key
    }

    pub fn get(&self) -> ContextResult<Payload> {
        self.registry
            .read(self.key)?
            .ok_or(ContextError::ContextDestroyed(self.key.as_u64()))
    }

    /// Whether the captured invocation is still registered
    pub fn is_active(&self) -> ContextResult<bool> {
        self.registry.contains(self.key)
    }
}
