// Configuration for context propagation
//
// This module provides configuration options for the context propagator.

/// Source of the random nonce mixed into every landmark signature
pub type NonceSource = fn() -> u64;

/// Default nonce source: 63 random bits
pub fn random_nonce() -> u64 {
    rand::random::<u64>() >> 1
}

/// Configuration for the context propagator
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Number of fresh-nonce attempts made after a duplicate invocation key
    pub max_collision_retries: u32,

    /// Whether duplicate and missing keys panic instead of surfacing as
    /// errors. A missing key found while the registration is dropped during
    /// an unwind is only logged.
    pub strict_lifecycle: bool,

    /// Whether the caller's `file:line:column` is part of the landmark signature
    pub include_call_site: bool,

    /// Nonce generator for landmark signatures
    pub nonce_source: NonceSource,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_collision_retries: 3,
            strict_lifecycle: false,
            include_call_site: true,
            nonce_source: random_nonce,
        }
    }
}

impl ContextConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of collision retries
    pub fn with_max_collision_retries(mut self, retries: u32) -> Self {
        self.max_collision_retries = retries;
        self
    }

    /// Enable or disable strict lifecycle checking
    pub fn with_strict_lifecycle(mut self, enable: bool) -> Self {
        self.strict_lifecycle = enable;
        self
    }

    /// Include or omit the call site in landmark signatures
    pub fn with_call_site(mut self, enable: bool) -> Self {
        self.include_call_site = enable;
        self
    }

    /// Replace the nonce generator (deterministic nonces for tests and replay)
    pub fn with_nonce_source(mut self, source: NonceSource) -> Self {
        self.nonce_source = source;
        self
    }
}
