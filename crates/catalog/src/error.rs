//! Error types for catalog execution.
//!
//! Resource-level failures (validation, backend, prefetch, apply, generate,
//! callback) are recorded in the run report and never abort a transaction.
//! Only a dependency cycle escapes [`Transaction::evaluate`](crate::Transaction::evaluate).

use thiserror::Error;

/// Errors that can occur while building or running a catalog.
#[derive(Debug, Error)]
pub enum Error {
    /// A resource's pre-run check rejected it
    #[error("validation failed for {resource}: {message}")]
    Validation {
        /// Reference of the rejected resource
        resource: String,
        /// Message from the check
        message: String,
    },

    /// No usable backend for the resource on this system
    #[error("no usable backend for {resource} (type {resource_type})")]
    BackendUnavailable {
        /// Reference of the resource
        resource: String,
        /// Type of the resource
        resource_type: String,
    },

    /// A batch prefetch failed for a (type, backend) pair
    #[error("prefetch failed for {resource_type} backend {backend}: {message}")]
    Prefetch {
        /// Resource type of the group
        resource_type: String,
        /// Backend name of the group
        backend: String,
        /// Error reported by the backend
        message: String,
    },

    /// The harness failed while applying a resource
    #[error("could not apply {resource}: {message}")]
    Apply {
        /// Reference of the resource
        resource: String,
        /// Error reported by the harness
        message: String,
    },

    /// A resource failed to generate additional resources
    #[error("failed to generate resources from {resource}: {message}")]
    Generate {
        /// Reference of the generator
        resource: String,
        /// Error reported by the generator
        message: String,
    },

    /// A triggered callback failed
    #[error("failed to call {callback} on {resource}: {message}")]
    Callback {
        /// Reference of the target
        resource: String,
        /// Callback that was triggered
        callback: String,
        /// Error reported by the target
        message: String,
    },

    /// The relationship graph is not a DAG
    #[error("one or more resource dependency cycles detected in graph\n{message}")]
    DependencyCycle {
        /// Human-readable description of every cycle
        message: String,
        /// DOT rendering of the cycle paths
        dot: String,
    },

    /// Two resources share a reference
    #[error("duplicate resource declaration: {0}")]
    DuplicateResource(String),

    /// A relationship points at an undeclared resource
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// A relationship names a callback that does not exist
    #[error("unknown callback: {0}")]
    UnknownCallback(String),

    /// A tag does not follow tag syntax
    #[error("invalid tag: {0:?}")]
    InvalidTag(String),
}

impl Error {
    /// Whether this error aborts the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DependencyCycle { .. })
    }
}

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, Error>;
