//! Apply context, cancellation and progress reporting
//!
//! These types let the catalog crate be driven by any front end without
//! depending on a specific terminal UI or signal handling setup.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::report::ResourceStatus;

/// Context passed to resource apply and refresh operations
#[derive(Debug, Clone, Default)]
pub struct ApplyContext {
    /// Whether this is a noop run (no actual changes)
    pub noop: bool,
    /// Whether to output verbose information
    pub verbose: bool,
}

impl ApplyContext {
    /// Create a new apply context
    pub fn new(noop: bool, verbose: bool) -> Self {
        Self { noop, verbose }
    }
}

/// Cooperative cancellation flag
///
/// Cloned handles share the same flag, so one can be kept by a signal
/// handler or another thread while the transaction polls its own copy
/// between resources.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    canceled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the run stop before the next resource
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

/// Progress callback for transaction runs
///
/// Implement this trait to receive progress updates during evaluation.
pub trait ProgressCallback {
    /// Called once with the number of resources about to be traversed
    fn on_run_start(&mut self, total: usize);

    /// Called when a resource's turn begins
    fn on_resource_start(&mut self, reference: &str);

    /// Called when a resource's turn ends, whatever happened to it
    fn on_resource_complete(&mut self, reference: &str, status: &ResourceStatus);

    /// Called after teardown
    fn on_run_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _total: usize) {}
    fn on_resource_start(&mut self, _reference: &str) {}
    fn on_resource_complete(&mut self, _reference: &str, _status: &ResourceStatus) {}
    fn on_run_complete(&mut self) {}
}
