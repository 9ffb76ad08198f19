//! # Catalog
//!
//! Execution core for converging a compiled catalog of resources.
//!
//! A catalog declares resources, relationships between them and which
//! containers hold which resources. This crate turns that into a
//! dependency graph and runs it: every resource is applied after the
//! resources it depends on, failures propagate to dependents as skips, and
//! change events are routed along relationships to trigger refreshes.
//!
//! ## Core Concepts
//!
//! - **ResourceGraph**: Directed multigraph of resources with labeled edges,
//!   cached transitive closures, cycle detection and container splicing
//! - **Scheduler**: Dependency-ordered traversal with mutation-tolerant
//!   in-degree bookkeeping
//! - **EventManager**: Routes events to callbacks, at most once per target
//! - **Transaction**: One run - skip policy, prefetch, generation, apply,
//!   failure propagation, cancellation and teardown
//! - **Report**: Per-resource statuses and run metrics
//!
//! ## Example
//!
//! ```ignore
//! use catalog::{CancelToken, Catalog, EdgeLabel, Callback, NoProgress, RunOptions, Transaction};
//!
//! let mut catalog = Catalog::new();
//! catalog.add_resource(config_file)?;
//! catalog.add_resource(service)?;
//! catalog.add_relationship("File[/etc/app.conf]", "Exec[restart-app]", EdgeLabel::notify(Callback::Refresh))?;
//!
//! let mut transaction = Transaction::new(catalog.relationship_graph(), RunOptions::default());
//! transaction.evaluate(&CancelToken::new(), &mut NoProgress)?;
//! let report = transaction.into_report();
//! ```
//!
//! ## Provider Traits
//!
//! - [`Resource`]: Something with state to converge
//! - [`Backend`]: Reads and changes system state for a resource type
//! - [`ProgressCallback`]: Receives progress updates
//!
//! The crate does no I/O of its own, so any front end can drive it.

pub mod catalog;
pub mod context;
pub mod error;
pub mod events;
pub mod graph;
pub mod report;
pub mod resource;
pub mod scheduler;
pub mod transaction;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use catalog::{Catalog, Relationship};
pub use context::{ApplyContext, CancelToken, NoProgress, ProgressCallback};
pub use error::{Error, Result};
pub use events::EventManager;
pub use graph::{CycleReport, Direction, Edge, Reference, ResourceGraph, VertexId};
pub use report::{Metrics, Report, ResourceState, ResourceStatus, RunStatus, SkipReason};
pub use resource::{Backend, NullBackend, Placeholder, Resource, SharedResource, capitalize};
pub use scheduler::{Traversal, TraversalHooks, traverse};
pub use transaction::{Outcome, Transaction};
pub use types::{ApplyOutput, ApplyResult, Callback, EdgeLabel, Event, EventMatch, EventStatus, RunOptions};
