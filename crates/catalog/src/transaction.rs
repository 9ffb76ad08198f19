//! Transaction - one run of a relationship graph
//!
//! A transaction validates every resource, refuses graphs with dependency
//! cycles, and then walks the graph with the [scheduler](crate::scheduler),
//! deciding for each resource whether to skip it, prefetch its backend,
//! let it generate more resources, apply it and dispatch its events.
//! Resource-level failures never stop the run; they are recorded in the
//! [`Report`] and propagate to dependents as skips.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::context::{ApplyContext, CancelToken, ProgressCallback};
use crate::error::{Error, Result};
use crate::events::EventManager;
use crate::graph::{CycleReport, Direction, ResourceGraph, VertexId};
use crate::report::{Report, ResourceStatus, SkipReason};
use crate::resource::{Backend, Resource, SharedResource};
use crate::scheduler::{self, Traversal, TraversalHooks};
use crate::types::{ApplyResult, EdgeLabel, Event, EventStatus, RunOptions};

const CYCLE_MEMBER: &str = "resource is part of a dependency cycle";

/// How an evaluation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every resource had its turn
    Completed,
    /// The cancel token fired; the rest of the graph was skipped
    Canceled,
}

/// Prefetch result for one (resource type, backend name) pair
type PrefetchKey = (&'static str, String);

/// Per-run bookkeeping, kept apart from the graph so both can be borrowed
#[derive(Debug)]
struct RunState {
    options: RunOptions,
    ctx: ApplyContext,
    report: Report,
    events: EventManager,
    /// `None` for a successful prefetch, the error message otherwise
    prefetched: HashMap<PrefetchKey, Option<String>>,
    generated: HashSet<VertexId>,
    /// Tags handed down to generated resources by their generator
    inherited_tags: HashMap<VertexId, Vec<String>>,
}

/// A single run over a relationship graph
#[derive(Debug)]
pub struct Transaction {
    graph: ResourceGraph<SharedResource>,
    state: RunState,
}

impl Transaction {
    pub fn new(graph: ResourceGraph<SharedResource>, options: RunOptions) -> Self {
        let ctx = ApplyContext::new(options.noop, false);
        Self {
            graph,
            state: RunState {
                options,
                ctx,
                report: Report::new(),
                events: EventManager::new(),
                prefetched: HashMap::new(),
                generated: HashSet::new(),
                inherited_tags: HashMap::new(),
            },
        }
    }

    /// Pass `verbose` through to every apply and refresh
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.state.ctx.verbose = verbose;
        self
    }

    /// The graph, including anything generated so far
    pub fn graph(&self) -> &ResourceGraph<SharedResource> {
        &self.graph
    }

    pub fn report(&self) -> &Report {
        &self.state.report
    }

    pub fn into_report(self) -> Report {
        self.state.report
    }

    /// Run the transaction
    ///
    /// Only a dependency cycle is returned as an error; everything else
    /// that goes wrong is in the report.
    pub fn evaluate(&mut self, cancel: &CancelToken, progress: &mut dyn ProgressCallback) -> Result<Outcome> {
        let started = Instant::now();
        self.state.report.started_at = Utc::now();
        progress.on_run_start(self.graph.len());

        self.state.pre_run_checks(&self.graph);

        if let Err(cycle) = self.graph.topsort() {
            let err = self.state.fail_cycle(&self.graph, &cycle);
            self.state.teardown(&self.graph);
            self.state.report.finalize(started.elapsed());
            progress.on_run_complete();
            return Err(err);
        }

        let mut evaluation = Evaluation {
            state: &mut self.state,
            cancel,
            progress: &mut *progress,
            announced_cancel: false,
        };
        let traversal = scheduler::traverse(&mut self.graph, &mut evaluation);

        let result = match traversal {
            Traversal::Completed => Ok(Outcome::Completed),
            Traversal::Canceled => Ok(Outcome::Canceled),
            Traversal::Cycle(remaining) => {
                let remaining: BTreeSet<VertexId> = remaining.into_iter().collect();
                let cycle = CycleReport::new(&self.graph, &remaining);
                Err(self.state.fail_cycle(&self.graph, &cycle))
            }
        };

        self.state.report.finalize(started.elapsed());
        log::debug!(
            "Finished run in {:.2}s: {:?}",
            started.elapsed().as_secs_f64(),
            self.state.report.status
        );
        progress.on_run_complete();
        result
    }
}

impl RunState {
    fn status(&mut self, graph: &ResourceGraph<SharedResource>, vertex: VertexId) -> &mut ResourceStatus {
        let (reference, resource_type) = graph
            .payload(vertex)
            .map_or_else(|| (vertex.to_string(), ""), |r| (r.reference(), r.resource_type()));
        self.report.status_mut(vertex, &reference, resource_type)
    }

    fn pre_run_checks(&mut self, graph: &ResourceGraph<SharedResource>) {
        for (vertex, resource) in graph.iter() {
            self.pre_run_check(graph, vertex, resource);
        }
    }

    fn pre_run_check(&mut self, graph: &ResourceGraph<SharedResource>, vertex: VertexId, resource: &SharedResource) {
        if let Err(e) = resource.pre_run_check() {
            let err = Error::Validation {
                resource: resource.reference(),
                message: format!("{e:#}"),
            };
            log::error!("{err}");
            self.status(graph, vertex).fail_with(err.to_string());
        }
    }

    fn fail_cycle(&mut self, graph: &ResourceGraph<SharedResource>, cycle: &CycleReport) -> Error {
        let message = cycle.message(graph);
        let dot = cycle.to_dot(graph);
        for member in cycle.members() {
            self.status(graph, member).fail_with(CYCLE_MEMBER);
        }
        self.report.mark_cycle();
        let err = Error::DependencyCycle { message, dot };
        log::error!("{err}");
        err
    }

    /// Tags of a resource, including any inherited from its generator
    fn tags_of(&self, graph: &ResourceGraph<SharedResource>, vertex: VertexId) -> BTreeSet<String> {
        let own = graph.payload(vertex).map(|r| r.tags()).unwrap_or_default();
        own.into_iter()
            .chain(self.inherited_tags.get(&vertex).into_iter().flatten().cloned())
            .map(|tag| tag.to_lowercase())
            .collect()
    }

    /// Batch prefetch the first time a (type, backend) pair is touched
    fn prefetch(&mut self, graph: &ResourceGraph<SharedResource>, vertex: VertexId) {
        let Some(resource) = graph.payload(vertex) else {
            return;
        };
        let Some(backend) = resource.backend() else {
            return;
        };
        let key: PrefetchKey = (resource.resource_type(), backend.name().to_string());
        if self.prefetched.contains_key(&key) {
            return;
        }

        let batch: Vec<SharedResource> = graph
            .iter()
            .filter(|(_, r)| {
                r.resource_type() == key.0 && r.backend().is_some_and(|b| b.name() == key.1)
            })
            .map(|(_, r)| Arc::clone(r))
            .collect();
        log::debug!("Prefetching {} resources for {} ({})", batch.len(), key.0, key.1);

        let outcome = match backend.prefetch(&batch) {
            Ok(()) => None,
            Err(e) => {
                let err = Error::Prefetch {
                    resource_type: key.0.to_string(),
                    backend: key.1.clone(),
                    message: format!("{e:#}"),
                };
                log::error!("{err}");
                Some(err.to_string())
            }
        };
        self.prefetched.insert(key, outcome);
    }

    /// Prefetch error for the resource's (type, backend) pair, if any
    fn prefetch_failure(&self, resource: &SharedResource) -> Option<String> {
        let backend = resource.backend()?;
        self.prefetched
            .get(&(resource.resource_type(), backend.name().to_string()))
            .cloned()
            .flatten()
    }

    /// Let a resource expand into more resources, once per run
    ///
    /// Returns `true` if the graph changed.
    fn generate(&mut self, graph: &mut ResourceGraph<SharedResource>, vertex: VertexId) -> bool {
        if !self.generated.insert(vertex) {
            return false;
        }
        let Some(generator) = graph.payload(vertex).cloned() else {
            return false;
        };
        let reference = generator.reference();

        let children = match generator.generate() {
            Ok(children) => children,
            Err(e) => {
                let err = Error::Generate {
                    resource: reference,
                    message: format!("{e:#}"),
                };
                log::error!("{err}");
                self.status(graph, vertex).fail_with(err.to_string());
                self.report.resources_failed_to_generate = true;
                return false;
            }
        };
        if children.is_empty() {
            return false;
        }

        let tags: Vec<String> = self.tags_of(graph, vertex).into_iter().collect();
        let dependents = graph.adjacent_edges(vertex, Direction::Out);
        let existing: HashSet<String> = graph.iter().map(|(_, r)| r.reference()).collect();

        let mut added = 0;
        for child in children {
            let child_ref = child.reference();
            if existing.contains(&child_ref) {
                log::debug!("{reference}: {child_ref} is already managed, not generating it");
                continue;
            }
            let id = graph.add_vertex(Arc::clone(&child));
            self.pre_run_check(graph, id, &child);
            self.inherited_tags.insert(id, tags.clone());
            graph.add_edge(vertex, id, EdgeLabel::ordering());
            for edge in &dependents {
                graph.add_edge(id, edge.target, edge.label.clone());
            }
            added += 1;
        }

        if added > 0 {
            log::info!("{reference}: Generated {added} resources");
        }
        added > 0
    }

    /// Upstream resources that failed or were skipped for failing dependencies
    ///
    /// Every upstream vertex has had its turn by the time `vertex` is
    /// reached, so this matches the union over direct predecessors.
    fn failed_dependencies(&self, graph: &ResourceGraph<SharedResource>, vertex: VertexId) -> BTreeSet<VertexId> {
        graph
            .upstream_from(vertex)
            .iter()
            .copied()
            .filter(|upstream| {
                self.report
                    .status(*upstream)
                    .is_some_and(|s| s.failed || s.dependency_failed())
            })
            .collect()
    }

    /// Record the failed dependencies on the status; `true` if it already failed
    fn resolve_dependencies(&mut self, graph: &ResourceGraph<SharedResource>, vertex: VertexId) -> bool {
        let failed = self.failed_dependencies(graph, vertex);
        let status = self.status(graph, vertex);
        status.failed_dependencies = failed;
        status.failed
    }

    /// First reason to skip a resource, if any
    fn skip_reason(&self, graph: &ResourceGraph<SharedResource>, vertex: VertexId, resource: &SharedResource) -> Option<SkipReason> {
        let tags = self.tags_of(graph, vertex);
        let has_any = |wanted: &[String]| wanted.iter().any(|t| tags.contains(&t.to_lowercase()));

        if has_any(&self.options.skip_tags) {
            return Some(SkipReason::SkipTag);
        }
        if self.options.filters_by_tag() && !has_any(&self.options.tags) {
            return Some(SkipReason::MissingTags);
        }
        if !self.options.ignore_schedules && !resource.is_due() {
            return Some(SkipReason::NotScheduled);
        }
        if self
            .report
            .status(vertex)
            .is_some_and(ResourceStatus::dependency_failed)
        {
            return Some(SkipReason::FailedDependencies);
        }
        if self.prefetch_failure(resource).is_some() {
            return Some(SkipReason::PrefetchFailed);
        }
        if resource.is_virtual() {
            return Some(SkipReason::Virtual);
        }
        let applicable = if self.options.device {
            resource.applies_to_device()
        } else {
            resource.applies_to_host()
        };
        if !applicable {
            return Some(SkipReason::NotApplicable);
        }
        None
    }

    fn skip(&mut self, graph: &ResourceGraph<SharedResource>, vertex: VertexId, resource: &SharedResource, reason: SkipReason) {
        let reference = resource.reference();
        match reason {
            SkipReason::PrefetchFailed => {
                let message = self
                    .prefetch_failure(resource)
                    .unwrap_or_else(|| reason.describe().to_string());
                log::error!("{reference}: {message}");
                self.status(graph, vertex).fail_with(message);
            }
            SkipReason::FailedDependencies => {
                let status = self.status(graph, vertex).clone();
                let failed = self.report.failed_dependency_refs(&status);
                log::warn!("{reference}: Skipping because of failed dependencies: {}", failed.join(", "));
                self.status(graph, vertex).skip(reason);
            }
            _ => {
                log::debug!("{reference}: Skipping, {}", reason.describe());
                self.status(graph, vertex).skip(reason);
            }
        }
        self.events.dequeue_all_events_for_resource(graph, vertex);
    }

    /// Apply through the harness, then record and route the events
    fn apply(&mut self, graph: &ResourceGraph<SharedResource>, vertex: VertexId, resource: &SharedResource) {
        let reference = resource.reference();
        self.status(graph, vertex).scheduled = true;

        let output = match resource.apply(&mut self.ctx) {
            Ok(output) => output,
            Err(e) => {
                self.fail_apply(graph, vertex, &reference, format!("{e:#}"));
                return;
            }
        };
        if let ApplyResult::Failed { error } = &output.result {
            self.fail_apply(graph, vertex, &reference, error.clone());
            return;
        }

        let mut events = output.events;
        if let Some(name) = output.result.event_name()
            && events.is_empty()
        {
            events.push(Event::new(name, reference.as_str(), format!("{reference} {name}")));
        }
        if self.ctx.noop {
            for event in &mut events {
                event.status = EventStatus::Noop;
            }
        }
        for event in &events {
            if event.is_noop() {
                log::info!("{reference}: Would have {} ({})", event.name, event.message);
            } else {
                log::info!("{reference}: {}", event.message);
            }
        }

        let status = self.status(graph, vertex);
        status.changed = output.result.is_change() && !events.iter().all(Event::is_noop);
        status.events.extend(events.iter().cloned());

        self.events.queue_events(vertex, events);
        self.events.process_events(graph, vertex, &mut self.report, &mut self.ctx);
    }

    fn fail_apply(&mut self, graph: &ResourceGraph<SharedResource>, vertex: VertexId, reference: &str, message: String) {
        let err = Error::Apply {
            resource: reference.to_string(),
            message,
        };
        log::error!("{err}");
        self.status(graph, vertex).fail_with(err.to_string());
        self.events.dequeue_all_events_for_resource(graph, vertex);
    }

    /// Run every distinct backend's end-of-run hook once
    fn teardown(&mut self, graph: &ResourceGraph<SharedResource>) {
        let mut backends: BTreeMap<String, Arc<dyn Backend>> = BTreeMap::new();
        for (_, resource) in graph.iter() {
            if let Some(backend) = resource.backend() {
                backends.entry(backend.name().to_string()).or_insert(backend);
            }
        }
        for (name, backend) in backends {
            if let Err(e) = backend.post_run() {
                log::error!("Backend {name} failed its post-run hook: {e:#}");
            }
        }
    }
}

/// Traversal hooks for one `evaluate` call
struct Evaluation<'a> {
    state: &'a mut RunState,
    cancel: &'a CancelToken,
    progress: &'a mut dyn ProgressCallback,
    announced_cancel: bool,
}

impl TraversalHooks<SharedResource> for Evaluation<'_> {
    fn should_continue(&mut self) -> bool {
        if !self.cancel.is_canceled() {
            return true;
        }
        if !self.announced_cancel {
            log::warn!("Run canceled, skipping remaining resources");
            self.announced_cancel = true;
        }
        false
    }

    fn pre_process(&mut self, graph: &mut ResourceGraph<SharedResource>, vertex: VertexId) -> bool {
        self.state.prefetch(graph, vertex);
        self.state.generate(graph, vertex)
    }

    fn schedulable(&mut self, graph: &ResourceGraph<SharedResource>, vertex: VertexId) -> bool {
        let Some(resource) = graph.payload(vertex) else {
            return false;
        };
        if resource.backend().is_some() {
            return true;
        }
        // a resource the skip policy rules out never needs a backend
        self.state.resolve_dependencies(graph, vertex);
        self.state.skip_reason(graph, vertex, resource).is_some()
    }

    fn visit(&mut self, graph: &ResourceGraph<SharedResource>, vertex: VertexId) {
        let Some(resource) = graph.payload(vertex).cloned() else {
            return;
        };
        let reference = resource.reference();
        self.progress.on_resource_start(&reference);
        let started = Instant::now();

        if self.state.resolve_dependencies(graph, vertex) {
            log::debug!("{reference}: Not applying, already failed");
            self.state.events.dequeue_all_events_for_resource(graph, vertex);
        } else if let Some(reason) = self.state.skip_reason(graph, vertex, &resource) {
            self.state.skip(graph, vertex, &resource, reason);
        } else {
            self.state.apply(graph, vertex, &resource);
        }

        let status = self.state.status(graph, vertex);
        status.evaluation_time = Some(started.elapsed());
        self.progress.on_resource_complete(&reference, status);
    }

    fn unschedulable_handler(&mut self, graph: &ResourceGraph<SharedResource>, vertex: VertexId) {
        let Some(resource) = graph.payload(vertex).cloned() else {
            return;
        };
        let reference = resource.reference();
        self.progress.on_resource_start(&reference);

        let resource_type = resource.resource_type();
        if self.state.report.backend_unavailable.insert(resource_type.to_string()) {
            log::error!("No usable backend for resources of type {resource_type}");
        }
        let err = Error::BackendUnavailable {
            resource: reference.clone(),
            resource_type: resource_type.to_string(),
        };
        log::debug!("{err}");

        if !self.state.resolve_dependencies(graph, vertex) {
            self.state.status(graph, vertex).fail_with(err.to_string());
        }
        self.state.events.dequeue_all_events_for_resource(graph, vertex);

        let status = self.state.status(graph, vertex);
        self.progress.on_resource_complete(&reference, status);
    }

    fn canceled_handler(&mut self, graph: &ResourceGraph<SharedResource>, vertex: VertexId) {
        let status = self.state.status(graph, vertex);
        status.canceled = true;
        if !status.skipped {
            status.skip(SkipReason::Canceled);
        }
        self.state.events.dequeue_all_events_for_resource(graph, vertex);
    }

    fn cycle_handler(&mut self, graph: &ResourceGraph<SharedResource>, remaining: &[VertexId]) {
        log::error!("{} resources could not be ordered", remaining.len());
        for vertex in remaining {
            log::debug!("Unreachable: {}", graph.reference_of(*vertex));
        }
    }

    fn teardown(&mut self, graph: &ResourceGraph<SharedResource>) {
        self.state.teardown(graph);
    }
}
