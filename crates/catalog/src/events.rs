//! Event routing between resources
//!
//! Events produced by a resource's apply are queued under that resource and
//! routed along every outgoing edge whose label matches. Routed events wait
//! under `(target, callback)` until the target's own turn, so the callback
//! only runs once the target's dependencies have all been evaluated and the
//! target itself was not skipped. A given callback fires at most once per
//! target per run, however many sources notify it.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::context::ApplyContext;
use crate::graph::{Direction, ResourceGraph, VertexId};
use crate::report::Report;
use crate::resource::{Resource, SharedResource};
use crate::types::{Callback, Event, EventStatus};

/// Queues events per resource and dispatches callbacks along edges
#[derive(Debug, Default)]
pub struct EventManager {
    queued: HashMap<VertexId, Vec<Event>>,
    /// Events waiting for a callback on their target
    pending: BTreeMap<(VertexId, Callback), Vec<Event>>,
    triggered: HashSet<(VertexId, Callback)>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append events under their owner
    pub fn queue_events(&mut self, owner: VertexId, events: impl IntoIterator<Item = Event>) {
        let queue = self.queued.entry(owner).or_default();
        queue.extend(events);
        if queue.is_empty() {
            self.queued.remove(&owner);
        }
    }

    /// Events currently waiting under `owner`
    pub fn queued(&self, owner: VertexId) -> &[Event] {
        self.queued.get(&owner).map_or(&[], Vec::as_slice)
    }

    /// Events waiting for `callback` to run on `target`
    pub fn pending(&self, target: VertexId, callback: Callback) -> &[Event] {
        self.pending.get(&(target, callback)).map_or(&[], Vec::as_slice)
    }

    /// Whether `callback` already fired (or would have) on `target` this run
    pub fn has_triggered(&self, target: VertexId, callback: Callback) -> bool {
        self.triggered.contains(&(target, callback))
    }

    /// Drop everything queued under, or waiting for, a resource that will not run
    ///
    /// Returns the number of events dropped.
    pub fn dequeue_all_events_for_resource(&mut self, graph: &ResourceGraph<SharedResource>, resource: VertexId) -> usize {
        let mut dropped = self.queued.remove(&resource).map_or(0, |events| events.len());
        dropped += self.take_pending(resource).values().map(Vec::len).sum::<usize>();
        if dropped > 0 {
            log::info!("{}: Unscheduling {dropped} events", graph.reference_of(resource));
        }
        dropped
    }

    /// Route the events queued under `resource`, then run its own callbacks
    ///
    /// Called at `resource`'s turn once it has been applied. Events go to
    /// the targets of matching edges and wait there; callbacks that earlier
    /// sources (or a self-refresh) routed to `resource` run now. A refresh
    /// queues a `restarted` event under `resource`, which is routed in turn.
    pub fn process_events(
        &mut self,
        graph: &ResourceGraph<SharedResource>,
        resource: VertexId,
        report: &mut Report,
        ctx: &mut ApplyContext,
    ) {
        loop {
            if let Some(events) = self.queued.remove(&resource) {
                self.route(graph, resource, &events);
            }
            let callbacks = self.take_pending(resource);
            if callbacks.is_empty() {
                break;
            }
            for ((_, callback), events) in callbacks {
                self.trigger(graph, resource, callback, &events, report, ctx);
            }
        }
    }

    fn route(&mut self, graph: &ResourceGraph<SharedResource>, source: VertexId, events: &[Event]) {
        let mut routed: BTreeMap<(VertexId, Callback), Vec<Event>> = BTreeMap::new();
        for edge in graph.adjacent_edges(source, Direction::Out) {
            for event in events {
                if let Some(callback) = edge.label.routes(&event.name) {
                    routed.entry((edge.target, callback)).or_default().push(event.clone());
                }
            }
        }

        if let Some(payload) = graph.payload(source)
            && payload.self_refresh()
            && !events.iter().any(|e| e.name == "removed")
        {
            routed
                .entry((source, Callback::Refresh))
                .or_default()
                .extend(events.iter().cloned());
        }

        for ((target, callback), matched) in routed {
            let Some(payload) = graph.payload(target) else {
                continue;
            };
            if !payload.accepts_callback(callback) {
                log::debug!("{}: does not respond to '{callback}'", payload.reference());
                continue;
            }
            if self.has_triggered(target, callback) {
                log::debug!("{}: '{callback}' already triggered this run", payload.reference());
                continue;
            }
            log::debug!(
                "{} scheduling '{callback}' of {}",
                graph.reference_of(source),
                payload.reference()
            );
            self.pending.entry((target, callback)).or_default().extend(matched);
        }
    }

    fn take_pending(&mut self, target: VertexId) -> BTreeMap<(VertexId, Callback), Vec<Event>> {
        let keys: Vec<(VertexId, Callback)> = self
            .pending
            .keys()
            .filter(|(t, _)| *t == target)
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.pending.remove(&key).map(|events| (key, events)))
            .collect()
    }

    fn trigger(
        &mut self,
        graph: &ResourceGraph<SharedResource>,
        target: VertexId,
        callback: Callback,
        events: &[Event],
        report: &mut Report,
        ctx: &mut ApplyContext,
    ) {
        let Some(payload) = graph.payload(target) else {
            return;
        };
        if !self.triggered.insert((target, callback)) {
            return;
        }
        let reference = payload.reference();

        if ctx.noop || events.iter().all(Event::is_noop) {
            log::info!("{reference}: Would have triggered '{callback}' from {} events", events.len());
            let event = Event::new("noop_restart", reference.as_str(), format!("Would have triggered '{callback}'"))
                .with_status(EventStatus::Noop);
            self.queue_events(target, [event]);
            return;
        }

        let status = report.status_mut(target, &reference, payload.resource_type());
        match payload.refresh(callback, events, ctx) {
            Ok(()) => {
                log::info!("{reference}: Triggered '{callback}' from {} events", events.len());
                status.restarted = true;
                let event = Event::new("restarted", reference.as_str(), format!("Triggered '{callback}'"));
                status.events.push(event.clone());
                self.queue_events(target, [event]);
            }
            Err(e) => {
                log::error!("{reference}: Failed to call {callback}: {e:#}");
                status.failed_to_restart = true;
                status.events.push(
                    Event::new("restart_failed", reference.as_str(), format!("{e:#}")).with_status(EventStatus::Failure),
                );
            }
        }
    }
}
