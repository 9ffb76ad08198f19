//! Run report - per-resource statuses and aggregate counters
//!
//! The report is owned by the transaction while it runs and handed back to
//! the caller afterwards, so it outlives the relationship graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::graph::VertexId;
use crate::types::{Event, EventStatus};

/// Why a resource was not applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Carries one of the run's skip tags
    SkipTag,
    /// Does not carry any of the run's tags
    MissingTags,
    /// Its schedule says it is not due
    NotScheduled,
    /// Something it depends on failed
    FailedDependencies,
    /// The batch prefetch for its backend failed
    PrefetchFailed,
    Virtual,
    /// Not applicable to the current host or device mode
    NotApplicable,
    /// The run was canceled before its turn
    Canceled,
}

impl SkipReason {
    /// Log line explaining the skip
    pub fn describe(&self) -> &'static str {
        match self {
            Self::SkipTag => "tagged with a skip tag",
            Self::MissingTags => "missing the requested tags",
            Self::NotScheduled => "not scheduled",
            Self::FailedDependencies => "dependencies failed",
            Self::PrefetchFailed => "provider prefetch failed",
            Self::Virtual => "virtual",
            Self::NotApplicable => "not applicable in this mode",
            Self::Canceled => "run canceled",
        }
    }
}

/// Where a resource ended up in the per-run state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Unscheduled,
    Skipped,
    Scheduled,
    Succeeded,
    Failed,
    FailedToRestart,
}

/// Status of one resource in one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub reference: String,
    pub resource_type: String,
    pub scheduled: bool,
    pub skipped: bool,
    pub skip_reason: Option<SkipReason>,
    pub failed: bool,
    pub failed_to_restart: bool,
    pub restarted: bool,
    pub changed: bool,
    pub canceled: bool,
    /// Failed resources upstream of this one
    pub failed_dependencies: BTreeSet<VertexId>,
    pub events: Vec<Event>,
    pub evaluation_time: Option<Duration>,
}

impl ResourceStatus {
    pub fn new(reference: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            resource_type: resource_type.into(),
            ..Self::default()
        }
    }

    /// Mark failed and record a failure event carrying `message`
    pub fn fail_with(&mut self, message: impl Into<String>) {
        self.failed = true;
        let event = Event::new("failure", self.reference.clone(), message).with_status(EventStatus::Failure);
        self.events.push(event);
    }

    /// Mark skipped for `reason`
    pub fn skip(&mut self, reason: SkipReason) {
        self.skipped = true;
        self.skip_reason = Some(reason);
    }

    /// True if anything upstream failed
    pub fn dependency_failed(&self) -> bool {
        !self.failed_dependencies.is_empty()
    }

    /// Current position in the per-resource state machine
    pub fn state(&self) -> ResourceState {
        if self.failed_to_restart {
            ResourceState::FailedToRestart
        } else if self.failed {
            ResourceState::Failed
        } else if self.skipped {
            ResourceState::Skipped
        } else if self.evaluation_time.is_some() {
            ResourceState::Succeeded
        } else if self.scheduled {
            ResourceState::Scheduled
        } else {
            ResourceState::Unscheduled
        }
    }
}

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Unchanged,
    Changed,
    Failed,
}

/// Aggregate counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub total: usize,
    pub scheduled: usize,
    pub applied: usize,
    pub changed: usize,
    pub failed: usize,
    pub failed_to_restart: usize,
    pub restarted: usize,
    pub skipped: usize,
    pub canceled: usize,
}

impl Metrics {
    /// Add a status to the counters
    pub fn add_status(&mut self, status: &ResourceStatus) {
        self.total += 1;
        if status.scheduled {
            self.scheduled += 1;
        }
        if status.scheduled && !status.failed {
            self.applied += 1;
        }
        if status.changed {
            self.changed += 1;
        }
        if status.failed {
            self.failed += 1;
        }
        if status.failed_to_restart {
            self.failed_to_restart += 1;
        }
        if status.restarted {
            self.restarted += 1;
        }
        if status.skipped {
            self.skipped += 1;
        }
        if status.canceled {
            self.canceled += 1;
        }
    }
}

/// Report collector for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub started_at: DateTime<Utc>,
    pub duration: Option<Duration>,
    pub status: RunStatus,
    pub metrics: Metrics,
    /// Resource types that had no usable backend, each recorded once
    pub backend_unavailable: BTreeSet<String>,
    pub resources_failed_to_generate: bool,
    statuses: BTreeMap<VertexId, ResourceStatus>,
    #[serde(skip)]
    cycle_detected: bool,
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

impl Report {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            duration: None,
            status: RunStatus::Unchanged,
            metrics: Metrics::default(),
            backend_unavailable: BTreeSet::new(),
            resources_failed_to_generate: false,
            statuses: BTreeMap::new(),
            cycle_detected: false,
        }
    }

    /// Status of a vertex, created on first use
    pub fn status_mut(&mut self, vertex: VertexId, reference: &str, resource_type: &str) -> &mut ResourceStatus {
        self.statuses
            .entry(vertex)
            .or_insert_with(|| ResourceStatus::new(reference, resource_type))
    }

    /// Status of a vertex, if it has one yet
    pub fn status(&self, vertex: VertexId) -> Option<&ResourceStatus> {
        self.statuses.get(&vertex)
    }

    /// Look a status up by resource reference
    pub fn status_for(&self, reference: &str) -> Option<&ResourceStatus> {
        self.statuses.values().find(|s| s.reference == reference)
    }

    /// All statuses, in declaration order
    pub fn statuses(&self) -> impl Iterator<Item = (VertexId, &ResourceStatus)> {
        self.statuses.iter().map(|(id, status)| (*id, status))
    }

    /// References of a status's failed dependencies
    pub fn failed_dependency_refs(&self, status: &ResourceStatus) -> Vec<String> {
        status
            .failed_dependencies
            .iter()
            .filter_map(|id| self.statuses.get(id).map(|s| s.reference.clone()))
            .collect()
    }

    /// Record that the run stopped on a dependency cycle
    pub fn mark_cycle(&mut self) {
        self.cycle_detected = true;
    }

    /// True if any resource failed or failed to restart
    pub fn any_failed(&self) -> bool {
        self.statuses.values().any(|s| s.failed || s.failed_to_restart)
    }

    /// Compute counters and the final status
    pub fn finalize(&mut self, duration: Duration) {
        self.duration = Some(duration);
        let mut metrics = Metrics::default();
        for status in self.statuses.values() {
            metrics.add_status(status);
        }
        self.metrics = metrics;
        self.status = if self.cycle_detected || self.any_failed() || self.resources_failed_to_generate {
            RunStatus::Failed
        } else if self.metrics.changed > 0 {
            RunStatus::Changed
        } else {
            RunStatus::Unchanged
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceGraph;

    fn ids(count: usize) -> Vec<VertexId> {
        let mut graph = ResourceGraph::new();
        (0..count).map(|i| graph.add_vertex(i)).collect()
    }

    #[test]
    fn test_status_created_lazily() {
        let ids = ids(1);
        let mut report = Report::new();
        assert!(report.status(ids[0]).is_none());

        report.status_mut(ids[0], "Notify[a]", "notify").changed = true;
        assert!(report.status_for("Notify[a]").unwrap().changed);
        assert_eq!(report.status(ids[0]).unwrap().resource_type, "notify");
    }

    #[test]
    fn test_state_machine() {
        let mut status = ResourceStatus::new("Exec[x]", "exec");
        assert_eq!(status.state(), ResourceState::Unscheduled);
        status.scheduled = true;
        assert_eq!(status.state(), ResourceState::Scheduled);
        status.evaluation_time = Some(Duration::from_millis(3));
        assert_eq!(status.state(), ResourceState::Succeeded);
        status.failed_to_restart = true;
        assert_eq!(status.state(), ResourceState::FailedToRestart);

        let mut skipped = ResourceStatus::new("Exec[y]", "exec");
        skipped.skip(SkipReason::Virtual);
        assert_eq!(skipped.state(), ResourceState::Skipped);
    }

    #[test]
    fn test_fail_with_records_event() {
        let mut status = ResourceStatus::new("Notify[foo]", "notify");
        status.fail_with("resource is part of a dependency cycle");
        assert!(status.failed);
        assert_eq!(status.events[0].status, EventStatus::Failure);
        assert_eq!(status.events[0].message, "resource is part of a dependency cycle");
    }

    #[test]
    fn test_finalize_status_and_metrics() {
        let ids = ids(3);
        let mut report = Report::new();
        {
            let a = report.status_mut(ids[0], "Notify[a]", "notify");
            a.scheduled = true;
            a.changed = true;
        }
        report.status_mut(ids[1], "Notify[b]", "notify").skip(SkipReason::SkipTag);
        report.finalize(Duration::from_secs(1));
        assert_eq!(report.status, RunStatus::Changed);
        assert_eq!(report.metrics.applied, 1);
        assert_eq!(report.metrics.skipped, 1);
        assert_eq!(report.metrics.total, 2);

        report.status_mut(ids[2], "Notify[c]", "notify").fail_with("boom");
        report.finalize(Duration::from_secs(1));
        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(report.metrics.failed, 1);
    }

    #[test]
    fn test_cycle_fails_the_run() {
        let mut report = Report::new();
        report.mark_cycle();
        report.finalize(Duration::ZERO);
        assert_eq!(report.status, RunStatus::Failed);
    }

    #[test]
    fn test_failed_dependency_refs() {
        let ids = ids(2);
        let mut report = Report::new();
        report.status_mut(ids[0], "Exec[a]", "exec").fail_with("boom");
        report
            .status_mut(ids[1], "Exec[b]", "exec")
            .failed_dependencies
            .insert(ids[0]);

        let status = report.status(ids[1]).unwrap().clone();
        assert_eq!(report.failed_dependency_refs(&status), vec!["Exec[a]".to_string()]);
    }

    #[test]
    fn test_report_serializes() {
        let ids = ids(1);
        let mut report = Report::new();
        report.status_mut(ids[0], "Notify[a]", "notify").changed = true;
        report.finalize(Duration::ZERO);

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"status\":\"changed\""));
        assert!(json.contains("Notify[a]"));
    }
}
