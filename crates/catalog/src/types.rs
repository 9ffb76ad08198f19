//! Core types shared by the graph, the event manager and the transaction

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Callbacks a relationship can trigger on its target
///
/// This is a closed set: targets opt in through
/// [`Resource::accepts_callback`](crate::Resource::accepts_callback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Callback {
    /// Re-run the target's refresh action (restart a service, re-run a command)
    Refresh,
}

impl Callback {
    /// Name used in logs and relationship declarations
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Callback {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "refresh" => Ok(Self::Refresh),
            other => Err(Error::UnknownCallback(other.to_string())),
        }
    }
}

/// Which events an edge forwards
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventMatch {
    /// Plain ordering edge, forwards nothing
    None,
    /// Forwards every event
    AllEvents,
    /// Forwards only events with this exact name
    Named(String),
}

impl EventMatch {
    /// Check whether an event name passes this filter
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::None => false,
            Self::AllEvents => true,
            Self::Named(expected) => expected == name,
        }
    }
}

/// Label carried by a relationship edge
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeLabel {
    pub event: EventMatch,
    pub callback: Option<Callback>,
}

impl EdgeLabel {
    /// A plain "source before target" edge
    pub fn ordering() -> Self {
        Self {
            event: EventMatch::None,
            callback: None,
        }
    }

    /// A notify/subscribe edge forwarding every event to `callback`
    pub fn notify(callback: Callback) -> Self {
        Self {
            event: EventMatch::AllEvents,
            callback: Some(callback),
        }
    }

    /// Check whether this label routes an event of the given name to a callback
    pub fn routes(&self, event_name: &str) -> Option<Callback> {
        match self.callback {
            Some(callback) if self.event.matches(event_name) => Some(callback),
            _ => None,
        }
    }

    /// True for plain ordering edges
    pub fn is_ordering(&self) -> bool {
        self.event == EventMatch::None && self.callback.is_none()
    }
}

impl Default for EdgeLabel {
    fn default() -> Self {
        Self::ordering()
    }
}

/// Outcome recorded on an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Success,
    /// The change would have happened but the run is in noop mode
    Noop,
    Failure,
}

/// A change notification produced when a resource's state changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, matched against edge labels
    pub name: String,
    /// Reference of the originating resource
    pub resource: String,
    pub message: String,
    #[serde(default)]
    pub status: EventStatus,
}

impl Event {
    pub fn new(name: impl Into<String>, resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource: resource.into(),
            message: message.into(),
            status: EventStatus::Success,
        }
    }

    /// Same event, marked with a status
    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_noop(&self) -> bool {
        self.status == EventStatus::Noop
    }
}

/// Result of applying a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// No changes needed
    NoChange,
    /// Resource was created
    Created,
    /// Resource was modified
    Modified,
    /// Resource was removed
    Removed,
    /// Apply failed
    Failed { error: String },
}

impl ApplyResult {
    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::Removed)
    }

    /// Name of the default event emitted for this change
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            Self::Created => Some("created"),
            Self::Modified => Some("changed"),
            Self::Removed => Some("removed"),
            Self::NoChange | Self::Failed { .. } => None,
        }
    }
}

/// What the resource harness hands back after an apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutput {
    pub result: ApplyResult,
    pub events: Vec<Event>,
}

impl ApplyOutput {
    /// Nothing to do
    pub fn unchanged() -> Self {
        Self {
            result: ApplyResult::NoChange,
            events: Vec::new(),
        }
    }

    /// A result with no explicit events
    pub fn from_result(result: ApplyResult) -> Self {
        Self {
            result,
            events: Vec::new(),
        }
    }

    /// Attach an event to this output
    pub fn with_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }
}

impl From<ApplyResult> for ApplyOutput {
    fn from(result: ApplyResult) -> Self {
        Self::from_result(result)
    }
}

/// Options for a transaction run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Only apply resources carrying one of these tags (empty = all)
    pub tags: Vec<String>,
    /// Never apply resources carrying one of these tags
    pub skip_tags: Vec<String>,
    /// Ignore the `tags` filter entirely
    pub ignore_tags: bool,
    /// Apply resources even when their schedule says they are not due
    pub ignore_schedules: bool,
    /// Don't make changes, just report what would happen
    pub noop: bool,
    /// Running against a remote device rather than the host
    pub device: bool,
}

impl RunOptions {
    /// True if the options restrict the run to a tag set
    pub fn filters_by_tag(&self) -> bool {
        !self.ignore_tags && !self.tags.is_empty()
    }
}
