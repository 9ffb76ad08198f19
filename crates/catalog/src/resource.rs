//! Resource contract consumed by the execution core
//!
//! A Resource is something with state that the engine converges. The core
//! never looks inside a resource: it asks for a reference, a backend, tags
//! and flags, and hands it an [`ApplyContext`] when its turn comes.

use crate::context::ApplyContext;
use crate::graph::Reference;
use crate::types::{ApplyOutput, Callback, Event};
use anyhow::Result;
use std::fmt;
use std::sync::Arc;

/// Core trait for managed resources
///
/// # Example
///
/// ```ignore
/// use catalog::{ApplyContext, ApplyOutput, ApplyResult, Backend, Resource};
/// use std::sync::Arc;
///
/// #[derive(Debug)]
/// struct Motd { backend: Arc<dyn Backend> }
///
/// impl Resource for Motd {
///     fn resource_type(&self) -> &'static str { "file" }
///     fn title(&self) -> String { "/etc/motd".into() }
///     fn backend(&self) -> Option<Arc<dyn Backend>> { Some(Arc::clone(&self.backend)) }
///
///     fn apply(&self, ctx: &mut ApplyContext) -> anyhow::Result<ApplyOutput> {
///         if ctx.noop {
///             return Ok(ApplyOutput::unchanged());
///         }
///         std::fs::write("/etc/motd", "hello\n")?;
///         Ok(ApplyResult::Modified.into())
///     }
/// }
/// ```
pub trait Resource: Send + Sync + fmt::Debug {
    /// Resource type, e.g. "file", "exec", "class"
    fn resource_type(&self) -> &'static str;

    /// Title unique within the type
    fn title(&self) -> String;

    /// Stable display reference, `Type[title]`
    fn reference(&self) -> String {
        format!("{}[{}]", capitalize(self.resource_type()), self.title())
    }

    /// Tags attached to this resource
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Validation run for every resource before anything is applied
    fn pre_run_check(&self) -> Result<()> {
        Ok(())
    }

    /// Backend able to manage this resource here, `None` if there is none
    fn backend(&self) -> Option<Arc<dyn Backend>>;

    /// Additional resources this one expands into
    ///
    /// Called once per run, right before the resource's turn.
    fn generate(&self) -> Result<Vec<Arc<dyn Resource>>> {
        Ok(Vec::new())
    }

    /// Converge the resource, reporting what changed
    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyOutput>;

    /// Whether this resource reacts to `callback`
    fn accepts_callback(&self, _callback: Callback) -> bool {
        false
    }

    /// Run a callback triggered by events from a dependency
    fn refresh(&self, _callback: Callback, _events: &[Event], _ctx: &mut ApplyContext) -> Result<()> {
        Ok(())
    }

    /// Whether this resource triggers its own refresh when it changes
    fn self_refresh(&self) -> bool {
        false
    }

    /// Whether the resource's schedule allows it to run now
    fn is_due(&self) -> bool {
        true
    }

    /// Virtual resources are declared but never applied
    fn is_virtual(&self) -> bool {
        false
    }

    fn applies_to_host(&self) -> bool {
        true
    }

    fn applies_to_device(&self) -> bool {
        false
    }

    /// Grouping constructs spliced out before execution
    fn is_container(&self) -> bool {
        false
    }
}

impl Reference for Arc<dyn Resource> {
    fn reference(&self) -> String {
        Resource::reference(self.as_ref())
    }
}

/// A boxed resource for type-erased storage
pub type SharedResource = Arc<dyn Resource>;

/// The thing that actually reads and changes system state for a resource type
pub trait Backend: Send + Sync + fmt::Debug {
    /// Backend name; prefetch is cached per (resource type, backend name)
    fn name(&self) -> &str;

    /// Read current state for every resource of one type in a single batch
    fn prefetch(&self, _resources: &[SharedResource]) -> Result<()> {
        Ok(())
    }

    /// Hook run once at the end of every run that touched this backend
    fn post_run(&self) -> Result<()> {
        Ok(())
    }
}

/// Backend for resources that manage nothing
#[derive(Debug, Default)]
pub struct NullBackend;

impl Backend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }
}

/// Stand-in vertex for an empty container
///
/// Keeps ordering through the container intact once the container itself
/// has been spliced out of the graph.
#[derive(Debug, Clone)]
pub struct Placeholder {
    container: String,
    tags: Vec<String>,
}

impl Placeholder {
    pub fn new(container: &dyn Resource) -> Self {
        Self {
            container: container.reference(),
            tags: container.tags(),
        }
    }
}

impl Resource for Placeholder {
    fn resource_type(&self) -> &'static str {
        "whit"
    }

    fn title(&self) -> String {
        self.container.clone()
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn backend(&self) -> Option<Arc<dyn Backend>> {
        Some(Arc::new(NullBackend))
    }

    fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyOutput> {
        Ok(ApplyOutput::unchanged())
    }
}

/// `file` -> `File`, `ssh_key` -> `Ssh_key`
pub fn capitalize(resource_type: &str) -> String {
    let mut chars = resource_type.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Class;

    impl Resource for Class {
        fn resource_type(&self) -> &'static str {
            "class"
        }

        fn title(&self) -> String {
            "Web".into()
        }

        fn tags(&self) -> Vec<String> {
            vec!["web".into()]
        }

        fn backend(&self) -> Option<Arc<dyn Backend>> {
            None
        }

        fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyOutput> {
            Ok(ApplyOutput::unchanged())
        }

        fn is_container(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_reference_format() {
        assert_eq!(Class.reference(), "Class[Web]");
        assert_eq!(capitalize("ssh_key"), "Ssh_key");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_placeholder_inherits_tags() {
        let placeholder = Placeholder::new(&Class);
        assert_eq!(placeholder.reference(), "Whit[Class[Web]]");
        assert_eq!(placeholder.tags(), vec!["web".to_string()]);
        assert!(placeholder.backend().is_some());
        assert!(!placeholder.is_container());
    }
}
