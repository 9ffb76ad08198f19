//! Notify resource - always reports a change carrying its message

use anyhow::Result;
use catalog::{
    ApplyContext, ApplyOutput, ApplyResult, Backend, Callback, Event, NullBackend, Resource,
};
use std::sync::Arc;

/// A message to record on every run
#[derive(Debug, Clone)]
pub struct Notify {
    pub name: String,
    pub message: String,
    pub tags: Vec<String>,
}

impl Notify {
    pub fn new(name: &str, message: Option<&str>, tags: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            message: message.unwrap_or(name).to_string(),
            tags,
        }
    }
}

impl Resource for Notify {
    fn resource_type(&self) -> &'static str {
        "notify"
    }

    fn title(&self) -> String {
        self.name.clone()
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn backend(&self) -> Option<Arc<dyn Backend>> {
        Some(Arc::new(NullBackend))
    }

    fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyOutput> {
        let event = Event::new("changed", self.reference(), format!("defined 'message' as '{}'", self.message));
        Ok(ApplyOutput::from_result(ApplyResult::Modified).with_event(event))
    }

    fn accepts_callback(&self, callback: Callback) -> bool {
        callback == Callback::Refresh
    }

    fn refresh(&self, _callback: Callback, events: &[Event], _ctx: &mut ApplyContext) -> Result<()> {
        log::info!("{}: {} (refreshed by {} events)", self.reference(), self.message, events.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_defaults_to_title() {
        let notify = Notify::new("hello world", None, Vec::new());
        assert_eq!(notify.message, "hello world");
        assert_eq!(notify.reference(), "Notify[hello world]");
    }

    #[test]
    fn test_always_changes() {
        let notify = Notify::new("motd", Some("hi"), vec!["notify".into()]);
        let output = notify.apply(&mut ApplyContext::default()).unwrap();
        assert_eq!(output.result, ApplyResult::Modified);
        assert_eq!(output.events[0].message, "defined 'message' as 'hi'");
        assert_eq!(output.events[0].resource, "Notify[motd]");
    }
}
