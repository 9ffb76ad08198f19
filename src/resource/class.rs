//! Class resource - groups resources; spliced out before a run

use anyhow::Result;
use catalog::{ApplyContext, ApplyOutput, Backend, NullBackend, Resource};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Class {
    pub name: String,
    pub tags: Vec<String>,
}

impl Class {
    pub fn new(name: &str, tags: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            tags,
        }
    }
}

impl Resource for Class {
    fn resource_type(&self) -> &'static str {
        "class"
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
        Ok(ApplyOutput::unchanged())
    }

    fn is_container(&self) -> bool {
        true
    }
}
