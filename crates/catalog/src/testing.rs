//! Mock resources and backends for tests

use anyhow::{Result, bail};
use std::sync::{Arc, Mutex};

use crate::context::ApplyContext;
use crate::resource::{Backend, Resource, SharedResource};
use crate::types::{ApplyOutput, ApplyResult, Callback, Event};

/// Shared, ordered log of everything the mocks were asked to do
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().expect("journal lock").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("journal lock").clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

#[derive(Debug)]
pub struct MockBackend {
    pub name: &'static str,
    pub fail_prefetch: bool,
    pub fail_post_run: bool,
    pub journal: Journal,
}

impl MockBackend {
    pub fn new(name: &'static str, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail_prefetch: false,
            fail_post_run: false,
            journal: journal.clone(),
        })
    }

    pub fn failing_prefetch(name: &'static str, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail_prefetch: true,
            fail_post_run: false,
            journal: journal.clone(),
        })
    }

    pub fn failing_post_run(name: &'static str, journal: &Journal) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail_prefetch: false,
            fail_post_run: true,
            journal: journal.clone(),
        })
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn prefetch(&self, resources: &[SharedResource]) -> Result<()> {
        self.journal
            .record(format!("prefetch:{}:{}", self.name, resources.len()));
        if self.fail_prefetch {
            bail!("cannot list {}", self.name);
        }
        Ok(())
    }

    fn post_run(&self) -> Result<()> {
        self.journal.record(format!("post_run:{}", self.name));
        if self.fail_post_run {
            bail!("post run failed for {}", self.name);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Change,
    NoChange,
    Fail,
    Error,
    Remove,
}

#[derive(Debug)]
pub struct Mock {
    pub title: String,
    pub kind: &'static str,
    pub outcome: Outcome,
    pub events: usize,
    pub tags: Vec<String>,
    pub backend: Option<Arc<dyn Backend>>,
    pub accepts_refresh: bool,
    pub refresh_fails: bool,
    pub self_refresh: bool,
    pub due: bool,
    pub virtual_: bool,
    pub host: bool,
    pub device: bool,
    pub container: bool,
    pub pre_check_fails: bool,
    pub children: Vec<SharedResource>,
    pub generate_fails: bool,
    pub journal: Journal,
}

impl Mock {
    pub fn new(title: &str, journal: &Journal) -> Self {
        Self {
            title: title.to_string(),
            kind: "mock",
            outcome: Outcome::Change,
            events: 1,
            tags: Vec::new(),
            backend: Some(MockBackend::new("default", journal)),
            accepts_refresh: true,
            refresh_fails: false,
            self_refresh: false,
            due: true,
            virtual_: false,
            host: true,
            device: false,
            container: false,
            pre_check_fails: false,
            children: Vec::new(),
            generate_fails: false,
            journal: journal.clone(),
        }
    }

    pub fn outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn events(mut self, count: usize) -> Self {
        self.events = count;
        self
    }

    pub fn tagged(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn backend(mut self, backend: Option<Arc<dyn Backend>>) -> Self {
        self.backend = backend;
        self
    }

    pub fn kind(mut self, kind: &'static str) -> Self {
        self.kind = kind;
        self
    }

    pub fn with(mut self, configure: impl FnOnce(&mut Self)) -> Self {
        configure(&mut self);
        self
    }

    pub fn shared(self) -> SharedResource {
        Arc::new(self)
    }
}

impl Resource for Mock {
    fn resource_type(&self) -> &'static str {
        self.kind
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn pre_run_check(&self) -> Result<()> {
        if self.pre_check_fails {
            bail!("{} is invalid", self.title);
        }
        Ok(())
    }

    fn backend(&self) -> Option<Arc<dyn Backend>> {
        self.backend.clone()
    }

    fn generate(&self) -> Result<Vec<SharedResource>> {
        if self.generate_fails {
            bail!("cannot expand {}", self.title);
        }
        Ok(self.children.clone())
    }

    fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyOutput> {
        self.journal.record(format!("apply:{}", self.title));
        let reference = self.reference();
        let result = match self.outcome {
            Outcome::Change => ApplyResult::Modified,
            Outcome::NoChange => ApplyResult::NoChange,
            Outcome::Remove => ApplyResult::Removed,
            Outcome::Fail => ApplyResult::Failed {
                error: "mock failure".into(),
            },
            Outcome::Error => bail!("harness exploded"),
        };
        let events = match result.event_name() {
            Some(name) => (0..self.events)
                .map(|i| Event::new(name, reference.clone(), format!("change {i}")))
                .collect(),
            None => Vec::new(),
        };
        Ok(ApplyOutput { result, events })
    }

    fn accepts_callback(&self, callback: Callback) -> bool {
        callback == Callback::Refresh && self.accepts_refresh
    }

    fn refresh(&self, callback: Callback, events: &[Event], _ctx: &mut ApplyContext) -> Result<()> {
        self.journal
            .record(format!("{callback}:{}:{}", self.title, events.len()));
        if self.refresh_fails {
            bail!("restart of {} failed", self.title);
        }
        Ok(())
    }

    fn self_refresh(&self) -> bool {
        self.self_refresh
    }

    fn is_due(&self) -> bool {
        self.due
    }

    fn is_virtual(&self) -> bool {
        self.virtual_
    }

    fn applies_to_host(&self) -> bool {
        self.host
    }

    fn applies_to_device(&self) -> bool {
        self.device
    }

    fn is_container(&self) -> bool {
        self.container
    }
}
