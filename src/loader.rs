//! TOML catalog loader
//!
//! A catalog file declares resources of the built-in types and the
//! relationships between them:
//!
//! ```toml
//! [[resource]]
//! type = "file"
//! title = "~/.config/app/app.conf"
//! content = "port = 8080\n"
//! notify = ["Exec[reload app]"]
//!
//! [[resource]]
//! type = "exec"
//! title = "reload app"
//! command = "pkill -HUP app"
//! refreshonly = true
//!
//! [[resource]]
//! type = "class"
//! title = "app"
//! contains = ["File[~/.config/app/app.conf]", "Exec[reload app]"]
//!
//! [[relationship]]
//! source = "Exec[reload app]"
//! target = "Notify[done]"
//! event = "executed_command"
//! callback = "refresh"
//! ```
//!
//! Every resource is tagged with its type and with the titles of the
//! classes containing it, directly or through other classes.

use anyhow::{Context, Result};
use catalog::{Callback, Catalog, EdgeLabel, EventMatch, SharedResource, capitalize};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use thiserror::Error;

use crate::config;
use crate::paths;
use crate::resource::{Class, Ensure, Exec, File, FileBackend, Notify, ShellBackend};

static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z0-9_:]*)\[(.+)\]\s*$").expect("reference pattern is valid")
});

/// Problems in a catalog file that TOML parsing alone does not catch
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unknown resource type '{kind}' for '{title}'")]
    UnknownType { kind: String, title: String },

    #[error("{resource} does not accept parameter '{parameter}'")]
    InvalidParameter { resource: String, parameter: &'static str },

    #[error("{0} is not a class and cannot contain resources")]
    NotAContainer(String),

    #[error("malformed resource reference '{0}', expected Type[title]")]
    MalformedReference(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    #[serde(default)]
    resource: Vec<ResourceDecl>,
    #[serde(default)]
    relationship: Vec<RelationshipDecl>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceDecl {
    #[serde(rename = "type")]
    kind: String,
    title: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    require: Vec<String>,
    #[serde(default)]
    before: Vec<String>,
    #[serde(default)]
    notify: Vec<String>,
    #[serde(default)]
    subscribe: Vec<String>,
    #[serde(default)]
    contains: Vec<String>,

    // notify
    message: Option<String>,

    // file
    ensure: Option<Ensure>,
    content: Option<String>,
    source: Option<String>,
    recurse: Option<bool>,

    // exec
    command: Option<String>,
    refresh: Option<String>,
    refreshonly: Option<bool>,
    cwd: Option<String>,
    creates: Option<String>,
}

impl ResourceDecl {
    /// Type-specific parameters that were set
    fn parameters(&self) -> Vec<&'static str> {
        let set = [
            ("message", self.message.is_some()),
            ("ensure", self.ensure.is_some()),
            ("content", self.content.is_some()),
            ("source", self.source.is_some()),
            ("recurse", self.recurse.is_some()),
            ("command", self.command.is_some()),
            ("refresh", self.refresh.is_some()),
            ("refreshonly", self.refreshonly.is_some()),
            ("cwd", self.cwd.is_some()),
            ("creates", self.creates.is_some()),
            ("contains", !self.contains.is_empty()),
        ];
        set.into_iter().filter(|(_, on)| *on).map(|(name, _)| name).collect()
    }

    fn accepted(&self) -> &'static [&'static str] {
        match self.kind.as_str() {
            "notify" => &["message"],
            "file" => &["ensure", "content", "source", "recurse"],
            "exec" => &["command", "refresh", "refreshonly", "cwd", "creates"],
            "class" => &["contains"],
            _ => &[],
        }
    }

    /// Title as the resource will see it; file paths are expanded
    fn resolved_title(&self) -> String {
        resolve_title(&self.kind, &self.title)
    }

    fn reference(&self) -> String {
        format!("{}[{}]", capitalize(&self.kind), self.resolved_title())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RelationshipDecl {
    source: String,
    target: String,
    /// Forward only events with this name; all events when unset
    event: Option<String>,
    callback: Option<String>,
}

impl RelationshipDecl {
    fn label(&self) -> catalog::Result<EdgeLabel> {
        let callback = self
            .callback
            .as_deref()
            .map(str::parse::<Callback>)
            .transpose()?;
        let event = match (&self.event, callback) {
            (_, None) => EventMatch::None,
            (Some(name), Some(_)) => EventMatch::Named(name.clone()),
            (None, Some(_)) => EventMatch::AllEvents,
        };
        Ok(EdgeLabel { event, callback })
    }
}

/// Shared backends handed to the resources of one catalog
struct Backends {
    files: Arc<FileBackend>,
    shell: Option<Arc<ShellBackend>>,
}

fn resolve_title(kind: &str, title: &str) -> String {
    if kind == "file" {
        paths::expand(title).to_string_lossy().to_string()
    } else {
        title.to_string()
    }
}

/// Normalize `exec[x]` or `File[~/a]` to the reference the catalog uses
fn parse_reference(raw: &str) -> Result<String, LoadError> {
    let captures = REFERENCE_PATTERN
        .captures(raw)
        .ok_or_else(|| LoadError::MalformedReference(raw.to_string()))?;
    let kind = captures[1].to_lowercase();
    let title = resolve_title(&kind, &captures[2]);
    Ok(format!("{}[{title}]", capitalize(&kind)))
}

/// Load a catalog from a TOML file
pub fn load(path: &Path) -> Result<Catalog> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Could not read catalog {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid catalog in {}", path.display()))
}

/// Build a catalog from TOML text
pub fn parse(content: &str) -> Result<Catalog> {
    let file: CatalogFile = toml::from_str(content).context("Invalid TOML format")?;
    let backends = Backends {
        files: FileBackend::new(),
        shell: ShellBackend::detect(),
    };
    if backends.shell.is_none() {
        log::warn!("No POSIX shell found, exec resources will not run");
    }

    let enclosing = enclosing_classes(&file.resource)?;
    let mut catalog = Catalog::new();
    for decl in &file.resource {
        let reference = decl.reference();
        let mut tags = config::normalize(&decl.tags)
            .with_context(|| format!("Invalid tags on {reference}"))?;
        tags.push(decl.kind.clone());
        if decl.kind == "class" {
            tags.extend(config::validate_tag(&decl.title).ok());
        }
        for class in enclosing.get(&reference).into_iter().flatten() {
            tags.extend(config::validate_tag(class).ok());
        }
        tags.sort();
        tags.dedup();

        let resource = build(decl, tags, &backends)?;
        catalog.add_resource(resource)?;
    }

    for decl in &file.resource {
        let reference = decl.reference();
        for other in &decl.require {
            catalog.add_relationship(&parse_reference(other)?, &reference, EdgeLabel::ordering())?;
        }
        for other in &decl.before {
            catalog.add_relationship(&reference, &parse_reference(other)?, EdgeLabel::ordering())?;
        }
        for other in &decl.notify {
            catalog.add_relationship(
                &reference,
                &parse_reference(other)?,
                EdgeLabel::notify(Callback::Refresh),
            )?;
        }
        for other in &decl.subscribe {
            catalog.add_relationship(
                &parse_reference(other)?,
                &reference,
                EdgeLabel::notify(Callback::Refresh),
            )?;
        }
        for child in &decl.contains {
            catalog.contain(&reference, &parse_reference(child)?)?;
        }
    }

    for relationship in &file.relationship {
        let label = relationship.label()?;
        catalog.add_relationship(
            &parse_reference(&relationship.source)?,
            &parse_reference(&relationship.target)?,
            label,
        )?;
    }

    log::debug!(
        "Loaded {} resources and {} relationships",
        catalog.len(),
        catalog.relationships().len()
    );
    Ok(catalog)
}

/// Titles of every class containing each resource, innermost first
fn enclosing_classes(decls: &[ResourceDecl]) -> Result<HashMap<String, Vec<String>>> {
    let mut parent: HashMap<String, (String, String)> = HashMap::new();
    for decl in decls.iter().filter(|d| !d.contains.is_empty()) {
        if decl.kind != "class" {
            return Err(LoadError::NotAContainer(decl.reference()).into());
        }
        for child in &decl.contains {
            parent.insert(parse_reference(child)?, (decl.reference(), decl.title.clone()));
        }
    }

    let mut enclosing = HashMap::new();
    for reference in parent.keys() {
        let mut classes = Vec::new();
        let mut current = reference;
        while let Some((container, title)) = parent.get(current) {
            if classes.contains(title) {
                break;
            }
            classes.push(title.clone());
            current = container;
        }
        enclosing.insert(reference.clone(), classes);
    }
    Ok(enclosing)
}

fn build(decl: &ResourceDecl, tags: Vec<String>, backends: &Backends) -> Result<SharedResource> {
    let accepted = decl.accepted();
    if accepted.is_empty() {
        return Err(LoadError::UnknownType {
            kind: decl.kind.clone(),
            title: decl.title.clone(),
        }
        .into());
    }
    if let Some(parameter) = decl.parameters().into_iter().find(|p| !accepted.contains(p)) {
        return Err(LoadError::InvalidParameter {
            resource: decl.reference(),
            parameter,
        }
        .into());
    }

    let resource: SharedResource = match decl.kind.as_str() {
        "notify" => Arc::new(Notify::new(&decl.title, decl.message.as_deref(), tags)),
        "file" => {
            let mut file = File::new(decl.resolved_title(), &backends.files);
            file.ensure = decl.ensure.unwrap_or_default();
            file.content.clone_from(&decl.content);
            file.source = decl.source.as_deref().map(paths::expand);
            file.recurse = decl.recurse.unwrap_or(false);
            file.tags = tags;
            Arc::new(file)
        }
        "exec" => {
            let mut exec = Exec::new(&decl.title, backends.shell.clone());
            if let Some(command) = &decl.command {
                exec.command.clone_from(command);
            }
            exec.refresh.clone_from(&decl.refresh);
            exec.refreshonly = decl.refreshonly.unwrap_or(false);
            exec.cwd = decl.cwd.as_deref().map(paths::expand);
            exec.creates = decl.creates.as_deref().map(paths::expand);
            exec.tags = tags;
            Arc::new(exec)
        }
        _ => Arc::new(Class::new(&decl.title, tags)),
    };
    Ok(resource)
}

/// Default catalog path when none is given: `catalog.toml` in the config dir
pub fn default_path() -> Result<PathBuf> {
    Ok(paths::config_dir()?.join("catalog.toml"))
}
