//! File resource - regular files, directories and recursive copies
//!
//! Contents are compared by blake3 digest. The `posix` backend reads the
//! digests of every managed path in one prefetch pass and forgets them once
//! the run is over.

use anyhow::{Context, Result, bail};
use catalog::{
    ApplyContext, ApplyOutput, ApplyResult, Backend, Event, Resource, SharedResource,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use walkdir::WalkDir;

use crate::ui;

/// Desired state of a path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    #[default]
    File,
    Directory,
    Absent,
}

/// Digest cache shared by every file resource of a run
#[derive(Debug, Default)]
pub struct FileBackend {
    digests: Mutex<HashMap<PathBuf, Option<blake3::Hash>>>,
}

impl FileBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current digest of a path; `None` for anything that is not a readable file
    fn digest(&self, path: &Path) -> Option<blake3::Hash> {
        let cached = self
            .digests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .copied();
        match cached {
            Some(digest) => digest,
            None => digest_of(path),
        }
    }

    fn remember(&self, path: &Path, digest: Option<blake3::Hash>) {
        self.digests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), digest);
    }

    #[cfg(test)]
    fn cached(&self) -> usize {
        self.digests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn digest_of(path: &Path) -> Option<blake3::Hash> {
    if !path.is_file() {
        return None;
    }
    fs::read(path).ok().map(|bytes| blake3::hash(&bytes))
}

impl Backend for FileBackend {
    fn name(&self) -> &str {
        "posix"
    }

    fn prefetch(&self, resources: &[SharedResource]) -> Result<()> {
        let mut digests = self.digests.lock().unwrap_or_else(PoisonError::into_inner);
        for resource in resources {
            let path = PathBuf::from(resource.title());
            let digest = digest_of(&path);
            digests.insert(path, digest);
        }
        log::debug!("Prefetched {} file digests", digests.len());
        Ok(())
    }

    fn post_run(&self) -> Result<()> {
        self.digests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

/// A managed path
#[derive(Debug, Clone)]
pub struct File {
    pub path: PathBuf,
    pub ensure: Ensure,
    /// Literal content of the file
    pub content: Option<String>,
    /// Copy content from this path instead
    pub source: Option<PathBuf>,
    /// Mirror every entry below a source directory
    pub recurse: bool,
    pub tags: Vec<String>,
    backend: Arc<FileBackend>,
}

impl File {
    pub fn new(path: impl AsRef<Path>, backend: &Arc<FileBackend>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ensure: Ensure::default(),
            content: None,
            source: None,
            recurse: false,
            tags: Vec::new(),
            backend: Arc::clone(backend),
        }
    }

    /// Bytes the file should hold
    fn desired_content(&self) -> Result<Vec<u8>> {
        match (&self.content, &self.source) {
            (Some(content), _) => Ok(content.clone().into_bytes()),
            (None, Some(source)) => fs::read(source)
                .with_context(|| format!("Could not read source {}", source.display())),
            (None, None) => Ok(Vec::new()),
        }
    }

    /// A recursive copy's root is a directory
    fn wants_directory(&self) -> bool {
        self.ensure == Ensure::Directory
            || (self.recurse && self.source.as_ref().is_some_and(|s| s.is_dir()))
    }

    fn ensure_absent(&self, ctx: &ApplyContext) -> Result<ApplyOutput> {
        let path = &self.path;
        if !path.exists() && !path.is_symlink() {
            return Ok(ApplyOutput::unchanged());
        }
        if !ctx.noop {
            if path.is_dir() && !path.is_symlink() {
                fs::remove_dir_all(path)
                    .with_context(|| format!("Failed to remove directory {}", path.display()))?;
            } else {
                fs::remove_file(path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
            self.backend.remember(path, None);
        }
        let event = Event::new("removed", self.reference(), "removed");
        Ok(ApplyOutput::from_result(ApplyResult::Removed).with_event(event))
    }

    fn ensure_directory(&self, ctx: &ApplyContext) -> Result<ApplyOutput> {
        let path = &self.path;
        if path.is_dir() {
            return Ok(ApplyOutput::unchanged());
        }
        if path.exists() {
            bail!("{} exists and is not a directory", path.display());
        }
        if !ctx.noop {
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create directory {}", path.display()))?;
        }
        let event = Event::new("created", self.reference(), "created directory");
        Ok(ApplyOutput::from_result(ApplyResult::Created).with_event(event))
    }

    fn ensure_file(&self, ctx: &ApplyContext) -> Result<ApplyOutput> {
        let path = &self.path;
        if path.is_dir() {
            bail!("{} is a directory", path.display());
        }

        let desired = self.desired_content()?;
        let desired_digest = blake3::hash(&desired);
        let current = self.backend.digest(path);
        if current == Some(desired_digest) {
            return Ok(ApplyOutput::unchanged());
        }

        if ctx.noop {
            if let Ok(old) = fs::read_to_string(path)
                && let Ok(new) = std::str::from_utf8(&desired)
            {
                log::info!("{}:\n{}", self.reference(), ui::text_diff(&old, new));
            }
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create parent directory: {}", parent.display())
                })?;
            }
            fs::write(path, &desired)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            self.backend.remember(path, Some(desired_digest));
        }

        let (result, message) = match current {
            None => (
                ApplyResult::Created,
                format!("defined content as '{{blake3}}{}'", desired_digest.to_hex()),
            ),
            Some(old) => (
                ApplyResult::Modified,
                format!(
                    "content changed '{{blake3}}{}' to '{{blake3}}{}'",
                    old.to_hex(),
                    desired_digest.to_hex()
                ),
            ),
        };
        let name = result.event_name().unwrap_or("changed");
        Ok(ApplyOutput::from_result(result).with_event(Event::new(name, self.reference(), message)))
    }
}

impl Resource for File {
    fn resource_type(&self) -> &'static str {
        "file"
    }

    fn title(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn pre_run_check(&self) -> Result<()> {
        if !self.path.is_absolute() {
            bail!("File paths must be fully qualified, not '{}'", self.path.display());
        }
        if self.content.is_some() && self.source.is_some() {
            bail!("You cannot specify both content and source");
        }
        if self.recurse && self.source.is_none() {
            bail!("recurse requires a source");
        }
        Ok(())
    }

    fn backend(&self) -> Option<Arc<dyn Backend>> {
        Some(Arc::clone(&self.backend) as Arc<dyn Backend>)
    }

    fn generate(&self) -> Result<Vec<SharedResource>> {
        let Some(source) = self.source.as_ref().filter(|s| self.recurse && s.is_dir()) else {
            return Ok(Vec::new());
        };

        let mut children: Vec<SharedResource> = Vec::new();
        for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {}", source.display()))?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .with_context(|| format!("{} is outside {}", entry.path().display(), source.display()))?;

            let mut child = Self::new(self.path.join(relative), &self.backend);
            child.tags.clone_from(&self.tags);
            if entry.file_type().is_dir() {
                child.ensure = Ensure::Directory;
            } else {
                child.source = Some(entry.path().to_path_buf());
            }
            children.push(Arc::new(child));
        }
        log::debug!("{} expands to {} entries", self.reference(), children.len());
        Ok(children)
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyOutput> {
        match self.ensure {
            Ensure::Absent => self.ensure_absent(ctx),
            _ if self.wants_directory() => self.ensure_directory(ctx),
            _ => self.ensure_file(ctx),
        }
    }
}
