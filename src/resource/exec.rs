//! Exec resource - run shell commands

use anyhow::{Context, Result, bail};
use catalog::{
    ApplyContext, ApplyOutput, ApplyResult, Backend, Callback, Event, Resource,
};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

const SHELLS: &[&str] = &["/bin/sh", "/usr/bin/sh"];

/// POSIX shell used to run commands
#[derive(Debug, Clone)]
pub struct ShellBackend {
    pub shell: PathBuf,
}

impl ShellBackend {
    /// Find a usable shell on this system
    pub fn detect() -> Option<Arc<Self>> {
        SHELLS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .map(|shell| {
                Arc::new(Self {
                    shell: shell.to_path_buf(),
                })
            })
    }

    fn run(&self, command: &str, cwd: Option<&Path>) -> Result<Output> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        cmd.output()
            .with_context(|| format!("Failed to execute {}", self.shell.display()))
    }
}

impl Backend for ShellBackend {
    fn name(&self) -> &str {
        "sh"
    }
}

/// A command to run
#[derive(Debug, Clone)]
pub struct Exec {
    pub name: String,
    pub command: String,
    /// Command run on refresh instead of `command`
    pub refresh: Option<String>,
    /// Only run when refreshed by a dependency
    pub refreshonly: bool,
    pub cwd: Option<PathBuf>,
    /// Skip the command when this path already exists
    pub creates: Option<PathBuf>,
    pub tags: Vec<String>,
    backend: Option<Arc<ShellBackend>>,
}

impl Exec {
    pub fn new(name: &str, backend: Option<Arc<ShellBackend>>) -> Self {
        Self {
            name: name.to_string(),
            command: name.to_string(),
            refresh: None,
            refreshonly: false,
            cwd: None,
            creates: None,
            tags: Vec::new(),
            backend,
        }
    }

    fn already_created(&self) -> bool {
        self.creates.as_ref().is_some_and(|p| p.exists())
    }

    fn execute(&self, command: &str) -> Result<()> {
        let Some(backend) = &self.backend else {
            bail!("No shell available");
        };
        log::debug!("Executing '{command}'");
        let output = backend.run(command, self.cwd.as_deref())?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            log::debug!("{}: {line}", self.reference());
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map_or_else(|| "a signal".to_string(), |c| c.to_string());
            bail!(
                "'{command}' returned {code} instead of one of [0]{}",
                if stderr.trim().is_empty() {
                    String::new()
                } else {
                    format!(": {}", stderr.trim())
                }
            );
        }
        Ok(())
    }
}

impl Resource for Exec {
    fn resource_type(&self) -> &'static str {
        "exec"
    }

    fn title(&self) -> String {
        self.name.clone()
    }

    fn tags(&self) -> Vec<String> {
        self.tags.clone()
    }

    fn pre_run_check(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            bail!("command must not be empty");
        }
        if let Some(cwd) = &self.cwd
            && !cwd.is_absolute()
        {
            bail!("cwd must be fully qualified, not '{}'", cwd.display());
        }
        Ok(())
    }

    fn backend(&self) -> Option<Arc<dyn Backend>> {
        self.backend
            .as_ref()
            .map(|b| Arc::clone(b) as Arc<dyn Backend>)
    }

    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyOutput> {
        if self.refreshonly || self.already_created() {
            return Ok(ApplyOutput::unchanged());
        }

        if !ctx.noop
            && let Err(e) = self.execute(&self.command)
        {
            return Ok(ApplyResult::Failed {
                error: format!("{e:#}"),
            }
            .into());
        }
        let event = Event::new("executed_command", self.reference(), "executed successfully");
        Ok(ApplyOutput::from_result(ApplyResult::Modified).with_event(event))
    }

    fn accepts_callback(&self, callback: Callback) -> bool {
        callback == Callback::Refresh
    }

    fn refresh(&self, _callback: Callback, events: &[Event], ctx: &mut ApplyContext) -> Result<()> {
        if self.already_created() {
            return Ok(());
        }
        let command = self.refresh.as_deref().unwrap_or(&self.command);
        log::debug!("{}: refreshing for {} events", self.reference(), events.len());
        if ctx.noop {
            return Ok(());
        }
        self.execute(command)
    }
}
