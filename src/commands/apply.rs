//! `converge apply` - run a catalog and report what happened

use anyhow::{Context as AnyhowContext, Result, bail};
use catalog::{CancelToken, Outcome, Report, ResourceState, RunOptions, RunStatus, Transaction};
use chrono::Local;
use colored::Colorize;
use std::fs;
use std::path::Path;

use crate::Context;
use crate::cli::ApplyArgs;
use crate::config;
use crate::loader;
use crate::progress::BarProgress;
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let options = options(&args)?;
    let catalog_path = match &args.catalog {
        Some(path) => path.clone(),
        None => loader::default_path()?,
    };
    let catalog = loader::load(&catalog_path)?;
    log::info!("Applying {} resources from {}", catalog.len(), catalog_path.display());

    if !ctx.quiet && !args.json {
        ui::header(if options.noop {
            "Converge (noop)"
        } else {
            "Converge"
        });
    }

    let mut transaction = Transaction::new(catalog.relationship_graph(), options).verbose(ctx.verbose > 0);
    let cancel = CancelToken::new();
    if let Err(e) = ctrlc::set_handler(on_interrupt(&cancel)) {
        log::warn!("Could not install the interrupt handler: {e}");
    }
    let mut progress = if ctx.quiet || args.json {
        BarProgress::hidden()
    } else {
        BarProgress::new()
    };
    let outcome = transaction.evaluate(&cancel, &mut progress);
    let report = transaction.into_report();

    if let Err(catalog::Error::DependencyCycle { dot, .. }) = &outcome
        && let Some(path) = &args.cycle_graph
    {
        write_cycle_graph(path, dot)?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !ctx.quiet {
        render(ctx, &report);
    }

    if outcome? == Outcome::Canceled {
        ui::warn("Run canceled before every resource was evaluated");
    }
    if report.status == RunStatus::Failed {
        bail!(
            "{} of {} resources failed",
            report.metrics.failed + report.metrics.failed_to_restart,
            report.metrics.total
        );
    }
    Ok(())
}

/// Config file options with command line overrides applied
fn options(args: &ApplyArgs) -> Result<RunOptions> {
    let mut options = config::load(args.config.as_deref())?;
    if let Some(tags) = &args.tags {
        options.tags = config::parse_tags(tags).context("Invalid --tags")?;
    }
    if let Some(tags) = &args.skip_tags {
        options.skip_tags = config::parse_tags(tags).context("Invalid --skip-tags")?;
    }
    options.ignore_tags |= args.ignore_tags;
    options.ignore_schedules |= args.ignore_schedules;
    options.noop |= args.noop;
    Ok(options)
}

/// Cancel the run on Ctrl-C or SIGTERM; the resource in progress finishes
fn on_interrupt(cancel: &CancelToken) -> impl Fn() + Send + 'static {
    let cancel = cancel.clone();
    move || {
        if !cancel.is_canceled() {
            log::warn!("Interrupted, finishing the current resource");
        }
        cancel.cancel();
    }
}

fn write_cycle_graph(path: &Path, dot: &str) -> Result<()> {
    fs::write(path, dot).with_context(|| format!("Failed to write {}", path.display()))?;
    ui::info(&format!("Cycle graph written to {}", path.display()));
    Ok(())
}

fn render(ctx: &Context, report: &Report) {
    for (_, status) in report.statuses() {
        match status.state() {
            ResourceState::Failed | ResourceState::FailedToRestart => {
                ui::error(&status.reference);
                for event in status.events.iter().filter(|e| e.name.contains("fail")) {
                    ui::dim(&event.message);
                }
            }
            ResourceState::Skipped if status.dependency_failed() => {
                ui::warn(&format!(
                    "{} skipped: dependencies failed ({})",
                    status.reference,
                    report.failed_dependency_refs(status).join(", ")
                ));
            }
            ResourceState::Skipped if ctx.verbose > 0 => {
                let reason = status.skip_reason.map_or("skipped", |r| r.describe());
                ui::dim(&format!("{} skipped: {reason}", status.reference));
            }
            _ if status.changed || status.restarted => {
                ui::success(&status.reference);
                for event in &status.events {
                    ui::dim(&event.message);
                }
            }
            _ if ctx.verbose > 0 && status.events.iter().any(|e| e.is_noop()) => {
                ui::info(&format!("{} would change", status.reference));
            }
            _ => {}
        }
    }

    for resource_type in &report.backend_unavailable {
        ui::warn(&format!("No usable backend for {resource_type} resources"));
    }

    let metrics = &report.metrics;
    ui::header("Summary");
    ui::kv("Status", &status_label(report.status));
    ui::kv("Resources", &metrics.total.to_string());
    ui::kv("Changed", &metrics.changed.to_string());
    ui::kv("Failed", &metrics.failed.to_string());
    ui::kv("Skipped", &metrics.skipped.to_string());
    if metrics.restarted > 0 || metrics.failed_to_restart > 0 {
        ui::kv("Restarted", &metrics.restarted.to_string());
        ui::kv("Failed to restart", &metrics.failed_to_restart.to_string());
    }
    ui::kv(
        "Started",
        &report
            .started_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
    );
    if let Some(duration) = report.duration {
        ui::kv("Duration", &ui::format_duration(duration.as_secs_f64()));
    }
}

fn status_label(status: RunStatus) -> String {
    match status {
        RunStatus::Unchanged => "unchanged".dimmed().to_string(),
        RunStatus::Changed => "changed".green().to_string(),
        RunStatus::Failed => "failed".red().bold().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn apply_args(argv: &[&str]) -> ApplyArgs {
        match Cli::parse_from(argv).command {
            crate::cli::Command::Apply(args) => args,
            _ => panic!("expected apply"),
        }
    }

    fn write_catalog(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("catalog.toml");
        fs::write(&path, body).unwrap();
        path
    }

    fn quiet() -> Context {
        Context {
            verbose: 0,
            quiet: true,
        }
    }

    #[test]
    fn test_cli_overrides_config() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("converge.toml");
        fs::write(&config_path, "tags = [\"db\"]\nskip_tags = [\"slow\"]\n").unwrap();
        let config = config_path.to_string_lossy().to_string();

        let args = apply_args(&["converge", "apply", "-c", &config, "--tags", "Web", "-n"]);
        let opts = options(&args).unwrap();
        assert_eq!(opts.tags, vec!["web"]);
        assert_eq!(opts.skip_tags, vec!["slow"]);
        assert!(opts.noop);

        let bad = apply_args(&["converge", "apply", "-c", &config, "--skip-tags", "a b"]);
        assert!(options(&bad).is_err());
    }

    #[test]
    fn test_interrupt_cancels_the_run() {
        let cancel = CancelToken::new();
        let interrupt = on_interrupt(&cancel);
        interrupt();
        interrupt();
        assert!(cancel.is_canceled());

        let catalog = loader::parse("[[resource]]\ntype = \"notify\"\ntitle = \"a\"\n").unwrap();
        let mut transaction = Transaction::new(catalog.relationship_graph(), RunOptions::default());
        let outcome = transaction.evaluate(&cancel, &mut BarProgress::hidden()).unwrap();
        assert_eq!(outcome, Outcome::Canceled);
        assert_eq!(transaction.report().metrics.canceled, 1);
    }

    #[test]
    fn test_apply_writes_files() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("motd");
        let catalog = write_catalog(
            dir.path(),
            &format!(
                "[[resource]]\ntype = \"file\"\ntitle = \"{}\"\ncontent = \"hello\\n\"\n",
                target.display()
            ),
        );
        let config = dir.path().join("converge.toml");
        fs::write(&config, "").unwrap();

        let args = apply_args(&[
            "converge",
            "apply",
            &catalog.to_string_lossy(),
            "-c",
            &config.to_string_lossy(),
        ]);
        run(&quiet(), args).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "hello\n");
    }

    #[test]
    fn test_cycle_fails_and_writes_graph() {
        let dir = TempDir::new().unwrap();
        let catalog = write_catalog(
            dir.path(),
            "[[resource]]\ntype = \"notify\"\ntitle = \"a\"\nrequire = [\"Notify[b]\"]\n\n\
             [[resource]]\ntype = \"notify\"\ntitle = \"b\"\nrequire = [\"Notify[a]\"]\n",
        );
        let config = dir.path().join("converge.toml");
        fs::write(&config, "").unwrap();
        let dot = dir.path().join("cycles.dot");

        let args = apply_args(&[
            "converge",
            "apply",
            &catalog.to_string_lossy(),
            "-c",
            &config.to_string_lossy(),
            "--cycle-graph",
            &dot.to_string_lossy(),
        ]);
        let err = run(&quiet(), args).unwrap_err();
        assert!(err.to_string().contains("dependency cycles"));
        assert!(fs::read_to_string(&dot).unwrap().contains("\"Notify[a]\""));
    }

    #[test]
    fn test_failed_resource_fails_command() {
        let dir = TempDir::new().unwrap();
        let catalog = write_catalog(
            dir.path(),
            "[[resource]]\ntype = \"file\"\ntitle = \"relative/path\"\ncontent = \"x\"\n",
        );
        let config = dir.path().join("converge.toml");
        fs::write(&config, "").unwrap();

        let args = apply_args(&[
            "converge",
            "apply",
            &catalog.to_string_lossy(),
            "-c",
            &config.to_string_lossy(),
        ]);
        let err = run(&quiet(), args).unwrap_err();
        assert!(err.to_string().contains("1 of 1 resources failed"));
    }
}
