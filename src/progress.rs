//! Progress bar for transaction runs

use catalog::{ProgressCallback, ResourceState, ResourceStatus};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Draws one tick per resource and prints failures above the bar
pub struct BarProgress {
    pb: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let pb = ProgressBar::new(0);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=>-"));
        }
        Self { pb }
    }

    /// A bar that never draws, for `--quiet` and JSON output
    pub fn hidden() -> Self {
        let progress = Self::new();
        progress.pb.set_draw_target(ProgressDrawTarget::hidden());
        progress
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCallback for BarProgress {
    fn on_run_start(&mut self, total: usize) {
        self.pb.set_length(total as u64);
        self.pb.set_position(0);
    }

    fn on_resource_start(&mut self, reference: &str) {
        // generated resources grow the run past its starting size
        if self.pb.length().is_some_and(|len| self.pb.position() >= len) {
            self.pb.inc_length(1);
        }
        self.pb.set_message(reference.to_string());
    }

    fn on_resource_complete(&mut self, reference: &str, status: &ResourceStatus) {
        if status.state() == ResourceState::Failed {
            self.pb.suspend(|| {
                println!("  {} {}", "✗".red(), reference);
            });
        }
        self.pb.inc(1);
    }

    fn on_run_complete(&mut self) {
        self.pb.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_grows_with_generated_resources() {
        let mut progress = BarProgress::hidden();
        progress.on_run_start(1);
        let status = ResourceStatus::new("Notify[a]", "notify");

        progress.on_resource_start("Notify[a]");
        progress.on_resource_complete("Notify[a]", &status);
        progress.on_resource_start("File[/tmp/generated]");
        progress.on_resource_complete("File[/tmp/generated]", &status);

        assert_eq!(progress.pb.length(), Some(2));
        assert_eq!(progress.pb.position(), 2);
        progress.on_run_complete();
    }
}
