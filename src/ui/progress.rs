//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    /// Create a new spinner (shows immediately in interactive mode)
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Start the spinner with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            // Plain output for CI
            println!("{} {}", style("...").dim(), message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else if self.interactive {
            println!("{} {}", style("✓").green(), message);
        } else {
            println!("{} {}", style("[OK]").green(), message);
        }
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.error(message);
        } else if self.interactive {
            println!("{} {}", style("✗").red(), message);
        } else {
            println!("{} {}", style("[FAIL]").red(), message);
        }
    }

    /// Clear the spinner without any message
    pub fn clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.clear();
        }
    }
}

/// Progress bar for sorter runs.
///
/// Parses `[N/M] <message>` lines from the sorter and displays an indicatif
/// bar in interactive mode, or plain text in CI.
pub struct SorterProgress {
    bar: Option<ProgressBar>,
}

impl SorterProgress {
    /// Create a new sorter progress indicator
    pub fn new(ctx: &UiContext, sorter: &str) -> Self {
        let bar = if ctx.use_fancy_output() {
            let bar = ProgressBar::new(0);
            let bar_style = ProgressStyle::default_bar()
                .template("  {spinner:.cyan} Sorting with {prefix}  {bar:20.cyan/dim} {pos}/{len} {msg:.dim}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                .progress_chars("━╸─");
            bar.set_style(bar_style);
            bar.set_prefix(sorter.to_string());
            bar.enable_steady_tick(std::time::Duration::from_millis(120));
            Some(bar)
        } else {
            println!("Sorting with {}...", sorter);
            None
        };
        Self { bar }
    }

    /// Process a sorter output line
    pub fn on_line(&self, line: String) {
        if let Some((n, total, message)) = parse_step_line(&line) {
            if let Some(ref bar) = self.bar {
                bar.set_length(total);
                bar.set_position(n);
                bar.set_message(message.to_string());
            } else {
                println!("  [{}/{}] {}", n, total, message);
            }
        } else if let Some(ref bar) = self.bar {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                bar.set_message(truncate(trimmed, 60));
            }
        }
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.disable_steady_tick();
            bar.finish_and_clear();
        }
    }
}

fn truncate(line: &str, max: usize) -> String {
    if line.chars().count() > max {
        let head: String = line.chars().take(max - 3).collect();
        format!("{}...", head)
    } else {
        line.to_string()
    }
}

/// Parse a progress line like `[N/M] message`
fn parse_step_line(line: &str) -> Option<(u64, u64, &str)> {
    let rest = line.trim_start().strip_prefix('[')?;
    let (counts, message) = rest.split_once(']')?;
    let (n, total) = counts.split_once('/')?;
    let n: u64 = n.trim().parse().ok()?;
    let total: u64 = total.trim().parse().ok()?;
    Some((n, total, message.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinner_non_interactive() {
        let ctx = UiContext::non_interactive();
        let mut spinner = TaskSpinner::new(&ctx);
        spinner.start("Preprocessing...");
        spinner.stop("Done");
        // Should not panic
    }

    #[test]
    fn parse_step_line_valid() {
        let (n, m, msg) = parse_step_line("[3/8] group 2: 41 spikes on 4 channels").unwrap();
        assert_eq!(n, 3);
        assert_eq!(m, 8);
        assert_eq!(msg, "group 2: 41 spikes on 4 channels");
    }

    #[test]
    fn parse_step_line_not_a_step() {
        assert!(parse_step_line("Loading recording").is_none());
        assert!(parse_step_line("[info] starting").is_none());
        assert!(parse_step_line("").is_none());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 60), "short");
        let long = "µ".repeat(70);
        let cut = truncate(&long, 60);
        assert_eq!(cut.chars().count(), 60);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn sorter_progress_non_interactive() {
        let ctx = UiContext::non_interactive();
        let progress = SorterProgress::new(&ctx, "threshold");
        progress.on_line("[1/2] group 0: 10 spikes".to_string());
        progress.on_line("clustering".to_string());
        progress.finish();
        // Should not panic
    }
}
