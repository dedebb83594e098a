use booru_scanner_core::{ProgressReporter, ScanSummary};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Status changes: spinner with the scanner's status text
/// - Hash and lookup phases: progress bar, total set on first update
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn spinner(message: String) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars(TICK_CHARS),
        );
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn counter(label: &str, total: usize) -> ProgressBar {
        let pb = ProgressBar::new(total as u64);
        let template = format!(
            "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} ({{eta}} remaining)",
            label
        );
        pb.set_style(
            ProgressStyle::with_template(&template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("━╸─")
                .tick_chars(TICK_CHARS),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    /// Advance the current bar, replacing a spinner with a counter on the
    /// first update of a phase.
    fn advance(&self, label: &str, done: usize, total: usize) {
        if let Ok(mut guard) = self.bar.lock() {
            let stale = match guard.as_ref() {
                Some(pb) => pb.length() != Some(total as u64),
                None => true,
            };
            if stale {
                if let Some(old) = guard.take() {
                    old.finish_and_clear();
                }
                *guard = Some(Self::counter(label, total));
            }
            if let Some(pb) = guard.as_ref() {
                pb.set_position(done as u64);
            }
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_status(&self, scanner: &str, status: &str) {
        self.set_bar(Self::spinner(format!("[{}] {}", scanner, status)));
    }

    fn on_hash_progress(&self, files_hashed: usize, total_files: usize) {
        self.advance("Hashing", files_hashed, total_files);
    }

    fn on_lookup_progress(&self, lookups_done: usize, total_lookups: usize) {
        self.advance("Searching", lookups_done, total_lookups);
    }

    fn on_scan_complete(&self, scanner: &str, summary: &ScanSummary) {
        self.finish_bar();
        eprintln!("  {} {}: {}", "✓".green(), scanner, summary);
    }

    fn on_scan_failed(&self, scanner: &str, error: &str) {
        self.finish_bar();
        eprintln!("  {} {}: {}", "✗".red(), scanner, error);
    }
}
