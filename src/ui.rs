//! Terminal status line for a monitored batch.
//!
//! Uses `indicatif` for the spinner and `console` for colours. State changes
//! and the application links go through `tracing`, with the spinner
//! suspended while they print.

use std::time::Duration;

use console::{Style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::kyuubi::{Batch, SubmissionError};
use crate::monitor::{MonitorObserver, MonitorSummary, Verdict};

/// Spinner showing the latest `(batch state, app state, elapsed)` tuple.
pub struct StatusDisplay {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    // Last (batch state, app state) pair that was logged.
    last: Option<(String, String)>,
}

impl StatusDisplay {
    /// Starts the spinner. It stays hidden when stderr is not a terminal or
    /// when `visible` is false, e.g. with debug logging on.
    pub fn start(batch_id: &str, visible: bool) -> Self {
        let pb = if visible && Term::stderr().is_term() {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.cyan} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            ProgressBar::hidden()
        };
        pb.set_message(format!("Waiting for batch {batch_id}"));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            last: None,
        }
    }

    pub fn clear(&self) {
        self.pb.finish_and_clear();
    }

    /// Prints the coloured final line for the verdict.
    pub fn finish(&self, summary: &MonitorSummary) {
        self.pb.finish_and_clear();
        let elapsed = summary.elapsed_display();
        match &summary.verdict {
            Verdict::Success => {
                eprintln!("  {} Job completed successfully in {elapsed}", self.green.apply_to("✓"));
            }
            Verdict::Failed { reason } => {
                eprintln!("  {} Job failed after {elapsed}: {reason}", self.red.apply_to("✗"));
            }
            Verdict::Cancelled => {
                eprintln!("  {} Job was cancelled after {elapsed}", self.yellow.apply_to("⊘"));
            }
            Verdict::Unexpected { reason } => {
                eprintln!("  {} Job ended in an unexpected state: {reason}", self.yellow.apply_to("?"));
            }
        }
    }
}

impl MonitorObserver for StatusDisplay {
    fn on_status(&mut self, batch: &Batch, elapsed: Duration) {
        let state = batch.state.clone().unwrap_or_else(|| "UNKNOWN".into());
        let app_state = batch.app_state().unwrap_or("N/A").to_string();
        self.pb.set_message(format!(
            "State: {state} | App State: {app_state} (elapsed: {}s)",
            elapsed.as_secs()
        ));

        let current = (state, app_state);
        if self.last.as_ref() != Some(&current) {
            self.pb.suspend(|| {
                info!(
                    batch_state = %current.0,
                    app_state = %current.1,
                    "Batch state: {} | App state: {}",
                    current.0,
                    current.1
                );
            });
            self.last = Some(current);
        }
    }

    fn on_app_started(&mut self, app_id: &str, history_url: Option<&str>, app_url: Option<&str>) {
        self.pb.suspend(|| {
            info!(app_id, "Spark App ID: {app_id}");
            match (history_url, app_url) {
                (Some(url), _) => info!("Spark History URL: {url}"),
                (None, Some(url)) => info!("Spark UI URL: {url}"),
                (None, None) => {}
            }
        });
    }

    fn on_poll_error(&mut self, error: &SubmissionError, consecutive: u32, budget: u32) {
        self.pb.suspend(|| {
            warn!(consecutive, budget, "status poll failed: {error}");
        });
        self.pb.set_message(format!(
            "{} status poll failed ({consecutive}/{budget}): {error}",
            self.yellow.apply_to("↻")
        ));
    }

    fn on_complete(&mut self, summary: &MonitorSummary) {
        self.pb.finish_and_clear();
        if let Some(batch) = &summary.last
            && let Some(diagnostic) = batch.app_diagnostic()
        {
            if summary.verdict.is_success() {
                info!("Application diagnostics: {diagnostic}");
            } else {
                warn!("Application diagnostics: {diagnostic}");
            }
        }
    }
}
