use colored::*;
use hoard_core::{Issue, RunEvent, RunState, Severity};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// Renders engine events with indicatif.
///
/// - Backup: spinner until the counter has an estimate, then a bar
/// - Check: bar over the stored contents
/// - Restore: spinner with the current path
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    /// Drain `events` until `done` reports the operation finished, then
    /// render whatever is still queued.
    pub fn pump<F>(&self, events: &mut broadcast::Receiver<RunEvent>, done: F)
    where
        F: Fn() -> bool,
    {
        loop {
            let finished = done();
            loop {
                match events.try_recv() {
                    Ok(event) => self.handle(&event),
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
            if finished {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        self.finish_bar();
    }

    fn with_bar<F: FnOnce(&ProgressBar)>(&self, create: fn() -> ProgressBar, update: F) {
        let mut guard = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        let pb = guard.get_or_insert_with(create);
        update(pb);
    }

    fn finish_bar(&self) {
        let mut guard = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(pb) = guard.take() {
            pb.finish_and_clear();
        }
    }

    fn handle(&self, event: &RunEvent) {
        match event {
            RunEvent::StatusChanged {
                state: RunState::Running,
                current_path,
                processed,
                total,
            } => self.with_bar(spinner, |pb| {
                if let Some(total) = total {
                    if pb.length() != Some(*total) {
                        pb.set_style(counted_style("Backing up"));
                        pb.set_length(*total);
                    }
                }
                pb.set_position(*processed);
                if let Some(path) = current_path {
                    pb.set_message(path.clone());
                }
            }),
            RunEvent::StatusChanged { state, .. } => {
                self.with_bar(spinner, |pb| pb.set_message(format!("{}...", state)))
            }
            RunEvent::ItemError(issue) => {
                let line = format_issue(issue);
                self.with_bar(spinner, |pb| pb.println(line));
            }
            RunEvent::RunEnded { .. } => self.finish_bar(),
            RunEvent::CheckProgress { checked, total } => self.with_bar(spinner, |pb| {
                if pb.length() != Some(*total) {
                    pb.set_style(counted_style("Checking"));
                    pb.set_length(*total);
                }
                pb.set_position(*checked);
            }),
            RunEvent::RestoreProgress {
                restored,
                current_path,
            } => self.with_bar(spinner, |pb| {
                pb.set_message(format!("Restored {} items, {}", restored, current_path))
            }),
        }
    }
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_chars(TICK_CHARS));
    }
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn counted_style(label: &str) -> ProgressStyle {
    let template = format!(
        "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} ({{eta}} remaining) {{wide_msg}}",
        label
    );
    ProgressStyle::with_template(&template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars(TICK_CHARS)
}

pub fn format_issue(issue: &Issue) -> String {
    let label = match issue.severity {
        Severity::Warning => "warning".yellow().bold(),
        Severity::Error => "error".red().bold(),
    };
    if issue.path.is_empty() {
        format!("  {}: {}", label, issue.message)
    } else {
        format!("  {}: {}: {}", label, issue.path, issue.message)
    }
}
