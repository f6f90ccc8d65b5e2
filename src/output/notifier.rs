//! Run outcome notifiers

use crate::output::traits::{Notifier, RunOutcome};
use std::sync::{Mutex, PoisonError};

/// Reports outcomes through the tracing subscriber
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    /// Prefixed to every message, e.g. "Backup "
    prefix: String,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Message title: `<prefix><stage> (<Category>)`
    pub fn title(&self, outcome: &RunOutcome) -> String {
        format!(
            "{}{} ({})",
            self.prefix,
            outcome.stage,
            capitalize(&outcome.category)
        )
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, outcome: &RunOutcome) {
        let title = self.title(outcome);
        if outcome.success {
            tracing::info!("{}: succeeded", title);
        } else {
            tracing::error!(
                "{}: failed: {}",
                title,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

/// Keeps every outcome in memory
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    outcomes: Mutex<Vec<RunOutcome>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<RunOutcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, outcome: &RunOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(outcome.clone());
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
