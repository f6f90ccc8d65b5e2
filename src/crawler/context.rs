//! Collaborators shared by the orchestrators of a process

use crate::config::{CategoryConfig, CrawlerConfig};
use crate::crawler::scheduler::RequestLimiter;
use crate::crawler::Fetcher;
use crate::output::{
    log_run_statistics, ApiResponseRecord, Notifier, ResponseRecorder, RunOutcome,
    RunStatistics, SnapshotWriter, Stage,
};
use chrono::Duration;
use std::sync::Arc;

/// Everything an orchestrator needs besides its category and registry
#[derive(Debug, Clone)]
pub struct CrawlContext {
    pub fetcher: Arc<Fetcher>,
    pub settings: CrawlerConfig,
    pub snapshots: Arc<dyn SnapshotWriter>,
    pub notifier: Arc<dyn Notifier>,
    pub recorder: Option<Arc<dyn ResponseRecorder>>,
}

impl CrawlContext {
    pub fn new(
        fetcher: Arc<Fetcher>,
        settings: CrawlerConfig,
        snapshots: Arc<dyn SnapshotWriter>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            fetcher,
            settings,
            snapshots,
            notifier,
            recorder: None,
        }
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn ResponseRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Age past which unresponsive endpoints are pruned
    pub fn staleness_window(&self) -> Duration {
        Duration::days(self.settings.staleness_days)
    }

    /// A fresh in-flight limiter for one orchestrator run
    pub fn limiter(&self) -> RequestLimiter {
        RequestLimiter::new(self.settings.max_concurrent_requests)
    }

    /// Whether fetch outcomes of `category` go to the recorder
    pub fn records_responses(&self, category: &CategoryConfig) -> bool {
        category.record_responses && self.recorder.is_some()
    }

    /// Hands a run's bookkeeping rows to the recorder; failures are logged
    pub fn submit_records(&self, records: &[ApiResponseRecord]) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        if records.is_empty() {
            return;
        }
        if let Err(e) = recorder.record_batch(records) {
            tracing::error!("Failed to record {} API responses: {}", records.len(), e);
        }
    }

    /// Notifies the outcome of a stage and logs its counters
    pub fn report_stage(
        &self,
        category: &str,
        stage: Stage,
        result: &crate::Result<RunStatistics>,
    ) {
        match result {
            Ok(stats) => {
                log_run_statistics(&format!("{} ({})", stage, category), stats);
                self.notifier
                    .notify(&RunOutcome::succeeded(category, stage));
            }
            Err(e) => {
                tracing::error!("{} ({}) failed: {}", stage, category, e);
                self.notifier
                    .notify(&RunOutcome::failed(category, stage, e));
            }
        }
    }
}
