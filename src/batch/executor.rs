//! Sequential batch executor
//!
//! Runs one segment job at a time, in ascending segment order:
//! - Stops at the first failing segment and records the rest as skipped
//! - Builds each job just before launching it
//! - Optional pause after every successful segment except the last
//! - Status lines through a progress callback (stdout by default)
//! - Per-segment timing and a run report

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::batch::runner::{JobOutcome, JobRunner};
use crate::batch::types::*;
use crate::config::BatchConfig;
use crate::{BatchError, Result};

/// Batch executor for a range of trajectory segments
pub struct BatchExecutor {
    /// Run configuration
    config: BatchConfig,
    /// Verify that all inputs exist before launching anything
    check_inputs: bool,
    /// Status line sink
    progress_callback: Arc<ProgressCallback>,
}

impl BatchExecutor {
    /// Create an executor that prints status lines to stdout
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            check_inputs: false,
            progress_callback: Arc::new(Box::new(|event: &BatchEvent| println!("{event}"))),
        }
    }

    /// Check that the topology and every segment file exist before starting
    pub fn with_input_check(mut self, enabled: bool) -> Self {
        self.check_inputs = enabled;
        self
    }

    /// Replace the status line sink
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BatchEvent) + Send + Sync + 'static,
    {
        self.progress_callback = Arc::new(Box::new(callback));
        self
    }

    /// Configuration this executor runs with
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    fn emit(&self, event: BatchEvent) {
        (self.progress_callback)(&event);
    }

    /// Verify that the topology and every segment file exist
    pub fn check_inputs(&self) -> Result<()> {
        if self.config.segment_count() > 0 && !self.config.topology.is_file() {
            return Err(BatchError::MissingInput(self.config.topology.clone()));
        }
        for job in self.config.jobs() {
            if !job.dcd_file.is_file() {
                return Err(BatchError::MissingInput(job.dcd_file.clone()));
            }
        }
        Ok(())
    }

    /// Run every segment in order, stopping at the first failure
    #[instrument(skip(self, runner), fields(start = self.config.start, end = self.config.end, gpu = self.config.gpu))]
    pub async fn execute<R>(&self, runner: &R) -> BatchReport
    where
        R: JobRunner + ?Sized,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let batch_start = Instant::now();
        let total_jobs = self.config.segment_count();
        let delay = self.config.delay();

        info!(
            run_id = %run_id,
            total_jobs = total_jobs,
            delay = ?delay,
            "Starting batch execution"
        );

        if self.check_inputs {
            if let Err(e) = self.check_inputs() {
                error!(error = %e, "Input check failed, nothing was launched");
                let skipped = SegmentSpan::new(self.config.start, self.config.end);
                return BatchReport::new(run_id, started_at, self.config.clone(), Vec::new(), skipped, Some(e));
            }
            debug!("All input files present");
        }

        let mut results = Vec::new();
        let mut failure = None;
        let mut stopped_at = None;

        for job in self.config.jobs() {
            self.emit(BatchEvent::Processing(job.segment));

            let start = Instant::now();
            let outcome = runner.run(&job).await;
            let duration = start.elapsed();

            match outcome {
                Ok(JobOutcome::Success) => {
                    info!(
                        segment = %job.segment,
                        duration_ms = duration.as_millis() as u64,
                        "Segment completed"
                    );
                    results.push(finished(&job, BatchJobStatus::Completed, Some(0), duration));
                    self.emit(BatchEvent::Completed(job.segment));

                    let is_last = job.segment.index() == self.config.end;
                    if let (Some(delay), false) = (delay, is_last) {
                        debug!(delay_secs = delay.as_secs(), "Pausing before next segment");
                        tokio::time::sleep(delay).await;
                    }
                }
                Ok(JobOutcome::Failed { code }) => {
                    error!(
                        segment = %job.segment,
                        exit_code = ?code,
                        duration_ms = duration.as_millis() as u64,
                        "Segment failed"
                    );
                    results.push(finished(&job, BatchJobStatus::Failed, code, duration));
                    self.emit(BatchEvent::Failed(job.segment));
                    failure = Some(BatchError::SegmentFailed {
                        segment: job.segment.to_string(),
                        code,
                    });
                    stopped_at = Some(job.segment);
                    break;
                }
                Err(e) => {
                    error!(segment = %job.segment, error = %e, "Could not run segment");
                    results.push(finished(&job, BatchJobStatus::Failed, None, duration));
                    self.emit(BatchEvent::Failed(job.segment));
                    failure = Some(e);
                    stopped_at = Some(job.segment);
                    break;
                }
            }
        }

        let skipped = stopped_at.and_then(|segment| SegmentSpan::after(segment, self.config.end));
        let report = BatchReport::new(run_id, started_at, self.config.clone(), results, skipped, failure);
        let batch_duration = batch_start.elapsed();

        if report.is_success() {
            self.emit(BatchEvent::AllCompleted);
            info!(
                completed = report.stats.completed_jobs,
                batch_duration_ms = batch_duration.as_millis() as u64,
                "Batch execution completed"
            );
        } else {
            warn!(
                completed = report.stats.completed_jobs,
                failed = report.stats.failed_jobs,
                skipped = report.stats.skipped_jobs,
                batch_duration_ms = batch_duration.as_millis() as u64,
                "Batch execution aborted"
            );
        }

        report
    }
}

fn finished(job: &BatchJob, status: BatchJobStatus, exit_code: Option<i32>, duration: Duration) -> BatchResult {
    BatchResult {
        segment: job.segment,
        dcd_file: job.dcd_file.clone(),
        status,
        exit_code,
        duration_ms: duration.as_millis() as u64,
    }
}
