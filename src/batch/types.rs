//! Segment jobs, status lines and run reports.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::{BatchError, Result};

/// Index of one trajectory segment.
///
/// Rendered as a two-digit zero-padded number: `1` is `segment_01`,
/// `13` is `segment_13`. Indices above 99 keep their natural width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(u32);

impl SegmentId {
    /// Wrap a raw segment index
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Raw segment index
    pub fn index(&self) -> u32 {
        self.0
    }

    /// Zero-padded index, e.g. `"07"`
    pub fn label(&self) -> String {
        format!("{:02}", self.0)
    }

    /// Trajectory file name, e.g. `segment_07.dcd`
    pub fn file_name(&self) -> String {
        format!("{self}.dcd")
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment_{}", self.label())
    }
}

/// Inclusive run of consecutive segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpan {
    /// First segment in the span
    pub first: SegmentId,
    /// Last segment in the span
    pub last: SegmentId,
}

impl SegmentSpan {
    /// Span from `first` to `last`, or `None` when it would be empty
    pub fn new(first: u32, last: u32) -> Option<Self> {
        (first <= last).then(|| Self {
            first: SegmentId::new(first),
            last: SegmentId::new(last),
        })
    }

    /// Segments after `segment` up to and including `last`
    pub fn after(segment: SegmentId, last: u32) -> Option<Self> {
        segment
            .index()
            .checked_add(1)
            .and_then(|first| Self::new(first, last))
    }

    /// Number of segments in the span
    pub fn len(&self) -> usize {
        (self.last.index() - self.first.index()) as usize + 1
    }
}

/// One invocation of the external program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Segment this job processes
    pub segment: SegmentId,
    /// Trajectory file, `<base_dir>/segment_<NN>.dcd`
    pub dcd_file: PathBuf,
    /// Topology file
    pub pdb_file: PathBuf,
    /// GPU device index
    pub gpu: u32,
}

impl BatchJob {
    /// Build the job for `segment` under `base_dir`
    pub fn new(segment: SegmentId, base_dir: &Path, topology: &Path, gpu: u32) -> Self {
        Self {
            segment,
            dcd_file: base_dir.join(segment.file_name()),
            pdb_file: topology.to_path_buf(),
            gpu,
        }
    }

    /// Arguments appended to the launch command
    pub fn args(&self) -> Vec<OsString> {
        vec![
            "--dcd_file".into(),
            self.dcd_file.clone().into_os_string(),
            "--pdb_file".into(),
            self.pdb_file.clone().into_os_string(),
            "--gpu".into(),
            self.gpu.to_string().into(),
        ]
    }
}

/// Status of a segment job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchJobStatus {
    /// Exited with status zero
    Completed,
    /// Exited unsuccessfully or could not be launched
    Failed,
}

/// Outcome of one segment job
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    /// Segment identifier
    pub segment: SegmentId,
    /// Trajectory file passed to the program
    pub dcd_file: PathBuf,
    /// Final status
    pub status: BatchJobStatus,
    /// Exit code, when the program ran and exited normally
    pub exit_code: Option<i32>,
    /// Wall-clock time spent in the external program
    pub duration_ms: u64,
}

/// Status lines reported while the batch runs.
///
/// The [`fmt::Display`] form is the exact console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    /// About to launch the program for a segment
    Processing(SegmentId),
    /// Segment finished successfully
    Completed(SegmentId),
    /// Segment failed; the batch stops here
    Failed(SegmentId),
    /// Every segment finished successfully
    AllCompleted,
}

impl fmt::Display for BatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchEvent::Processing(segment) => write!(f, "Processing {}...", segment.file_name()),
            BatchEvent::Completed(segment) => write!(f, "Successfully completed {segment}"),
            BatchEvent::Failed(segment) => write!(f, "Error processing {segment}"),
            BatchEvent::AllCompleted => write!(f, "All segments processed successfully!"),
        }
    }
}

/// Progress callback type
pub type ProgressCallback = Box<dyn Fn(&BatchEvent) + Send + Sync>;

/// Batch execution statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Segments in the configured range
    pub total_jobs: usize,
    /// Segments that exited with status zero
    pub completed_jobs: usize,
    /// Segments that failed (at most one)
    pub failed_jobs: usize,
    /// Segments never launched
    pub skipped_jobs: usize,
    /// Time spent in the external program across all segments
    pub total_duration_ms: u64,
}

impl BatchStats {
    /// Tally the results of a run over `total_jobs` segments
    pub fn from_results(
        results: &[BatchResult],
        total_jobs: usize,
        skipped: Option<SegmentSpan>,
    ) -> Self {
        let mut stats = Self {
            total_jobs,
            ..Self::default()
        };
        for result in results {
            match result.status {
                BatchJobStatus::Completed => stats.completed_jobs += 1,
                BatchJobStatus::Failed => stats.failed_jobs += 1,
            }
            stats.total_duration_ms += result.duration_ms;
        }
        stats.skipped_jobs = skipped.map_or(0, |span| span.len());
        stats
    }
}

/// Record of a whole batch run, written out by `--report`
#[derive(Debug, Serialize)]
pub struct BatchReport {
    /// Unique id of this run
    pub run_id: Uuid,
    /// When the executor started
    pub started_at: DateTime<Utc>,
    /// When the executor finished
    pub finished_at: DateTime<Utc>,
    /// Configuration the run used
    pub config: BatchConfig,
    /// One entry per launched segment, in order
    pub results: Vec<BatchResult>,
    /// Segments never launched because the batch stopped early
    pub skipped: Option<SegmentSpan>,
    /// Aggregate counts
    pub stats: BatchStats,
    /// Message of the error that stopped the batch
    pub error: Option<String>,
    #[serde(skip)]
    failure: Option<BatchError>,
}

impl BatchReport {
    pub(crate) fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        config: BatchConfig,
        results: Vec<BatchResult>,
        skipped: Option<SegmentSpan>,
        failure: Option<BatchError>,
    ) -> Self {
        let stats = BatchStats::from_results(&results, config.segment_count(), skipped);
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            config,
            results,
            skipped,
            stats,
            error: failure.as_ref().map(|e| e.to_string()),
            failure,
        }
    }

    /// True when every segment completed
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// The error that stopped the batch, if any
    pub fn failure(&self) -> Option<&BatchError> {
        self.failure.as_ref()
    }

    /// Segments the program was launched for, in order
    pub fn attempted(&self) -> Vec<SegmentId> {
        self.results.iter().map(|r| r.segment).collect()
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Turn the report into a `Result`, surfacing the stopping error
    pub fn into_result(mut self) -> Result<Self> {
        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}
