//! # segment-batch
//!
//! Sequential driver for per-segment trajectory rebuild jobs.
//!
//! ## Overview
//!
//! A long molecular trajectory is split into numbered segment files
//! (`segment_01.dcd`, `segment_02.dcd`, ...). This crate runs an external
//! analysis program once per segment, strictly one at a time and in ascending
//! order, passing the segment path, a shared topology file and a GPU index.
//! The first failing segment aborts the whole batch.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use segment_batch::batch::{BatchExecutor, CommandRunner};
//! use segment_batch::config::BatchConfig;
//!
//! # async fn example() -> segment_batch::Result<()> {
//! let config = BatchConfig {
//!     start: 13,
//!     end: 25,
//!     gpu: 1,
//!     ..BatchConfig::default()
//! };
//!
//! let runner = CommandRunner::new(config.command.clone())?;
//! let report = BatchExecutor::new(config).execute(&runner).await;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`batch`]: segment jobs, the job runner seam and the sequential executor
//! - [`config`]: layered batch configuration

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use std::path::PathBuf;

use thiserror::Error;

/// Result type for batch operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Main error type for batch operations
#[derive(Error, Debug)]
pub enum BatchError {
    /// The external program exited unsuccessfully for a segment
    #[error("segment {segment} failed{}", describe_exit(.code))]
    SegmentFailed {
        /// Human-readable segment name, e.g. `segment_18`
        segment: String,
        /// Exit code of the external program, if it exited normally
        code: Option<i32>,
    },

    /// The external program could not be started
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        /// Program that was being launched
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// An input file required by the batch does not exist
    #[error("missing input file: {}", .0.display())]
    MissingInput(PathBuf),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {code}"),
        None => " (terminated by signal)".to_string(),
    }
}

impl BatchError {
    /// Process exit code the binary should terminate with for this error.
    ///
    /// Segment failures propagate the external program's own exit code when
    /// it fits in a process status, and fall back to 1 otherwise. A segment
    /// exiting with 2 therefore shares its status with [`BatchError::Config`];
    /// callers that need to tell them apart should match on the error itself.
    pub fn exit_code(&self) -> i32 {
        match self {
            BatchError::SegmentFailed { code: Some(code), .. } if (1..=255).contains(code) => *code,
            BatchError::SegmentFailed { .. } | BatchError::Spawn { .. } => 1,
            BatchError::MissingInput(_) => 1,
            BatchError::Config(_) => 2,
            BatchError::Io(_) | BatchError::Serialization(_) => 1,
        }
    }
}

/// Segment jobs, runners and the sequential executor
pub mod batch;

/// Layered batch configuration
pub mod config;
