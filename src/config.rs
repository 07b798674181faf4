//! Batch configuration.
//!
//! A run is described by a single [`BatchConfig`]. It is assembled from
//! built-in defaults, an optional JSON file and [`ConfigOverrides`] coming
//! from the environment and the command line, applied in that order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batch::{BatchJob, SegmentId};
use crate::{BatchError, Result};

/// Default launch command for the rebuild script
pub const DEFAULT_COMMAND: [&str; 2] = ["python", "parallel_v2.py"];

/// Configuration for one batch run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// First segment index (inclusive)
    pub start: u32,
    /// Last segment index (inclusive)
    pub end: u32,
    /// Directory holding the `segment_<NN>.dcd` files
    pub base_dir: PathBuf,
    /// Topology file shared by every segment
    pub topology: PathBuf,
    /// GPU device index handed to the external program
    pub gpu: u32,
    /// Pause after each successful segment, in seconds
    pub delay_secs: Option<u64>,
    /// Program and leading arguments used to launch the analysis
    pub command: Vec<String>,
    /// Export `CUDA_VISIBLE_DEVICES=<gpu>` to the child process
    pub set_cuda_visible_devices: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            start: 1,
            end: 8,
            base_dir: PathBuf::from("."),
            topology: PathBuf::from("topology.pdb"),
            gpu: 0,
            delay_secs: None,
            command: DEFAULT_COMMAND.iter().map(|s| s.to_string()).collect(),
            set_cuda_visible_devices: false,
        }
    }
}

impl BatchConfig {
    /// Pause applied after a successful segment, if any.
    ///
    /// A zero delay is treated as no delay.
    pub fn delay(&self) -> Option<Duration> {
        self.delay_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Segment identifiers covered by this run, in ascending order.
    ///
    /// Empty when `start > end`.
    pub fn segments(&self) -> impl Iterator<Item = SegmentId> {
        (self.start..=self.end).map(SegmentId::new)
    }

    /// Number of segments in the configured range
    pub fn segment_count(&self) -> usize {
        if self.start > self.end {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    /// Job for one segment of this run
    pub fn job(&self, segment: SegmentId) -> BatchJob {
        BatchJob::new(segment, &self.base_dir, &self.topology, self.gpu)
    }

    /// Jobs for this run in launch order, built as they are consumed
    pub fn jobs(&self) -> impl Iterator<Item = BatchJob> + '_ {
        self.segments().map(move |segment| self.job(segment))
    }

    /// Check the configuration for values the driver cannot work with
    pub fn validate(&self) -> Result<()> {
        match self.command.first() {
            None => Err(BatchError::Config("launch command must not be empty".to_string())),
            Some(program) if program.trim().is_empty() => Err(BatchError::Config(
                "launch command must name a program".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }

    /// Apply a layer of overrides on top of this configuration
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(start) = overrides.start {
            self.start = start;
        }
        if let Some(end) = overrides.end {
            self.end = end;
        }
        if let Some(base_dir) = overrides.base_dir {
            self.base_dir = base_dir;
        }
        if let Some(topology) = overrides.topology {
            self.topology = topology;
        }
        if let Some(gpu) = overrides.gpu {
            self.gpu = gpu;
        }
        if let Some(delay_secs) = overrides.delay_secs {
            self.delay_secs = Some(delay_secs);
        }
        if let Some(command) = overrides.command {
            self.command = command;
        }
        if let Some(flag) = overrides.set_cuda_visible_devices {
            self.set_cuda_visible_devices = flag;
        }
    }

    /// Defaults, then the optional config file, then `overrides`
    pub fn load(file: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = file {
            config.apply(ConfigOverrides::from_file(path)?);
        }
        config.apply(overrides);
        config.validate()?;

        debug!(
            start = config.start,
            end = config.end,
            gpu = config.gpu,
            delay_secs = ?config.delay_secs,
            "Resolved batch configuration"
        );
        Ok(config)
    }
}

/// A partial configuration layer; unset fields leave the lower layer alone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    /// First segment index
    pub start: Option<u32>,
    /// Last segment index
    pub end: Option<u32>,
    /// Segment directory
    pub base_dir: Option<PathBuf>,
    /// Topology file
    pub topology: Option<PathBuf>,
    /// GPU index
    pub gpu: Option<u32>,
    /// Post-success pause in seconds
    pub delay_secs: Option<u64>,
    /// Launch command
    pub command: Option<Vec<String>>,
    /// Export `CUDA_VISIBLE_DEVICES`
    pub set_cuda_visible_devices: Option<bool>,
}

impl ConfigOverrides {
    /// Read a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse a JSON config document
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
