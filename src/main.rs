//! Run the trajectory rebuild program over a range of segment files.
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use segment_batch::batch::{BatchExecutor, CommandRunner};
use segment_batch::config::{BatchConfig, ConfigOverrides};
use segment_batch::BatchError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_STATUS_HELP: &str = "\
Exit status:
  0        every segment succeeded (also for an empty range and --dry-run)
  1..=255  the failing segment's own exit code, passed through unchanged
  1        a segment was killed by a signal, could not be launched, or an input is missing
  2        invalid configuration or usage

A segment that itself exits with 1 or 2 is indistinguishable from the cases above
by status alone; the `Error processing segment_<NN>` line names the failure.";

/// Invoke the analysis program once per trajectory segment, in order,
/// stopping at the first segment that fails.
#[derive(Parser, Debug)]
#[command(version, after_help = EXIT_STATUS_HELP)]
struct Args {
    /// JSON config file. Flags and environment variables override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// First segment index (inclusive).
    #[arg(long, env = "SEGMENT_BATCH_START")]
    start: Option<u32>,

    /// Last segment index (inclusive).
    #[arg(long, env = "SEGMENT_BATCH_END")]
    end: Option<u32>,

    /// Directory holding the `segment_<NN>.dcd` files.
    #[arg(long, env = "SEGMENT_BATCH_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Topology (pdb) file passed to every invocation.
    #[arg(long, env = "SEGMENT_BATCH_TOPOLOGY")]
    topology: Option<PathBuf>,

    /// GPU device index passed through as `--gpu`.
    #[arg(long, env = "SEGMENT_BATCH_GPU")]
    gpu: Option<u32>,

    /// Seconds to wait after each successful segment.
    ///
    /// No pause follows the last segment.
    #[arg(long, env = "SEGMENT_BATCH_DELAY_SECS")]
    delay_secs: Option<u64>,

    /// Launch command, split on whitespace (default: `python parallel_v2.py`).
    #[arg(long)]
    command: Option<String>,

    /// Also export `CUDA_VISIBLE_DEVICES=<gpu>` to the program.
    #[arg(long)]
    cuda_visible_devices: bool,

    /// Check that the topology and all segment files exist before starting.
    #[arg(long)]
    check_inputs: bool,

    /// Print the planned command lines and exit without running anything.
    #[arg(long)]
    dry_run: bool,

    /// Write a JSON report of the run to this path.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Debug-level logging (unless `RUST_LOG` is set).
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            start: self.start,
            end: self.end,
            base_dir: self.base_dir.clone(),
            topology: self.topology.clone(),
            gpu: self.gpu,
            delay_secs: self.delay_secs,
            command: self
                .command
                .as_ref()
                .map(|c| c.split_whitespace().map(str::to_string).collect()),
            set_cuda_visible_devices: self.cuda_visible_devices.then_some(true),
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "segment_batch=debug"
    } else {
        "segment_batch=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = BatchConfig::load(args.config.as_deref(), args.overrides())
        .context("failed to resolve configuration")?;
    let runner = CommandRunner::new(config.command.clone())?
        .with_cuda_visible_devices(config.set_cuda_visible_devices);

    let executor = BatchExecutor::new(config).with_input_check(args.check_inputs);

    if args.dry_run {
        for job in executor.config().jobs() {
            println!("{}", runner.command_line(&job));
        }
        return Ok(());
    }

    let report = executor.execute(&runner).await;

    let mut report_error = None;
    if let Some(path) = &args.report {
        match report.write_json(path) {
            Ok(()) => info!(path = %path.display(), "Wrote batch report"),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Could not write batch report");
                report_error = Some(e);
            }
        }
    }

    report.into_result()?;
    if let Some(e) = report_error {
        return Err(e).context("failed to write batch report");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e
                .downcast_ref::<BatchError>()
                .map(BatchError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}
