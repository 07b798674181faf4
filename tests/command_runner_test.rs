//! End-to-end runs against real child processes (unix only).
#![cfg(unix)]

use segment_batch::batch::{BatchExecutor, CommandRunner};
use segment_batch::config::BatchConfig;
use segment_batch::BatchError;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Shell launch command that appends its `--dcd_file` argument to `log`
/// and exits with 7 for `segment_18.dcd`.
fn logging_command(log: &PathBuf) -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!(
            r#"echo "$2 $4 $6" >> '{}'; case "$2" in *segment_18.dcd) exit 7;; esac"#,
            log.display()
        ),
        "rebuild".to_string(),
    ]
}

fn scratch(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("segment-batch-{}-{}", name, std::process::id()));
    std::fs::remove_file(&path).ok();
    path
}

#[tokio::test]
async fn test_real_processes_stop_at_failing_segment() {
    let log = scratch("failing.log");
    let config = BatchConfig {
        start: 13,
        end: 25,
        base_dir: PathBuf::from("/data/traj"),
        topology: PathBuf::from("/data/HCV_110_short.pdb"),
        gpu: 1,
        command: logging_command(&log),
        ..BatchConfig::default()
    };
    let runner = CommandRunner::new(config.command.clone()).expect("runner should build");
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();

    let report = BatchExecutor::new(config)
        .with_progress_callback(move |e| sink.lock().unwrap().push(e.to_string()))
        .execute(&runner)
        .await;

    let invocations: Vec<String> = std::fs::read_to_string(&log)
        .expect("log should exist")
        .lines()
        .map(str::to_string)
        .collect();
    std::fs::remove_file(&log).ok();

    assert_eq!(invocations.len(), 6);
    assert_eq!(
        invocations[0],
        "/data/traj/segment_13.dcd /data/HCV_110_short.pdb 1"
    );
    assert_eq!(
        invocations[5],
        "/data/traj/segment_18.dcd /data/HCV_110_short.pdb 1"
    );
    assert_eq!(
        lines.lock().unwrap().last().map(String::as_str),
        Some("Error processing segment_18")
    );

    let err = report.into_result().expect_err("batch should fail");
    assert!(matches!(err, BatchError::SegmentFailed { code: Some(7), .. }));
    assert_eq!(err.exit_code(), 7);
}

#[tokio::test]
async fn test_real_processes_all_succeed() {
    let log = scratch("passing.log");
    let config = BatchConfig {
        start: 1,
        end: 8,
        base_dir: PathBuf::from("segments"),
        command: logging_command(&log),
        ..BatchConfig::default()
    };
    let runner = CommandRunner::new(config.command.clone()).expect("runner should build");

    let report = BatchExecutor::new(config)
        .with_progress_callback(|_| {})
        .execute(&runner)
        .await;

    let invocations = std::fs::read_to_string(&log).expect("log should exist");
    std::fs::remove_file(&log).ok();

    assert!(report.is_success());
    let dcd_files: Vec<&str> = invocations
        .lines()
        .map(|l| l.split(' ').next().unwrap_or_default())
        .collect();
    assert_eq!(
        dcd_files,
        (1..=8)
            .map(|i| format!("segments/segment_{:02}.dcd", i))
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_input_check_with_real_files() {
    let dir = std::env::temp_dir().join(format!("segment-batch-inputs-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    let topology = dir.join("topology.pdb");
    std::fs::write(&topology, "END\n").expect("write topology");
    for i in 1..=2 {
        std::fs::write(dir.join(format!("segment_{:02}.dcd", i)), b"").expect("write segment");
    }

    let config = BatchConfig {
        start: 1,
        end: 3,
        base_dir: dir.clone(),
        topology,
        command: vec!["true".to_string()],
        ..BatchConfig::default()
    };
    let runner = CommandRunner::new(config.command.clone()).expect("runner should build");
    let report = BatchExecutor::new(config)
        .with_input_check(true)
        .with_progress_callback(|_| {})
        .execute(&runner)
        .await;
    std::fs::remove_dir_all(&dir).ok();

    match report.failure() {
        Some(BatchError::MissingInput(path)) => assert!(path.ends_with("segment_03.dcd")),
        other => panic!("expected missing segment_03, got {other:?}"),
    }
    assert!(report.attempted().is_empty());
}
