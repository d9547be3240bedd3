//! Exit reporting pieces of the supervisor that do not need a live pool.

use std::process::Command;

use fdrelay::dispatcher::DispatchSummary;
use fdrelay::logging::LogFormat;
use fdrelay::supervisor::{describe_exit, RunSummary, WorkerExit};
use fdrelay::worker::WorkerReport;

fn exit_with(code: i32) -> std::process::ExitStatus {
    Command::new("sh")
        .arg("-c")
        .arg(format!("exit {code}"))
        .status()
        .expect("run sh")
}

#[test]
fn describes_clean_exit() {
    assert_eq!(describe_exit(Some(exit_with(0))), "exited normally (code 0)");
}

#[test]
fn describes_exit_code() {
    assert_eq!(describe_exit(Some(exit_with(3))), "exited with code 3");
}

#[test]
fn describes_signal_death() {
    let status = Command::new("sh")
        .arg("-c")
        .arg("kill -9 $$")
        .status()
        .expect("run sh");
    assert_eq!(describe_exit(Some(status)), "terminated by signal");
}

#[test]
fn describes_unknown_status() {
    assert_eq!(describe_exit(None), "status unknown");
}

#[test]
fn worker_report_is_one_json_line() {
    let report = WorkerReport {
        pid: 42,
        received: 7,
        closed: 5,
        active: 2,
    };
    let line = serde_json::to_string(&report).expect("encode");
    assert!(!line.contains('\n'));
    let decoded: WorkerReport = serde_json::from_str(&line).expect("decode");
    assert_eq!(decoded, report);
}

#[test]
fn run_summary_totals_reported_handles() {
    let exit = |index, report: Option<WorkerReport>| WorkerExit {
        index,
        pid: None,
        status: None,
        report,
    };
    let summary = RunSummary {
        dispatch: DispatchSummary {
            dispatched: 5,
            accept_failures: 0,
        },
        workers: vec![
            exit(0, Some(WorkerReport { received: 2, ..WorkerReport::default() })),
            exit(1, None),
            exit(2, Some(WorkerReport { received: 3, ..WorkerReport::default() })),
        ],
    };
    assert_eq!(summary.total_received(), 5);
    assert!(!summary.workers[1].success());
}

#[test]
fn log_format_round_trips_through_cli_spelling() {
    use clap::ValueEnum;

    for format in [LogFormat::Text, LogFormat::Json] {
        let parsed = LogFormat::from_str(format.as_arg(), false).expect("parse");
        assert_eq!(parsed, format);
    }
    assert_eq!(LogFormat::default(), LogFormat::Text);
}
