//! Kernel logger and capture buffer tests.

mod common;

use std::fmt;
use std::sync::Mutex as StdMutex;

use common::{setup, tick};
use kaos_tasking::logging;
use kaos_tasking::scheduler as sched;
use kaos_tasking::worker::Worker;

static SINK_LINES: StdMutex<Vec<String>> = StdMutex::new(Vec::new());

fn test_sink(args: &fmt::Arguments<'_>) {
    SINK_LINES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .push(args.to_string());
}

extern "C" fn alpha() {}

fn start_capture() {
    logging::init(Some(test_sink));
    logging::set_capture_enabled(true);
}

#[test]
fn test_spawn_and_kill_are_logged() {
    let _guard = setup();
    start_capture();

    let id = sched::spawn(alpha, "alpha");
    sched::kill(id);

    let lines = logging::captured_lines("sched");
    assert!(
        lines.iter().any(|line| line.starts_with("created task 2 (alpha)")),
        "missing creation record in {:?}",
        lines
    );
    assert!(
        lines.iter().any(|line| line == "killed task 2 (alpha)"),
        "missing kill record in {:?}",
        lines
    );
    logging::set_capture_enabled(false);
}

#[test]
fn test_wakeup_is_logged_with_id_and_name() {
    let _guard = setup();
    start_capture();

    let id = sched::spawn(alpha, "dozer");
    common::run_until_current(id, 2);
    common::set_yield_hook(|| {
        tick();
    });
    sched::sleep(10);
    common::clear_yield_hook();
    common::timer_tick();

    let lines = logging::captured_lines("sched");
    assert!(
        lines.iter().any(|line| line == "waking task from sleep: id 2 (dozer)"),
        "missing wakeup record in {:?}",
        lines
    );
    logging::set_capture_enabled(false);
}

#[test]
fn test_capture_is_filtered_by_target() {
    let _guard = setup();
    start_capture();

    let _worker = Worker::create("logged");

    let worker_lines = logging::captured_lines("worker");
    assert!(
        worker_lines.iter().any(|line| line.starts_with("created worker logged")),
        "missing worker record in {:?}",
        worker_lines
    );
    assert!(
        logging::captured_lines("sched")
            .iter()
            .all(|line| !line.starts_with("created worker")),
        "records must only show up under their own target"
    );
    logging::set_capture_enabled(false);
}

#[test]
fn test_disabled_capture_records_nothing() {
    let _guard = setup();
    logging::init(Some(test_sink));
    logging::set_capture_enabled(false);

    let _ = sched::spawn(alpha, "quiet");
    assert!(logging::captured_lines("sched").is_empty());
}

#[test]
fn test_sink_receives_formatted_records() {
    let _guard = setup();
    SINK_LINES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clear();
    logging::init(Some(test_sink));

    let _ = sched::spawn(alpha, "sunk");

    let lines = SINK_LINES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();
    assert!(
        lines
            .iter()
            .any(|line| line.starts_with("[INFO sched] created task 2 (sunk)")),
        "sink must see level and target, got {:?}",
        lines
    );
}

#[test]
fn test_capture_overflow_is_tracked() {
    let _guard = common::serial();
    start_capture();

    let filler = "x".repeat(1024);
    for _ in 0..20 {
        log::info!(target: "list", "{}", filler);
    }

    assert!(logging::capture_overflowed(), "a full buffer must be flagged");
    assert!(
        logging::captured_lines("list").len() < 20,
        "records past the buffer end must be dropped"
    );

    logging::set_capture_enabled(true);
    assert!(!logging::capture_overflowed(), "re-enabling must reset the buffer");
    logging::set_capture_enabled(false);
}

#[test]
fn test_multiline_message_keeps_every_line() {
    let _guard = common::serial();
    start_capture();

    log::info!(target: "worker", "first\nsecond");
    log::info!(target: "sched", "after");

    let lines = logging::captured_lines("worker");
    assert!(
        lines == vec!["first".to_string(), "second".to_string()],
        "every line must stay under its target, got {:?}",
        lines
    );
    assert!(logging::captured_lines("sched") == vec!["after".to_string()]);
    logging::set_capture_enabled(false);
}
