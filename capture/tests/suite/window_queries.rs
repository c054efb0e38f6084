use std::io::Write;
use std::sync::Arc;

use crashlog_capture::CaptureConfig;
use crashlog_capture::LogCapture;
use crashlog_capture::LogEntry;
use crashlog_capture::ManualClock;
use crashlog_capture::ParserKind;
use crashlog_capture::Severity;
use crashlog_capture::StreamKind;
use pretty_assertions::assert_eq;

fn capture_at(start_ms: i64, config: CaptureConfig) -> (LogCapture, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_ms));
    (LogCapture::with_clock(config, clock.clone()), clock)
}

#[test]
fn window_returns_exactly_the_lines_written_inside_it() {
    let (capture, clock) = capture_at(1_000, CaptureConfig::default());
    capture.append(StreamKind::Stdout, "noise before the window");
    clock.advance(1);

    let entry = capture.add_capture_entry();
    let mut stdout = capture.stdout_writer(Vec::new());
    for idx in 0..25 {
        clock.advance(idx % 3);
        stdout
            .write_all(format!("line {idx}\n").as_bytes())
            .expect("write");
    }

    let entries = capture.get_captured_logs_between(entry.opened_at, capture.now_ms());
    let expected: Vec<String> = (0..25).map(|idx| format!("line {idx}\n")).collect();
    let messages: Vec<String> = entries.iter().map(|e| e.message.clone()).collect();
    assert_eq!(messages, expected);
    assert!(entries.iter().all(|e| e.severity == Severity::Info));
    assert!(
        entries
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    );
}

#[test]
fn repeated_queries_are_identical() {
    let (capture, clock) = capture_at(0, CaptureConfig::default());
    for idx in 0..10 {
        clock.set(idx * 10);
        capture.append(StreamKind::Stdout, &format!("tick {idx}"));
    }
    let first = capture.get_captured_logs_between(15, 65);
    let second = capture.get_captured_logs_between(15, 65);
    assert_eq!(first, second);
    assert_eq!(first.len(), 5);
    assert!(first.iter().all(|e| (15..=65).contains(&e.timestamp)));
}

#[test]
fn inverted_window_is_empty() {
    let (capture, _clock) = capture_at(50, CaptureConfig::default());
    capture.append(StreamKind::Stdout, "present");
    assert!(capture.get_captured_logs_between(60, 40).is_empty());
}

#[test]
fn structured_stdout_and_forced_stderr_severity() {
    let config = CaptureConfig {
        parser: ParserKind::Bracketed,
        ..CaptureConfig::default()
    };
    let (capture, _clock) = capture_at(0, config);
    let mut stdout = capture.stdout_writer(Vec::new());
    let mut stderr = capture.stderr_writer(Vec::new());

    stdout
        .write_all(b"[Nest] 123  -  01/01/2024, 10:00:00 AM  ERROR [ctx] failed\n")
        .expect("stdout");
    stderr
        .write_all(b"[Nest] 123  -  01/01/2024, 10:00:00 AM  INFO [ctx] fine\n")
        .expect("stderr");

    assert_eq!(
        capture.get_captured_logs_between(0, 0),
        vec![
            LogEntry::new(0, Severity::Error, "failed"),
            LogEntry::new(
                0,
                Severity::Error,
                "[Nest] 123  -  01/01/2024, 10:00:00 AM  INFO [ctx] fine\n"
            ),
        ]
    );
}

#[test]
fn queries_after_close_still_see_buffered_lines() {
    let (capture, clock) = capture_at(0, CaptureConfig::default());
    let entry = capture.add_capture_entry();
    capture.append(StreamKind::Stderr, "last words");
    capture.close();
    clock.advance(100);
    capture.append(StreamKind::Stdout, "after close");

    let entries = capture.logs_since(&entry);
    assert_eq!(entries, vec![LogEntry::new(0, Severity::Error, "last words")]);
}

#[test]
fn double_close_of_an_entry_leaves_others_open() {
    let (capture, _clock) = capture_at(0, CaptureConfig::default());
    let first = capture.add_capture_entry();
    let second = capture.add_capture_entry();
    assert!(capture.remove_capture_entry(&first));
    assert!(!capture.remove_capture_entry(&first));
    assert_eq!(capture.live_capture_entries(), vec![second]);
}
