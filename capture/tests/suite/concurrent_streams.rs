use std::io::Write;
use std::sync::Arc;
use std::thread;

use crashlog_capture::CaptureConfig;
use crashlog_capture::LogCapture;
use crashlog_capture::Severity;
use crashlog_capture::StreamKind;
use pretty_assertions::assert_eq;

const LINES_PER_STREAM: usize = 200;

#[test]
fn both_streams_interleave_without_loss_or_reordering() {
    let capture = Arc::new(LogCapture::new(CaptureConfig::default()));
    let entry = capture.add_capture_entry();

    let writers: Vec<_> = [StreamKind::Stdout, StreamKind::Stderr]
        .into_iter()
        .map(|stream| {
            let capture = Arc::clone(&capture);
            thread::spawn(move || {
                let mut sink = match stream {
                    StreamKind::Stdout => capture.stdout_writer(Vec::new()),
                    StreamKind::Stderr => capture.stderr_writer(Vec::new()),
                };
                for idx in 0..LINES_PER_STREAM {
                    sink.write_all(format!("{stream} {idx}\n").as_bytes())
                        .expect("write");
                }
                sink.into_inner()
            })
        })
        .collect();

    for handle in writers {
        let forwarded = handle.join().expect("writer thread");
        assert_eq!(
            String::from_utf8(forwarded).expect("utf8").lines().count(),
            LINES_PER_STREAM
        );
    }

    let entries = capture.logs_since(&entry);
    assert_eq!(entries.len(), 2 * LINES_PER_STREAM);
    assert!(
        entries
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    );

    for (stream, severity) in [
        (StreamKind::Stdout, Severity::Info),
        (StreamKind::Stderr, Severity::Error),
    ] {
        let prefix = format!("{stream} ");
        let per_stream: Vec<&str> = entries
            .iter()
            .filter(|e| e.message.starts_with(&prefix))
            .map(|e| {
                assert_eq!(e.severity, severity);
                e.message.as_str()
            })
            .collect();
        let expected: Vec<String> = (0..LINES_PER_STREAM)
            .map(|idx| format!("{stream} {idx}\n"))
            .collect();
        assert_eq!(per_stream, expected);
    }
}
