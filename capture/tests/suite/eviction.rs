use std::sync::Arc;

use crashlog_capture::CaptureConfig;
use crashlog_capture::CaptureEntry;
use crashlog_capture::LogCapture;
use crashlog_capture::ManualClock;
use crashlog_capture::StreamKind;

/// Small deterministic generator so the interleaving below is reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

#[test]
fn eviction_respects_the_floor_across_interleaved_windows() {
    let clock = Arc::new(ManualClock::new(0));
    let capture = LogCapture::with_clock(CaptureConfig::default(), clock.clone());
    let mut rng = Lcg(42);
    let mut open: Vec<CaptureEntry> = Vec::new();
    let mut written: Vec<i64> = Vec::new();

    for _ in 0..500 {
        clock.advance((rng.next() % 3) as i64);
        match rng.next() % 5 {
            0 => open.push(capture.add_capture_entry()),
            1 if !open.is_empty() => {
                let idx = (rng.next() as usize) % open.len();
                let entry = open.swap_remove(idx);
                capture.remove_capture_entry(&entry);
            }
            2 => {
                let before = capture.get_captured_logs_between(i64::MIN, i64::MAX);
                capture.erase_unused_logs();
                let after = capture.get_captured_logs_between(i64::MIN, i64::MAX);
                match open.iter().map(|entry| entry.opened_at).min() {
                    Some(floor) => {
                        let expected: Vec<_> = before
                            .into_iter()
                            .filter(|entry| entry.timestamp >= floor)
                            .collect();
                        assert_eq!(after, expected);
                    }
                    None => assert_eq!(after, before),
                }
            }
            _ => {
                capture.append(StreamKind::Stdout, "line");
                written.push(capture.now_ms());
            }
        }
    }

    // Every open window can still see everything written since it opened.
    for entry in &open {
        let visible = capture.logs_since(entry).len();
        let expected = written.iter().filter(|ts| **ts >= entry.opened_at).count();
        assert_eq!(visible, expected);
    }
}

#[test]
fn eviction_without_any_window_keeps_startup_lines() {
    let clock = Arc::new(ManualClock::new(0));
    let capture = LogCapture::with_clock(CaptureConfig::default(), clock.clone());
    capture.append(StreamKind::Stdout, "booting");
    clock.advance(1_000);
    assert_eq!(capture.erase_unused_logs(), 0);

    let first = capture.add_capture_entry();
    assert_eq!(capture.erase_unused_logs(), 1);
    assert!(capture.logs_since(&first).is_empty());
}
