use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::buffer::LogBuffer;
use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::config::CaptureConfig;
use crate::entry::LogEntry;
use crate::entry::Severity;
use crate::entry::StreamKind;
#[cfg(unix)]
use crate::error::CaptureError;
#[cfg(unix)]
use crate::error::Result;
#[cfg(unix)]
use crate::fd_tap::FdTap;
use crate::interceptor::InterceptedWriter;
use crate::interceptor::StreamInterceptor;
use crate::parser::LineParser;
use crate::registry::CaptureEntry;
use crate::registry::CaptureRegistry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub buffered: usize,
    pub oldest_timestamp: Option<i64>,
    pub live_windows: usize,
    pub total_appended: u64,
    pub total_evicted: u64,
}

/// State shared with the interceptor callbacks.
struct Appender {
    clock: Arc<dyn Clock>,
    parser: Arc<dyn LineParser>,
    buffer: Mutex<LogBuffer>,
    closed: AtomicBool,
}

impl Appender {
    fn buffer(&self) -> MutexGuard<'_, LogBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, stream: StreamKind, raw: &str) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let (severity, message) = match stream {
            StreamKind::Stdout => {
                let parsed = self.parser.parse(raw);
                (parsed.severity, parsed.message)
            }
            StreamKind::Stderr => (Severity::Error, raw.to_string()),
        };
        let mut buffer = self.buffer();
        // Stamp under the lock so append order and timestamp order agree.
        buffer.push(self.clock.now_ms(), severity, message);
    }
}

/// Buffers everything written to the monitored streams and serves it back
/// per capture window.
///
/// Build one per process, share it behind an `Arc`, and [`close`] it at
/// shutdown.
///
/// [`close`]: LogCapture::close
pub struct LogCapture {
    appender: Arc<Appender>,
    registry: CaptureRegistry,
    stdout: StreamInterceptor,
    stderr: StreamInterceptor,
    config: CaptureConfig,
    #[cfg(unix)]
    taps: Mutex<Vec<FdTap>>,
}

impl LogCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CaptureConfig, clock: Arc<dyn Clock>) -> Self {
        let parser = config.parser.build();
        Self::from_parts(config, parser, clock)
    }

    /// Uses `parser` for stdout instead of the configured one.
    pub fn from_parts(
        config: CaptureConfig,
        parser: Arc<dyn LineParser>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let appender = Arc::new(Appender {
            clock,
            parser,
            buffer: Mutex::new(LogBuffer::new()),
            closed: AtomicBool::new(false),
        });

        let stdout = StreamInterceptor::new(StreamKind::Stdout);
        let stderr = StreamInterceptor::new(StreamKind::Stderr);
        for (interceptor, enabled) in [
            (&stdout, config.capture_stdout),
            (&stderr, config.capture_stderr),
        ] {
            if !enabled {
                continue;
            }
            let appender = Arc::clone(&appender);
            let kind = interceptor.kind();
            interceptor.on_write(move |text| appender.append(kind, text));
        }

        Self {
            appender,
            registry: CaptureRegistry::new(),
            stdout,
            stderr,
            config,
            #[cfg(unix)]
            taps: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn interceptor(&self, stream: StreamKind) -> &StreamInterceptor {
        match stream {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        }
    }

    /// Wraps a sink that stands in for the process's stdout.
    pub fn stdout_writer<W: Write>(&self, sink: W) -> InterceptedWriter<W> {
        self.stdout.attach(sink)
    }

    /// Wraps a sink that stands in for the process's stderr.
    pub fn stderr_writer<W: Write>(&self, sink: W) -> InterceptedWriter<W> {
        self.stderr.attach(sink)
    }

    /// Redirects the real stdout/stderr descriptors through the interceptors
    /// so every write made by the process is captured.
    #[cfg(unix)]
    pub fn tap_process_streams(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CaptureError::Closed);
        }
        let mut taps = self.taps.lock().unwrap_or_else(PoisonError::into_inner);
        if !taps.is_empty() {
            return Ok(());
        }
        if self.config.capture_stdout {
            taps.push(FdTap::install(libc::STDOUT_FILENO, self.stdout.clone())?);
        }
        if self.config.capture_stderr {
            taps.push(FdTap::install(libc::STDERR_FILENO, self.stderr.clone())?);
        }
        Ok(())
    }

    /// Records one chunk of output from `stream`.
    pub fn append(&self, stream: StreamKind, raw: &str) {
        self.appender.append(stream, raw);
    }

    /// Opens a capture window stamped with the current time, never earlier
    /// than a line already buffered.
    pub fn add_capture_entry(&self) -> CaptureEntry {
        // Lock order: registry, then buffer.
        let entry = self.registry.open(|| {
            let now = self.appender.clock.now_ms();
            self.appender.buffer().stamp(now)
        });
        debug!(id = %entry.id, opened_at = entry.opened_at, "opened capture window");
        entry
    }

    /// Closes a capture window. Returns `false` if it was not open.
    pub fn remove_capture_entry(&self, entry: &CaptureEntry) -> bool {
        let removed = self.registry.close(entry);
        if removed {
            debug!(id = %entry.id, "closed capture window");
        }
        removed
    }

    pub fn live_capture_entries(&self) -> Vec<CaptureEntry> {
        self.registry.live_entries()
    }

    /// Lines stamped within `[start, end]`, oldest first.
    pub fn get_captured_logs_between(&self, start: i64, end: i64) -> Vec<LogEntry> {
        self.appender.buffer().between(start, end)
    }

    /// Lines captured since `entry` was opened.
    pub fn logs_since(&self, entry: &CaptureEntry) -> Vec<LogEntry> {
        self.get_captured_logs_between(entry.opened_at, self.now_ms())
    }

    /// Drops lines no open window can ask for. With no open window nothing
    /// is dropped. Returns the number of evicted lines.
    pub fn erase_unused_logs(&self) -> usize {
        if let Some(max_age) = self.config.max_window_age() {
            let max_age_ms = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
            let cutoff = self.now_ms().saturating_sub(max_age_ms);
            for stale in self.registry.close_opened_before(cutoff) {
                warn!(
                    id = %stale.id,
                    opened_at = stale.opened_at,
                    "force-closed capture window older than max_window_age"
                );
            }
        }

        // The registry stays locked until the buffer is trimmed so a window
        // cannot open below the floor in between.
        self.registry.with_floor(|floor| {
            let Some(floor) = floor else {
                return 0;
            };
            let evicted = self.appender.buffer().evict_before(floor);
            if evicted > 0 {
                debug!(evicted, floor, "erased unreachable log lines");
            }
            evicted
        })
    }

    /// Runs [`erase_unused_logs`](Self::erase_unused_logs) every `every`
    /// until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let capture = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        capture.erase_unused_logs();
                    }
                }
            }
        })
    }

    pub fn stats(&self) -> CaptureStats {
        let live_windows = self.registry.len();
        let buffer = self.appender.buffer();
        CaptureStats {
            buffered: buffer.len(),
            oldest_timestamp: buffer.oldest_timestamp(),
            live_windows,
            total_appended: buffer.total_appended(),
            total_evicted: buffer.total_evicted(),
        }
    }

    /// Current time on the capture's timeline: the clock reading, raised to
    /// the newest timestamp already handed out.
    pub fn now_ms(&self) -> i64 {
        let now = self.appender.clock.now_ms();
        self.appender.buffer().latest(now)
    }

    pub fn is_closed(&self) -> bool {
        self.appender.closed.load(Ordering::SeqCst)
    }

    /// Stops capturing. Buffered lines stay queryable. Idempotent.
    pub fn close(&self) {
        #[cfg(unix)]
        {
            let mut taps = self.taps.lock().unwrap_or_else(PoisonError::into_inner);
            for tap in taps.iter_mut() {
                if let Err(err) = tap.restore() {
                    warn!("failed to restore output tap: {err}");
                }
            }
            taps.clear();
        }
        self.stdout.detach();
        self.stderr.detach();
        if !self.appender.closed.swap(true, Ordering::SeqCst) {
            debug!("log capture closed");
        }
    }
}

impl Drop for LogCapture {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for LogCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogCapture")
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}
