//! In-process capture of stdout/stderr, correlated with capture windows
//! opened around monitored operations.
//!
//! Output flows through a [`StreamInterceptor`] per stream into the
//! [`LogCapture`] buffer. Collaborators open a [`CaptureEntry`] when an
//! operation starts, read the lines captured since, and close the entry when
//! the operation ends; [`LogCapture::erase_unused_logs`] then drops whatever
//! no open window can still ask for.

mod buffer;
pub mod clock;
pub mod config;
pub mod decoder;
pub mod entry;
pub mod error;
#[cfg(unix)]
pub mod fd_tap;
pub mod interceptor;
mod log_capture;
pub mod monitor;
pub mod parser;
mod registry;

pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use config::CaptureConfig;
pub use config::ParserKind;
pub use entry::LogEntry;
pub use entry::Severity;
pub use entry::StreamKind;
pub use error::CaptureError;
pub use error::Result;
#[cfg(unix)]
pub use fd_tap::FdTap;
pub use interceptor::InterceptedWriter;
pub use interceptor::StreamInterceptor;
pub use log_capture::CaptureStats;
pub use log_capture::LogCapture;
pub use monitor::FailureReport;
pub use monitor::MonitoredOperation;
pub use monitor::ReportLogs;
pub use monitor::ReportSink;
pub use monitor::RequestMonitor;
pub use parser::BracketedParser;
pub use parser::LineParser;
pub use parser::ParsedLine;
pub use parser::PlainParser;
pub use registry::CaptureEntry;
pub use registry::CaptureId;
