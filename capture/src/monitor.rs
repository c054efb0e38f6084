//! Collaborator-side helper that wraps a monitored operation in a capture
//! window and turns failures into reports.

use std::sync::Arc;

use async_trait::async_trait;
use crashlog_utils_readiness::Readiness;
use crashlog_utils_readiness::ReadinessFlag;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::entry::LogEntry;
use crate::entry::Severity;
use crate::error::Result;
use crate::log_capture::LogCapture;
use crate::registry::CaptureEntry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLogs {
    pub entries: Vec<LogEntry>,
}

/// What gets handed to the crash-reporting service when an operation fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub name: String,
    pub message: String,
    pub level: Severity,
    pub timestamp: i64,
    pub logs: ReportLogs,
}

impl FailureReport {
    pub fn to_json(&self, pretty: bool) -> Result<String> {
        let json = if pretty {
            serde_json::to_string_pretty(self)?
        } else {
            serde_json::to_string(self)?
        };
        Ok(json)
    }
}

/// Destination for failure reports, typically a remote service client.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn submit(&self, report: FailureReport) -> anyhow::Result<()>;
}

/// Opens a capture window per monitored operation once the report sink is
/// ready.
pub struct RequestMonitor {
    capture: Arc<LogCapture>,
    sink: Arc<dyn ReportSink>,
    readiness: Arc<ReadinessFlag>,
}

impl RequestMonitor {
    /// Starts out not ready; whoever prepares the sink subscribes to
    /// [`readiness`](Self::readiness) and marks it once done.
    pub fn new(capture: Arc<LogCapture>, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            capture,
            sink,
            readiness: Arc::new(ReadinessFlag::new()),
        }
    }

    pub fn readiness(&self) -> Arc<ReadinessFlag> {
        Arc::clone(&self.readiness)
    }

    pub fn capture(&self) -> &Arc<LogCapture> {
        &self.capture
    }

    /// Returns `None` while the sink is not ready; the operation then simply
    /// runs unmonitored.
    pub fn begin(&self, name: impl Into<String>) -> Option<MonitoredOperation> {
        if !self.readiness.is_ready() {
            debug!("report sink not ready; operation runs unmonitored");
            return None;
        }
        Some(self.open(name.into()))
    }

    /// Waits for the sink to become ready, then opens the window.
    pub async fn begin_when_ready(&self, name: impl Into<String>) -> MonitoredOperation {
        self.readiness.wait_ready().await;
        self.open(name.into())
    }

    fn open(&self, name: String) -> MonitoredOperation {
        MonitoredOperation {
            capture: Arc::clone(&self.capture),
            sink: Arc::clone(&self.sink),
            entry: Some(self.capture.add_capture_entry()),
            name,
        }
    }
}

/// A live capture window. Dropping it closes the window.
pub struct MonitoredOperation {
    capture: Arc<LogCapture>,
    sink: Arc<dyn ReportSink>,
    entry: Option<CaptureEntry>,
    name: String,
}

impl MonitoredOperation {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> Option<&CaptureEntry> {
        self.entry.as_ref()
    }

    /// Lines captured since the window opened.
    pub fn logs(&self) -> Vec<LogEntry> {
        match &self.entry {
            Some(entry) => self.capture.logs_since(entry),
            None => Vec::new(),
        }
    }

    /// Successful completion: closes the window and erases unused lines.
    pub fn finish(mut self) {
        self.release();
    }

    /// Failed completion: reports the window's lines to the sink, then
    /// closes it. Sink failures are logged and otherwise ignored.
    pub async fn fail(mut self, message: impl Into<String>) -> FailureReport {
        let report = FailureReport {
            name: self.name.clone(),
            message: message.into(),
            level: Severity::Error,
            timestamp: self.capture.now_ms(),
            logs: ReportLogs {
                entries: self.logs(),
            },
        };
        self.release();
        if let Err(err) = self.sink.submit(report.clone()).await {
            warn!(name = %report.name, "failed to submit failure report: {err:#}");
        }
        report
    }

    fn release(&mut self) {
        if let Some(entry) = self.entry.take() {
            self.capture.remove_capture_entry(&entry);
            self.capture.erase_unused_logs();
        }
    }
}

impl Drop for MonitoredOperation {
    fn drop(&mut self) {
        self.release();
    }
}
