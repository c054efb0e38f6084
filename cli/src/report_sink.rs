use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use async_trait::async_trait;
use crashlog_capture::FailureReport;
use crashlog_capture::ReportSink;

/// Writes failure reports as JSON to a file, or to stdout when no path is
/// given.
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    path: Option<PathBuf>,
    pretty: bool,
}

impl JsonReportSink {
    pub fn new(path: Option<PathBuf>, pretty: bool) -> Self {
        Self { path, pretty }
    }

    /// Creates the report directory. Must complete before reports are
    /// submitted.
    pub async fn prepare(&self) -> Result<()> {
        let Some(parent) = self.path.as_ref().and_then(|path| path.parent()) else {
            return Ok(());
        };
        if parent.as_os_str().is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!(
                "failed to create report directory at {}",
                parent.display()
            )
        })
    }
}

#[async_trait]
impl ReportSink for JsonReportSink {
    async fn submit(&self, report: FailureReport) -> Result<()> {
        let json = report.to_json(self.pretty)?;
        match &self.path {
            Some(path) => tokio::fs::write(path, format!("{json}\n"))
                .await
                .with_context(|| format!("failed to write report to {}", path.display()))?,
            None => println!("{json}"),
        }
        Ok(())
    }
}
