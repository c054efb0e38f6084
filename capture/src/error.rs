use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to read capture config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid capture config: {0}")]
    InvalidConfig(#[from] toml::de::Error),

    #[error("failed to tap fd {fd}: {source}")]
    Tap {
        fd: i32,
        #[source]
        source: io::Error,
    },

    #[error("capture is closed")]
    Closed,

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CaptureError {
    #[cfg_attr(not(unix), allow(dead_code))]
    pub(crate) fn tap(fd: i32, source: io::Error) -> Self {
        Self::Tap { fd, source }
    }
}
