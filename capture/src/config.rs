use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::CaptureError;
use crate::error::Result;
use crate::parser::BracketedParser;
use crate::parser::LineParser;
use crate::parser::PlainParser;

const DEFAULT_SWEEP_INTERVAL_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    #[default]
    Plain,
    Bracketed,
}

impl ParserKind {
    pub fn build(self) -> Arc<dyn LineParser> {
        match self {
            ParserKind::Plain => Arc::new(PlainParser),
            ParserKind::Bracketed => Arc::new(BracketedParser),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Parser applied to stdout. stderr is always recorded as ERROR.
    pub parser: ParserKind,
    pub capture_stdout: bool,
    pub capture_stderr: bool,
    /// Windows open longer than this are force-closed before eviction.
    /// Unset means windows live until their owner closes them.
    pub max_window_age_ms: Option<u64>,
    pub sweep_interval_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            parser: ParserKind::default(),
            capture_stdout: true,
            capture_stderr: true,
            max_window_age_ms: None,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl CaptureConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| CaptureError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn max_window_age(&self) -> Option<Duration> {
        self.max_window_age_ms.map(Duration::from_millis)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}
