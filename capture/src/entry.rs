use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use strum_macros::EnumString;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    /// Maps a level token as printed by common loggers. Unknown tokens
    /// yield `None`.
    pub fn from_level_token(token: &str) -> Option<Self> {
        let token = token.trim();
        if let Ok(severity) = token.parse::<Severity>() {
            return Some(severity);
        }
        match token.to_ascii_uppercase().as_str() {
            "VERBOSE" | "TRACE" => Some(Severity::Debug),
            "LOG" => Some(Severity::Info),
            "WARNING" => Some(Severity::Warn),
            _ => None,
        }
    }
}

/// The physical output stream a write came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One captured line. Immutable once appended to the buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(rename = "level")]
    pub severity: Severity,
    pub message: String,
}

impl LogEntry {
    pub fn new(timestamp: i64, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            severity,
            message: message.into(),
        }
    }
}
