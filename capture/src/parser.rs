use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::entry::Severity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLine {
    #[serde(rename = "level")]
    pub severity: Severity,
    pub message: String,
}

impl ParsedLine {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }
}

/// Turns one decoded chunk of output into a severity and a message.
///
/// Implementations must not block and must accept any input.
pub trait LineParser: Send + Sync {
    fn parse(&self, raw: &str) -> ParsedLine;
}

impl<F> LineParser for F
where
    F: Fn(&str) -> ParsedLine + Send + Sync,
{
    fn parse(&self, raw: &str) -> ParsedLine {
        self(raw)
    }
}

/// Every chunk is an INFO message, verbatim.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainParser;

impl LineParser for PlainParser {
    fn parse(&self, raw: &str) -> ParsedLine {
        ParsedLine::info(raw)
    }
}

// `[Nest] 123  -  01/01/2024, 10:00:00 AM  ERROR [ctx] failed`
static APP_PREFIXED_LINE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"\[[^\]]+\] (\d+)\s+-\s+([\d/,:APM\s]+)\s+([A-Za-z]+)\s+\[([^\]]+)\]\s+(.*)\s*").ok()
});

// `[WARN] disk low`
static LEVEL_PREFIXED_LINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\s*\[([A-Za-z]+)\]\s*(.*)").ok());

/// Recognises bracketed log lines and pulls out their level and message.
/// Anything else is handled like [`PlainParser`].
#[derive(Debug, Default, Clone, Copy)]
pub struct BracketedParser;

impl BracketedParser {
    fn parse_app_prefixed(raw: &str) -> Option<ParsedLine> {
        let captures = APP_PREFIXED_LINE.as_ref()?.captures(raw)?;
        let level = captures.get(3)?.as_str();
        let message = captures.get(5)?.as_str();
        Some(ParsedLine {
            severity: Severity::from_level_token(level).unwrap_or(Severity::Info),
            message: message.trim_end().to_string(),
        })
    }

    fn parse_level_prefixed(raw: &str) -> Option<ParsedLine> {
        let captures = LEVEL_PREFIXED_LINE.as_ref()?.captures(raw)?;
        let severity = Severity::from_level_token(captures.get(1)?.as_str())?;
        let message = captures.get(2)?.as_str();
        Some(ParsedLine {
            severity,
            message: message.trim_end().to_string(),
        })
    }
}

impl LineParser for BracketedParser {
    fn parse(&self, raw: &str) -> ParsedLine {
        Self::parse_app_prefixed(raw)
            .or_else(|| Self::parse_level_prefixed(raw))
            .unwrap_or_else(|| PlainParser.parse(raw))
    }
}
