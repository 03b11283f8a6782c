// Error types for the acquisition pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network timeout while talking to a site or an external tool
    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    /// External binary (yt-dlp, ffmpeg, ffprobe, chrome) not found
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// URL could not be parsed or is not supported
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to parse tool output or page content
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Command execution failed
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Request returned a non-success status
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    #[error("Network error: {0}")]
    Network(String),

    /// Page or resolver yielded nothing downloadable
    #[error("No media found: {0}")]
    NoMedia(String),

    #[error("Browser error: {0}")]
    Browser(String),

    /// Every strategy in the chain failed
    #[error("All strategies failed: {}", .reasons.join("; "))]
    ExtractionFailed { reasons: Vec<String> },

    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    /// Merge or audio repair failed (logged, never surfaced as a task failure)
    #[error("Reconciliation failed: {0}")]
    Reconciliation(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unknown error with details
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl DownloadError {
    /// Smart classification of raw tool stderr
    pub fn from_stderr(s: &str) -> Self {
        let lower = s.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            return Self::NetworkTimeout(first_line(s));
        }

        if (lower.contains("not found") && lower.contains("command"))
            || lower.contains("no such file")
        {
            return Self::ToolNotFound(first_line(s));
        }

        if lower.contains("unsupported url") || lower.contains("invalid url") {
            return Self::InvalidUrl(first_line(s));
        }

        if lower.contains("requested format is not available")
            || lower.contains("no video formats found")
        {
            return Self::NoMedia(first_line(s));
        }

        if lower.contains("json") || lower.contains("parse") {
            return Self::ParseError(first_line(s));
        }

        Self::ExecutionError(first_line(s))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// First non-empty line, preferring yt-dlp style `ERROR:` lines
fn first_line(s: &str) -> String {
    s.lines()
        .map(str::trim)
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| s.lines().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("")
        .to_string()
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::NetworkTimeout(e.to_string());
        }
        if let Some(status) = e.status() {
            return Self::Http {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        Self::Network(e.to_string())
    }
}

impl From<serde_json::Error> for DownloadError {
    fn from(e: serde_json::Error) -> Self {
        Self::ParseError(format!("Invalid JSON: {}", e))
    }
}

impl From<chromiumoxide::error::CdpError> for DownloadError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        Self::Browser(e.to_string())
    }
}

/// Terminal failure category recorded on a failed result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// URL matched no platform; never retried
    Classification,
    /// Every strategy in the chain failed
    Extraction,
    /// Direct stream and resolver download both failed
    Fetch,
    Cancelled,
    /// Task panicked or was aborted
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classification => write!(f, "classification"),
            Self::Extraction => write!(f, "extraction"),
            Self::Fetch => write!(f, "fetch"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_timeout() {
        let err = DownloadError::from_stderr("ERROR: Read timed out.");
        assert!(matches!(err, DownloadError::NetworkTimeout(_)));
    }

    #[test]
    fn test_stderr_unsupported_url() {
        let err = DownloadError::from_stderr(
            "WARNING: something\nERROR: Unsupported URL: https://example.com/x",
        );
        match err {
            DownloadError::InvalidUrl(msg) => assert!(msg.starts_with("ERROR: Unsupported URL")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stderr_fallback_is_execution_error() {
        let err = DownloadError::from_stderr("boom");
        assert!(matches!(err, DownloadError::ExecutionError(ref m) if m == "boom"));
    }

    #[test]
    fn test_extraction_failed_joins_reasons() {
        let err = DownloadError::ExtractionFailed {
            reasons: vec!["resolver: no formats".into(), "scrape: HTTP 404".into()],
        };
        assert_eq!(
            err.to_string(),
            "All strategies failed: resolver: no formats; scrape: HTTP 404"
        );
    }
}
