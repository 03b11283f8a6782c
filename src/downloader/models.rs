// Common data models for the acquisition pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::errors::FailureKind;
use super::platforms::PlatformId;

/// Extraction strategy identifiers, in the order platforms usually chain them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// External media-URL resolver (yt-dlp)
    Resolver,
    /// Headless browser automation
    Browser,
    /// Raw page fetch + pattern scan
    Scrape,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resolver => "resolver",
            Self::Browser => "browser",
            Self::Scrape => "scrape",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the extracted media URL can be fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Single progressive HTTP(S) file, streamable directly
    Progressive,
    /// Segmented playlist (HLS/DASH); needs the resolver
    Manifest,
    /// Separate video and audio streams; needs the resolver
    Split,
}

/// Successful outcome of one extraction strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedMedia {
    pub media_url: String,
    pub title: String,
    /// Target extension without the dot
    pub extension: String,
    pub delivery: Delivery,
    pub strategy: StrategyKind,
    /// Referer to send when fetching `media_url`
    pub referer: Option<String>,
}

/// Quality preference mapped onto resolver format specs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    High,
    Medium,
    Low,
}

impl FromStr for Quality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" | "best" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" | "worst" => Ok(Self::Low),
            other => Err(format!("unknown quality '{}'", other)),
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Terminal task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
}

/// Immutable outcome of one task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionResult {
    pub url: String,
    pub platform: Option<PlatformId>,
    pub status: TaskStatus,
    pub output_files: Vec<PathBuf>,
    pub file_size: u64,
    pub elapsed_secs: f64,
    /// Final human-readable failure reason
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    /// Strategy that produced the media
    pub strategy: Option<StrategyKind>,
    /// Per-strategy failures seen along the way
    pub attempts: Vec<String>,
}

impl AcquisitionResult {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }

    /// Failed result with no task progress behind it
    pub fn failed(
        url: impl Into<String>,
        platform: Option<PlatformId>,
        kind: FailureKind,
        reason: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            platform,
            status: TaskStatus::Failed,
            output_files: Vec::new(),
            file_size: 0,
            elapsed_secs: elapsed.as_secs_f64(),
            error: Some(reason.into()),
            failure: Some(kind),
            strategy: None,
            attempts: Vec::new(),
        }
    }
}

/// Download progress information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub url: String,
    pub percent: f32,
    pub status: String,
}

/// Network configuration for resolver invocations
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// SOCKS5/HTTP proxy URL (e.g., "socks5://127.0.0.1:1080")
    pub proxy: Option<String>,

    /// Socket timeout in seconds
    pub timeout: Option<u32>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: Some(30),
        }
    }
}
