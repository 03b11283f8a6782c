// Resolver tool trait and common types

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::downloader::errors::DownloadError;
use crate::downloader::models::NetworkConfig;
use crate::downloader::traits::ProgressEmitter;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Configuration shared by resolver invocations
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub user_agent: String,
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    /// Path to cookies.txt file
    pub cookies_path: Option<String>,
    /// Socket timeout in seconds
    pub timeout_seconds: u32,
    /// Hard limit for an info dump
    pub inspect_timeout_secs: u64,
    /// Hard limit for a download-mode run
    pub download_timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            cookies_path: None,
            timeout_seconds: 30,
            inspect_timeout_secs: 60,
            download_timeout_secs: 600,
        }
    }
}

impl ExtractorConfig {
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cookies_path(mut self, path: Option<String>) -> Self {
        self.cookies_path = path;
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = ua.into();
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_inspect_timeout(mut self, seconds: u64) -> Self {
        self.inspect_timeout_secs = seconds;
        self
    }

    pub fn with_download_timeout(mut self, seconds: u64) -> Self {
        self.download_timeout_secs = seconds;
        self
    }

    pub fn network(&self) -> NetworkConfig {
        NetworkConfig {
            proxy: self.proxy.clone(),
            timeout: Some(self.timeout_seconds),
        }
    }
}

/// Extended format information from yt-dlp
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtendedFormat {
    /// Format ID (e.g., "137", "140")
    pub format_id: String,
    /// File extension (mp4, webm, m4a)
    pub ext: String,
    /// Direct URL of this format
    pub url: Option<String>,
    /// Transfer protocol (https, m3u8_native, http_dash_segments)
    pub protocol: Option<String>,
    /// Video width in pixels
    pub width: Option<u32>,
    /// Video height in pixels
    pub height: Option<u32>,
    /// Video codec (avc1, vp9, av01, none)
    pub vcodec: Option<String>,
    /// Audio codec (mp4a, opus, none)
    pub acodec: Option<String>,
    /// File size in bytes
    pub filesize: Option<u64>,
    /// Approximate file size (when exact is unknown)
    pub filesize_approx: Option<u64>,
    /// Total bitrate in kbps
    pub tbr: Option<f32>,
    /// Whether this is video-only (no audio)
    pub video_only: bool,
    /// Whether this is audio-only (no video)
    pub audio_only: bool,
}

impl ExtendedFormat {
    /// Get effective file size (exact or approximate)
    pub fn effective_size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }

    /// Check if format is H.264 (avc1)
    pub fn is_h264(&self) -> bool {
        self.vcodec
            .as_ref()
            .map_or(false, |v| v.starts_with("avc1"))
    }

    /// Both audio and video in one file
    pub fn is_muxed(&self) -> bool {
        let has = |c: &Option<String>| c.as_deref().map_or(false, |c| c != "none" && !c.is_empty());
        has(&self.vcodec) && has(&self.acodec)
    }

    /// Plain HTTP(S) transfer, streamable without the resolver
    pub fn is_progressive(&self) -> bool {
        matches!(self.protocol.as_deref(), Some("http") | Some("https") | None)
            && self
                .url
                .as_deref()
                .map_or(false, |u| !u.contains(".m3u8") && !u.contains(".mpd"))
    }
}

/// Info dump returned by the resolver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedInfo {
    pub id: String,
    pub title: String,
    pub webpage_url: String,
    /// Selected format URL, present when a single format was chosen
    pub url: Option<String>,
    pub ext: Option<String>,
    pub protocol: Option<String>,
    pub formats: Vec<ExtendedFormat>,
    /// Formats the resolver would merge (video + audio)
    pub requested_formats: Vec<ExtendedFormat>,
}

/// What to resolve and how
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub url: &'a str,
    pub referer: &'a str,
    /// yt-dlp format selector
    pub format_spec: &'a str,
}

/// External media-URL resolver
#[async_trait]
pub trait ResolverTool: Send + Sync {
    /// Name of the resolver (for logging)
    fn name(&self) -> &'static str;

    /// Check if the resolver binary is usable
    fn is_available(&self) -> bool;

    /// Dump media info without downloading
    async fn inspect(
        &self,
        req: ResolveRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ResolvedInfo, DownloadError>;

    /// Download into `output_template` (a path with a `%(ext)s` placeholder)
    async fn download(
        &self,
        req: ResolveRequest<'_>,
        output_template: &Path,
        progress: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError>;
}
