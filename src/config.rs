//! Pipeline configuration
//!
//! Loaded from an optional TOML file, then overridden by `VIDGRAB_*`
//! environment variables. Every field has a default, so an empty file is valid.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::downloader::errors::DownloadError;
use crate::downloader::extractors::DEFAULT_USER_AGENT;
use crate::downloader::models::Quality;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Destination directory shared by every task
    pub download_dir: PathBuf,
    /// Worker pool size
    pub max_concurrent: usize,
    /// Delay between task submissions, in milliseconds
    pub stagger_ms: u64,
    pub quality: Quality,
    pub user_agent: String,
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    pub cookies_path: Option<PathBuf>,

    // --- timeouts (seconds) ---
    pub extract_timeout_secs: u64,
    pub browser_wait_secs: u64,
    pub navigation_timeout_secs: u64,
    pub http_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub ffmpeg_timeout_secs: u64,
    pub probe_timeout_secs: u64,

    /// Write buffer size for direct streams, in bytes
    pub chunk_size: usize,
    /// Require a media extension on scraped URLs
    pub strict_media_urls: bool,
    pub save_report: bool,
    /// Report file or directory; defaults to `download_dir`
    pub report_path: Option<PathBuf>,

    // --- tool overrides ---
    pub ytdlp_path: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
    pub chrome_path: Option<PathBuf>,
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .map(|d| d.join("vidgrab"))
        .unwrap_or_else(|| PathBuf::from("downloads"))
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent: 3,
            stagger_ms: 500,
            quality: Quality::High,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            proxy: None,
            cookies_path: None,
            extract_timeout_secs: 60,
            browser_wait_secs: 10,
            navigation_timeout_secs: 30,
            http_timeout_secs: 30,
            fetch_timeout_secs: 600,
            ffmpeg_timeout_secs: 300,
            probe_timeout_secs: 30,
            chunk_size: 1024 * 1024,
            strict_media_urls: false,
            save_report: true,
            report_path: None,
            ytdlp_path: None,
            ffmpeg_path: None,
            ffprobe_path: None,
            chrome_path: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, DownloadError> {
        toml::from_str(text).map_err(|e| DownloadError::ParseError(format!("config: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self, DownloadError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// File (if given) plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, DownloadError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.apply_env())
    }

    pub fn apply_env(mut self) -> Self {
        if let Some(v) = env_string("VIDGRAB_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse("VIDGRAB_MAX_CONCURRENT") {
            self.max_concurrent = v;
        }
        if let Some(v) = env_parse("VIDGRAB_STAGGER_MS") {
            self.stagger_ms = v;
        }
        if let Some(v) = env_parse("VIDGRAB_QUALITY") {
            self.quality = v;
        }
        if let Some(v) = env_string("VIDGRAB_USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = env_string("VIDGRAB_PROXY") {
            self.proxy = Some(v);
        }
        if let Some(v) = env_parse("VIDGRAB_FETCH_TIMEOUT") {
            self.fetch_timeout_secs = v;
        }
        if let Some(v) = env_parse("VIDGRAB_STRICT_MEDIA_URLS") {
            self.strict_media_urls = v;
        }
        if let Some(v) = env_string("VIDGRAB_YTDLP_PATH") {
            self.ytdlp_path = Some(v);
        }
        if let Some(v) = env_string("VIDGRAB_FFMPEG_PATH") {
            self.ffmpeg_path = Some(v);
        }
        if let Some(v) = env_string("VIDGRAB_FFPROBE_PATH") {
            self.ffprobe_path = Some(v);
        }
        if let Some(v) = env_string("VIDGRAB_CHROME_PATH") {
            self.chrome_path = Some(PathBuf::from(v));
        }
        self
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    /// Where the batch report goes, `None` when saving is off
    pub fn report_target(&self) -> Option<PathBuf> {
        if !self.save_report {
            return None;
        }
        Some(
            self.report_path
                .clone()
                .unwrap_or_else(|| self.download_dir.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            download_dir = "/tmp/media"
            max_concurrent = 8
            quality = "low"
            "#,
        )
        .unwrap();
        assert_eq!(config.download_dir, PathBuf::from("/tmp/media"));
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.quality, Quality::Low);
        assert_eq!(config.stagger_ms, 500);
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert!(config.save_report);
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = PipelineConfig::from_toml_str("max_concurrent = \"many\"").unwrap_err();
        assert!(matches!(err, DownloadError::ParseError(_)));
    }

    #[test]
    fn test_report_target() {
        let mut config = PipelineConfig {
            download_dir: PathBuf::from("/d"),
            ..Default::default()
        };
        assert_eq!(config.report_target(), Some(PathBuf::from("/d")));
        config.report_path = Some(PathBuf::from("/r/report.json"));
        assert_eq!(config.report_target(), Some(PathBuf::from("/r/report.json")));
        config.save_report = false;
        assert_eq!(config.report_target(), None);
    }
}
