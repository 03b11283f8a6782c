// Browser automation strategy (headless Chromium over CDP)
//
// Every attempt owns one BrowserSession. The session is closed on every
// exit path; if the attempt unwinds instead, Drop aborts the CDP handler
// and chromiumoxide kills the child process.

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::downloader::errors::DownloadError;
use crate::downloader::models::{Delivery, ExtractedMedia, StrategyKind};
use crate::downloader::traits::{ExtractionContext, ExtractionStrategy};
use crate::downloader::utils::{infer_extension, sanitize_filename};

lazy_static! {
    static ref PAGE_MP4_RE: Regex = Regex::new(r#"https?://[^\s"'<>]+\.mp4[^\s"'<>]*"#).unwrap();
}

const VIDEO_SOURCES_JS: &str = r#"Array.from(document.querySelectorAll('video, video source'))
    .map(e => e.currentSrc || e.src || '')
    .filter(s => s.startsWith('http'))"#;

const IFRAME_SOURCES_JS: &str = r#"Array.from(document.querySelectorAll('iframe'))
    .map(f => f.src || '')
    .filter(s => s.startsWith('http'))"#;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Launch options for the headless browser
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub chrome_path: Option<PathBuf>,
    pub user_agent: String,
    /// How long to wait for a media element on a page
    pub element_wait: Duration,
    /// Navigation limit per page
    pub navigation_timeout: Duration,
}

/// Owned browser + CDP event loop
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    pub async fn launch(opts: &BrowserOptions) -> Result<Self, DownloadError> {
        let mut builder = BrowserConfig::builder()
            .new_headless_mode()
            .no_sandbox()
            .args(vec![
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--mute-audio",
            ])
            .arg(format!("--user-agent={}", opts.user_agent))
            .request_timeout(opts.navigation_timeout);
        if let Some(path) = &opts.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(DownloadError::Browser)?;

        let (browser, mut handler) = Browser::launch(config).await?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });
        debug!("headless browser launched");

        Ok(Self { browser, handler })
    }

    /// Open `url` in a new page, bounded by `limit`
    pub async fn open(&self, url: &str, limit: Duration) -> Result<Page, DownloadError> {
        match timeout(limit, self.browser.new_page(url)).await {
            Ok(page) => Ok(page?),
            Err(_) => Err(DownloadError::NetworkTimeout(format!(
                "navigation to {} exceeded {}s",
                url,
                limit.as_secs()
            ))),
        }
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("browser close: {}", e);
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

async fn eval_strings(page: &Page, script: &str) -> Vec<String> {
    match page.evaluate(script).await {
        Ok(result) => result.into_value::<Vec<String>>().unwrap_or_default(),
        Err(e) => {
            debug!("evaluate failed: {}", e);
            Vec::new()
        }
    }
}

/// Poll for a media element until `wait` elapses, then scan the page source
async fn find_media_on_page(page: &Page, wait: Duration) -> Option<String> {
    let deadline = Instant::now() + wait;
    loop {
        if let Some(src) = eval_strings(page, VIDEO_SOURCES_JS).await.into_iter().next() {
            debug!(%src, "video element found");
            return Some(src);
        }
        if Instant::now() + POLL_INTERVAL > deadline {
            break;
        }
        sleep(POLL_INTERVAL).await;
    }

    let content = page.content().await.ok()?;
    PAGE_MP4_RE.find(&content).map(|m| m.as_str().to_string())
}

fn host_allowed(src: &str, embed_hosts: &[&str]) -> bool {
    if embed_hosts.is_empty() {
        return true;
    }
    let Some(host) = url::Url::parse(src).ok().and_then(|u| u.host_str().map(str::to_string)) else {
        return false;
    };
    embed_hosts
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{}", h)))
}

pub struct BrowserStrategy {
    opts: BrowserOptions,
}

impl BrowserStrategy {
    pub fn new(opts: BrowserOptions) -> Self {
        Self { opts }
    }

    async fn search(
        &self,
        session: &BrowserSession,
        ctx: &ExtractionContext,
    ) -> Result<(String, Option<String>), DownloadError> {
        let page = session.open(&ctx.url, self.opts.navigation_timeout).await?;
        let title = page.get_title().await.ok().flatten();

        if let Some(src) = find_media_on_page(&page, self.opts.element_wait).await {
            return Ok((src, title));
        }

        let frames: Vec<String> = eval_strings(&page, IFRAME_SOURCES_JS)
            .await
            .into_iter()
            .filter(|src| host_allowed(src, ctx.profile.embed_hosts))
            .collect();
        debug!(count = frames.len(), "descending into embedded frames");

        for frame_src in frames {
            if ctx.cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let frame = match session.open(&frame_src, self.opts.navigation_timeout).await {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(%frame_src, "frame open failed: {}", e);
                    continue;
                }
            };
            let found = find_media_on_page(&frame, self.opts.element_wait).await;
            let _ = frame.close().await;
            if let Some(src) = found {
                return Ok((src, title));
            }
        }

        Err(DownloadError::NoMedia(format!(
            "no media element within {}s",
            self.opts.element_wait.as_secs()
        )))
    }
}

#[async_trait]
impl ExtractionStrategy for BrowserStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Browser
    }

    async fn attempt(&self, ctx: &ExtractionContext) -> Result<ExtractedMedia, DownloadError> {
        let session = BrowserSession::launch(&self.opts).await?;

        let outcome = tokio::select! {
            found = self.search(&session, ctx) => found,
            _ = ctx.cancel.cancelled() => Err(DownloadError::Cancelled),
        };
        session.close().await;

        let (media_url, title) = outcome?;
        info!(%media_url, "browser found media");

        let extension = infer_extension(&media_url);
        let delivery = if extension == "m3u8" {
            Delivery::Manifest
        } else {
            Delivery::Progressive
        };
        let title = title
            .filter(|t| !t.trim().is_empty())
            .map(|t| sanitize_filename(&t))
            .unwrap_or_else(|| ctx.fallback_title());

        Ok(ExtractedMedia {
            media_url,
            title,
            extension,
            delivery,
            strategy: StrategyKind::Browser,
            referer: Some(ctx.url.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_allowed() {
        assert!(host_allowed("https://player.le.com/x", &["le.com"]));
        assert!(host_allowed("https://le.com/x", &["le.com"]));
        assert!(!host_allowed("https://ads.example.com/x", &["le.com"]));
        assert!(!host_allowed("https://fle.com/x", &["le.com"]));
        assert!(host_allowed("https://anything.example.com/", &[]));
    }

    #[test]
    fn test_page_mp4_pattern() {
        let html = r#"<script>var u = "https://cdn.example.com/a/b.mp4?t=1";</script>"#;
        let m = PAGE_MP4_RE.find(html).unwrap();
        assert_eq!(m.as_str(), "https://cdn.example.com/a/b.mp4?t=1");
    }
}
