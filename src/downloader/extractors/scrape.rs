// Raw page scrape strategy
//
// Last resort: fetch the page over HTTP and scan the markup for anything
// that looks like a media URL. Candidate order:
// 1. <video src>, then <source src>
// 2. URL patterns inside inline <script> text
// 3. the platform's page-data probe endpoint, when it has one
// 4. URL patterns in the raw page text

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, info};

use crate::downloader::errors::DownloadError;
use crate::downloader::models::{Delivery, ExtractedMedia, StrategyKind};
use crate::downloader::platforms::PlatformProfile;
use crate::downloader::traits::{ExtractionContext, ExtractionStrategy};
use crate::downloader::utils::{infer_extension, sanitize_filename};

lazy_static! {
    static ref VIDEO_SRC: Selector = Selector::parse("video[src]").unwrap();
    static ref SOURCE_SRC: Selector = Selector::parse("source[src]").unwrap();
    static ref SCRIPT: Selector = Selector::parse("script").unwrap();
    static ref TITLE: Selector = Selector::parse("title").unwrap();

    static ref SCRIPT_PATTERNS: Vec<Regex> = [
        r#"["']([^"']*\.mp4[^"']*)["']"#,
        r#"["']([^"']*\.flv[^"']*)["']"#,
        r#"["']([^"']*\.m3u8[^"']*)["']"#,
        r#"videoUrl["']?\s*[:=]\s*["']?(https?://[^"'>\s]+)"#,
        r#"src\s*:\s*["']([^"']+)["']"#,
        r#"url\s*:\s*["']([^"']+)["']"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();

    static ref TEXT_PATTERNS: Vec<Regex> = [
        r#"https?://[^\s"'<>]+\.mp4[^\s"'<>]*"#,
        r#"https?://[^\s"'<>]+\.flv[^\s"'<>]*"#,
        r#"https?://[^\s"'<>]+\.m3u8[^\s"'<>]*"#,
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();

    static ref PAGE_DATA: Regex = Regex::new(r"window\.PAGE_DATA\s*=\s*(\{.*?\});").unwrap();
}

const MEDIA_EXTENSIONS: &[&str] = &[
    ".mp4", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".m3u8", ".ts",
];
const MEDIA_KEYWORDS: &[&str] = &["video", "mp4", "stream", "media", "play", "watch", "v="];

/// Validity heuristic for scraped candidates.
///
/// Permissive mode also accepts any long http(s) URL; strict mode requires
/// a media extension on the path.
pub fn is_plausible_media_url(candidate: &str, strict: bool) -> bool {
    if candidate.len() < 10 {
        return false;
    }
    let lower = candidate.to_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) {
        return false;
    }

    if strict {
        let path = url::Url::parse(candidate)
            .map(|u| u.path().to_lowercase())
            .unwrap_or_default();
        return MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext));
    }

    MEDIA_EXTENSIONS.iter().any(|ext| lower.contains(ext))
        || MEDIA_KEYWORDS.iter().any(|kw| lower.contains(kw))
        || candidate.len() > 20
}

/// Everything the scraper learned from one page, owned so no DOM crosses an await
#[derive(Debug, Default)]
pub struct PageScan {
    pub title: Option<String>,
    /// Candidates from tags and scripts, in priority order
    pub primary: Vec<String>,
    /// Candidates from the raw page text
    pub text: Vec<String>,
    /// (secondId, lemmaId) from an embedded PAGE_DATA object
    pub page_data_ids: Option<(String, String)>,
}

fn absolutize(base: Option<&url::Url>, raw: &str) -> Option<String> {
    let raw = raw.trim().replace("\\/", "/");
    if raw.is_empty() || raw.starts_with("blob:") || raw.starts_with("data:") {
        return None;
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw);
    }
    base.and_then(|b| b.join(&raw).ok()).map(|u| u.to_string())
}

fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Scan page markup for media candidates
pub fn scan_page(page_url: &str, body: &str) -> PageScan {
    let base = url::Url::parse(page_url).ok();
    let document = Html::parse_document(body);
    let mut scan = PageScan::default();

    let mut push = |list: &mut Vec<String>, raw: &str| {
        if let Some(u) = absolutize(base.as_ref(), raw) {
            if !list.contains(&u) {
                list.push(u);
            }
        }
    };

    for el in document.select(&VIDEO_SRC).chain(document.select(&SOURCE_SRC)) {
        if let Some(src) = el.value().attr("src") {
            push(&mut scan.primary, src);
        }
    }

    for script in document.select(&SCRIPT) {
        let text: String = script.text().collect();
        if text.trim().is_empty() {
            continue;
        }
        for re in SCRIPT_PATTERNS.iter() {
            for caps in re.captures_iter(&text) {
                let m = &caps[1];
                let lower = m.to_lowercase();
                if [".mp4", ".flv", ".m3u8"].iter().any(|e| lower.contains(e))
                    || lower.starts_with("http")
                {
                    push(&mut scan.primary, m);
                }
            }
        }
    }

    for re in TEXT_PATTERNS.iter() {
        for m in re.find_iter(body) {
            push(&mut scan.text, m.as_str());
        }
    }

    if let Some(caps) = PAGE_DATA.captures(body) {
        if let Ok(data) = serde_json::from_str::<serde_json::Value>(&caps[1]) {
            if let (Some(second), Some(lemma)) = (json_id(&data["secondId"]), json_id(&data["lemmaId"])) {
                scan.page_data_ids = Some((second, lemma));
            }
        }
    }

    scan.title = document
        .select(&TITLE)
        .next()
        .map(|t| t.text().collect::<String>())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    scan
}

pub struct PageScrapeStrategy {
    client: reqwest::Client,
    strict: bool,
    timeout: Duration,
}

impl PageScrapeStrategy {
    pub fn new(client: reqwest::Client, strict: bool, timeout: Duration) -> Self {
        Self {
            client,
            strict,
            timeout,
        }
    }

    async fn get_text(&self, url: &str, referer: &str) -> Result<String, DownloadError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::REFERER, referer)
            .timeout(self.timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }

    /// Ask the platform's page-data endpoint for a direct URL
    async fn probe_page_data(
        &self,
        profile: &PlatformProfile,
        ids: &(String, String),
    ) -> Option<String> {
        let template = profile.page_data_api?;
        let api_url = template
            .replace("{secondId}", &ids.0)
            .replace("{lemmaId}", &ids.1);
        debug!(%api_url, "page-data probe");

        let body = self.get_text(&api_url, profile.referer).await.ok()?;
        let json: serde_json::Value = serde_json::from_str(&body).ok()?;
        json["data"]["videoUrl"].as_str().map(|s| s.to_string())
    }
}

#[async_trait]
impl ExtractionStrategy for PageScrapeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Scrape
    }

    async fn attempt(&self, ctx: &ExtractionContext) -> Result<ExtractedMedia, DownloadError> {
        let profile = ctx.profile;
        let body = tokio::select! {
            body = self.get_text(&ctx.url, profile.referer) => body?,
            _ = ctx.cancel.cancelled() => return Err(DownloadError::Cancelled),
        };

        if let Some(marker) = profile.error_markers.iter().find(|m| body.contains(*m)) {
            return Err(DownloadError::NoMedia(format!(
                "page reports missing video ({})",
                marker
            )));
        }

        let scan = scan_page(&ctx.url, &body);
        let mut candidates = scan.primary;
        if let Some(ids) = &scan.page_data_ids {
            if let Some(found) = self.probe_page_data(profile, ids).await {
                candidates.push(found);
            }
        }
        candidates.extend(scan.text);
        debug!(count = candidates.len(), "scrape candidates");

        let media_url = candidates
            .into_iter()
            .find(|c| is_plausible_media_url(c, self.strict))
            .ok_or_else(|| DownloadError::NoMedia("no media URL in page".to_string()))?;
        info!(%media_url, "scrape found media");

        let extension = infer_extension(&media_url);
        let delivery = if extension == "m3u8" {
            Delivery::Manifest
        } else {
            Delivery::Progressive
        };
        let title = scan
            .title
            .map(|t| sanitize_filename(&t))
            .unwrap_or_else(|| ctx.fallback_title());

        Ok(ExtractedMedia {
            media_url,
            title,
            extension,
            delivery,
            strategy: StrategyKind::Scrape,
            referer: Some(ctx.url.clone()),
        })
    }
}
