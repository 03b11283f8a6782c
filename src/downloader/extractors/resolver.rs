// Resolver strategy - uses the native `yt-dlp` binary
//
// Two modes:
// - inspect: `--dump-json` to learn title and a fetchable media URL
// - download: yt-dlp fetches into a fixed output template itself
//   (used by the fetcher when direct streaming is not possible)

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::diagnostics::analyze_error;
use super::traits::{
    ExtendedFormat, ExtractorConfig, ResolveRequest, ResolvedInfo, ResolverTool,
};
use crate::downloader::errors::DownloadError;
use crate::downloader::format_selector::FormatSelector;
use crate::downloader::models::{ExtractedMedia, Quality, StrategyKind};
use crate::downloader::tools::{ToolManager, ToolType};
use crate::downloader::traits::{ExtractionContext, ExtractionStrategy, ProgressEmitter};
use crate::downloader::utils::{
    get_proxy_args, get_timeout_args, run_lines_with_timeout, run_output_with_timeout,
    sanitize_filename,
};

/// yt-dlp binary wrapper
pub struct YtDlp {
    ytdlp_path: String,
    config: ExtractorConfig,
}

impl YtDlp {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            ytdlp_path: ToolManager::new().resolve(ToolType::YtDlp),
            config,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.ytdlp_path = path.into();
        self
    }

    /// Arguments shared by both modes
    fn common_args(&self, req: &ResolveRequest<'_>) -> Vec<String> {
        let network = self.config.network();
        let mut args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--retries".to_string(),
            "2".to_string(),
            "--user-agent".to_string(),
            self.config.user_agent.clone(),
        ];
        args.extend(get_timeout_args(&network));
        args.extend(get_proxy_args(&network));

        if !req.referer.is_empty() {
            args.push("--referer".to_string());
            args.push(req.referer.to_string());
        }

        if let Some(path) = &self.config.cookies_path {
            args.push("--cookies".to_string());
            args.push(path.clone());
        }

        if !req.format_spec.is_empty() {
            args.push("-f".to_string());
            args.push(req.format_spec.to_string());
        }
        args
    }

    /// Build command arguments for an info dump
    fn build_inspect_args(&self, req: &ResolveRequest<'_>) -> Vec<String> {
        let mut args = vec!["--dump-json".to_string()];
        args.extend(self.common_args(req));
        args.push(req.url.to_string());
        args
    }

    fn build_download_args(&self, req: &ResolveRequest<'_>, template: &Path) -> Vec<String> {
        let mut args = vec![
            "--newline".to_string(),
            "--no-part".to_string(),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
        ];
        args.extend(self.common_args(req));
        args.push(req.url.to_string());
        args
    }

    /// Parse JSON output of `--dump-json`
    fn parse_json(stdout: &[u8]) -> Result<ResolvedInfo, DownloadError> {
        let json_str = String::from_utf8_lossy(stdout);
        // One JSON document per line; take the first
        let first = json_str
            .lines()
            .find(|l| l.trim_start().starts_with('{'))
            .ok_or_else(|| DownloadError::ParseError("No JSON in resolver output".to_string()))?;
        let json: serde_json::Value = serde_json::from_str(first)?;

        let str_field = |key: &str| json[key].as_str().map(|s| s.to_string());

        Ok(ResolvedInfo {
            id: str_field("id").unwrap_or_default(),
            title: str_field("title").unwrap_or_default(),
            webpage_url: str_field("webpage_url").unwrap_or_default(),
            url: str_field("url"),
            ext: str_field("ext"),
            protocol: str_field("protocol"),
            formats: Self::parse_formats(&json["formats"]),
            requested_formats: Self::parse_formats(&json["requested_formats"]),
        })
    }

    fn parse_formats(value: &serde_json::Value) -> Vec<ExtendedFormat> {
        let Some(formats_array) = value.as_array() else {
            return Vec::new();
        };

        formats_array
            .iter()
            .map(|f| {
                let vcodec = f["vcodec"].as_str().map(|s| s.to_string());
                let acodec = f["acodec"].as_str().map(|s| s.to_string());

                let video_only = vcodec.as_ref().map_or(false, |v| v != "none")
                    && acodec.as_ref().map_or(true, |a| a == "none");
                let audio_only = acodec.as_ref().map_or(false, |a| a != "none")
                    && vcodec.as_ref().map_or(true, |v| v == "none");

                ExtendedFormat {
                    format_id: f["format_id"].as_str().unwrap_or("").to_string(),
                    ext: f["ext"].as_str().unwrap_or("").to_string(),
                    url: f["url"].as_str().map(|s| s.to_string()),
                    protocol: f["protocol"].as_str().map(|s| s.to_string()),
                    width: f["width"].as_u64().map(|w| w as u32),
                    height: f["height"].as_u64().map(|h| h as u32),
                    vcodec,
                    acodec,
                    filesize: f["filesize"].as_u64(),
                    filesize_approx: f["filesize_approx"].as_u64(),
                    tbr: f["tbr"].as_f64().map(|t| t as f32),
                    video_only,
                    audio_only,
                }
            })
            .collect()
    }

    fn failure_from_stderr(stderr: &str) -> DownloadError {
        let diag = analyze_error(stderr);
        warn!(
            reason = diag.reason.description(),
            retryable = diag.reason.is_retryable(),
            fallback = diag.reason.page_fallback_might_work(),
            patterns = ?diag.matched_patterns,
            "yt-dlp failed"
        );
        match DownloadError::from_stderr(stderr) {
            DownloadError::ExecutionError(_) => DownloadError::ExecutionError(diag.summary()),
            other => other,
        }
    }
}

#[async_trait]
impl ResolverTool for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn is_available(&self) -> bool {
        ToolManager::new().probe(&self.ytdlp_path, ToolType::YtDlp).is_some()
    }

    async fn inspect(
        &self,
        req: ResolveRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<ResolvedInfo, DownloadError> {
        let args = self.build_inspect_args(&req);
        debug!("{} {}", self.ytdlp_path, args.join(" "));

        let out = run_output_with_timeout(
            &self.ytdlp_path,
            args,
            self.config.inspect_timeout_secs,
            cancel,
        )
        .await?;

        if out.status.success() {
            Self::parse_json(&out.stdout)
        } else {
            Err(Self::failure_from_stderr(&String::from_utf8_lossy(&out.stderr)))
        }
    }

    async fn download(
        &self,
        req: ResolveRequest<'_>,
        output_template: &Path,
        progress: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let args = self.build_download_args(&req, output_template);
        info!(template = %output_template.display(), "yt-dlp download mode");

        let (status, stderr) = run_lines_with_timeout(
            &self.ytdlp_path,
            args,
            self.config.download_timeout_secs,
            cancel,
            |line| {
                if let Some((percent, status)) = parse_ytdlp_progress(line) {
                    progress.emit(percent, status);
                }
            },
        )
        .await?;

        if status.success() {
            Ok(())
        } else {
            Err(Self::failure_from_stderr(&stderr))
        }
    }
}

/// Parse a yt-dlp `--newline` progress line
pub fn parse_ytdlp_progress(line: &str) -> Option<(f32, String)> {
    // Example: [download]  12.5% of ~ 310.04MiB at  374.36KiB/s ETA 11:59 (frag 56/454)
    lazy_static! {
        static ref PROGRESS_RE: Regex = Regex::new(
            r"\[download\]\s+(\d+\.?\d*)%\s+of\s+~?\s*(\d+\.?\d*\s*\w+)(?:\s+at\s+(\S+))?(?:\s+ETA\s+(\S+))?"
        ).unwrap();
        static ref DEST_RE: Regex = Regex::new(r"\[download\]\s+Destination:\s+(.+)").unwrap();
        static ref MERGE_RE: Regex = Regex::new(r"\[Merger?\]\s+Merging").unwrap();
        static ref ALREADY_RE: Regex = Regex::new(r"has already been downloaded").unwrap();
    }

    if let Some(caps) = PROGRESS_RE.captures(line) {
        let percent: f32 = caps.get(1)?.as_str().parse().ok()?;
        let size = caps.get(2).map(|m| m.as_str()).unwrap_or("?");
        let status = match (caps.get(3), caps.get(4)) {
            (Some(speed), Some(eta)) => format!(
                "{:.1}% of {} @ {} ETA {}",
                percent,
                size,
                speed.as_str(),
                eta.as_str()
            ),
            (Some(speed), None) => format!("{:.1}% of {} @ {}", percent, size, speed.as_str()),
            _ => format!("{:.1}% of {}", percent, size),
        };
        return Some((percent, status));
    }

    if let Some(caps) = DEST_RE.captures(line) {
        let filename = caps.get(1).map(|m| m.as_str()).unwrap_or("file");
        let short_name: String = Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filename.to_string())
            .chars()
            .take(50)
            .collect();
        return Some((0.0, format!("Starting: {}", short_name)));
    }

    if MERGE_RE.is_match(line) {
        return Some((99.0, "Merging video and audio".to_string()));
    }

    if ALREADY_RE.is_match(line) {
        return Some((100.0, "File already downloaded".to_string()));
    }

    None
}

/// First strategy of every chain: ask the resolver for a media URL
pub struct ResolverStrategy {
    tool: Arc<dyn ResolverTool>,
    quality: Quality,
}

impl ResolverStrategy {
    pub fn new(tool: Arc<dyn ResolverTool>, quality: Quality) -> Self {
        Self { tool, quality }
    }
}

#[async_trait]
impl ExtractionStrategy for ResolverStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Resolver
    }

    async fn attempt(&self, ctx: &ExtractionContext) -> Result<ExtractedMedia, DownloadError> {
        let format_spec = FormatSelector::format_spec(ctx.profile, self.quality);
        let req = ResolveRequest {
            url: &ctx.url,
            referer: ctx.profile.referer,
            format_spec: &format_spec,
        };

        let info = self.tool.inspect(req, &ctx.cancel).await?;
        let selected = FormatSelector::select(&info).ok_or_else(|| {
            DownloadError::NoMedia(format!("{} reported no usable format", self.tool.name()))
        })?;

        let title = if info.title.trim().is_empty() {
            ctx.fallback_title()
        } else {
            sanitize_filename(&info.title)
        };

        Ok(ExtractedMedia {
            media_url: selected.url,
            title,
            extension: selected.ext,
            delivery: selected.delivery,
            strategy: StrategyKind::Resolver,
            referer: Some(ctx.profile.referer.to_string()),
        })
    }
}
