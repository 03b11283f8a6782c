// Fetcher - materializes extracted media on disk
//
// Progressive URLs are streamed straight to `<stem>.<ext>.part` and renamed
// when complete. Anything else, and any direct failure, is handed to the
// resolver in download mode against the original page URL. Either way the
// task owns a reserved stem, so concurrent tasks never collide.

use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::errors::DownloadError;
use super::extractors::{ResolveRequest, ResolverTool};
use super::format_selector::FormatSelector;
use super::models::{Delivery, ExtractedMedia, Quality};
use super::traits::{ExtractionContext, ProgressEmitter};
use super::utils::{
    files_with_identity, partial_files, reserve_stem, sanitize_filename, StemClaim,
};

/// Files produced for one task
#[derive(Debug)]
pub struct FetchOutcome {
    /// Logical identity shared by every produced file
    pub stem: String,
    pub files: Vec<PathBuf>,
    pub via_resolver: bool,
    /// Held until reconciliation is over so no other task takes the stem
    pub claim: StemClaim,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub chunk_size: usize,
    /// Longest silence between two chunks
    pub stall_timeout: Duration,
    /// Upper bound for a whole direct transfer
    pub total_timeout: Duration,
    pub quality: Quality,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            stall_timeout: Duration::from_secs(30),
            total_timeout: Duration::from_secs(600),
            quality: Quality::High,
        }
    }
}

pub struct Fetcher {
    client: reqwest::Client,
    resolver: Arc<dyn ResolverTool>,
    settings: FetchSettings,
}

impl Fetcher {
    pub fn new(
        client: reqwest::Client,
        resolver: Arc<dyn ResolverTool>,
        settings: FetchSettings,
    ) -> Self {
        Self {
            client,
            resolver,
            settings,
        }
    }

    /// File stem base for a task: `<prefix>_<title>`
    fn base_name(media: &ExtractedMedia, ctx: &ExtractionContext) -> String {
        let prefix = ctx.profile.file_prefix;
        let title = sanitize_filename(&media.title);
        if title.starts_with(prefix) {
            title
        } else {
            sanitize_filename(&format!("{}_{}", prefix, title))
        }
    }

    pub async fn fetch(
        &self,
        media: &ExtractedMedia,
        ctx: &ExtractionContext,
        dir: &Path,
        progress: &ProgressEmitter,
    ) -> Result<FetchOutcome, DownloadError> {
        let claim = reserve_stem(dir, &Self::base_name(media, ctx))?;
        let stem = claim.stem().to_string();
        debug!(%stem, delivery = ?media.delivery, "fetch starting");

        let mut direct_error = None;
        if media.delivery == Delivery::Progressive {
            match self.stream_direct(media, dir, &stem, progress, &ctx.cancel).await {
                Ok(path) => {
                    info!(path = %path.display(), "direct stream complete");
                    return Ok(FetchOutcome {
                        stem,
                        files: vec![path],
                        via_resolver: false,
                        claim,
                    });
                }
                Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(e) => {
                    warn!("direct stream failed, falling back to resolver: {}", e);
                    direct_error = Some(e);
                }
            }
        }

        let files = match self.resolver_download(ctx, dir, &stem, progress).await {
            Ok(files) => files,
            Err(e) => {
                // Still under the claim, so everything with this stem is ours
                discard_stem_files(dir, &stem).await;
                return Err(match (e, direct_error) {
                    (DownloadError::Cancelled, _) => DownloadError::Cancelled,
                    (e, Some(direct)) => {
                        DownloadError::FetchFailed(format!("direct: {}; resolver: {}", direct, e))
                    }
                    (e, None) => DownloadError::FetchFailed(format!("resolver: {}", e)),
                });
            }
        };

        Ok(FetchOutcome {
            stem,
            files,
            via_resolver: true,
            claim,
        })
    }

    /// Stream `media_url` to `<dir>/<stem>.<ext>`; leaves nothing behind on failure
    async fn stream_direct(
        &self,
        media: &ExtractedMedia,
        dir: &Path,
        stem: &str,
        progress: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DownloadError> {
        let final_path = dir.join(format!("{}.{}", stem, media.extension));
        let part_path = dir.join(format!("{}.{}.part", stem, media.extension));

        let result = self.stream_to(media, &part_path, progress, cancel).await;
        match result {
            Ok(0) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                Err(DownloadError::FetchFailed("empty response body".to_string()))
            }
            Ok(_) => {
                tokio::fs::rename(&part_path, &final_path).await?;
                Ok(final_path)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part_path).await;
                Err(e)
            }
        }
    }

    async fn stream_to(
        &self,
        media: &ExtractedMedia,
        path: &Path,
        progress: &ProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let mut request = self.client.get(&media.media_url);
        if let Some(referer) = &media.referer {
            request = request.header(reqwest::header::REFERER, referer);
        }

        let response = tokio::select! {
            sent = timeout(self.settings.stall_timeout, request.send()) => match sent {
                Ok(resp) => resp?,
                Err(_) => return Err(DownloadError::NetworkTimeout("no response".to_string())),
            },
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Http {
                status: status.as_u16(),
                url: media.media_url.clone(),
            });
        }

        let total = response.content_length();
        let file = tokio::fs::File::create(path).await?;
        let mut writer = BufWriter::with_capacity(self.settings.chunk_size, file);
        let mut stream = response.bytes_stream();
        let deadline = Instant::now() + self.settings.total_timeout;
        let mut written: u64 = 0;
        let mut last_percent: i32 = -1;

        loop {
            let next = tokio::select! {
                next = timeout(self.settings.stall_timeout, stream.next()) => next,
                _ = sleep_until(deadline) => {
                    return Err(DownloadError::NetworkTimeout("transfer exceeded time limit".to_string()))
                }
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            };

            let chunk = match next {
                Err(_) => return Err(DownloadError::NetworkTimeout("transfer stalled".to_string())),
                Ok(None) => break,
                Ok(Some(chunk)) => chunk?,
            };

            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if let Some(total) = total.filter(|t| *t > 0) {
                let percent = (written.saturating_mul(100) / total).min(100) as i32;
                if percent > last_percent {
                    last_percent = percent;
                    progress.emit(percent as f32, format!("{}/{} bytes", written, total));
                }
            }
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;

        if let Some(total) = total {
            if written < total {
                return Err(DownloadError::FetchFailed(format!(
                    "truncated transfer: {} of {} bytes",
                    written, total
                )));
            }
        }
        Ok(written)
    }

    /// Resolver download mode against the page URL; returns the produced files
    async fn resolver_download(
        &self,
        ctx: &ExtractionContext,
        dir: &Path,
        stem: &str,
        progress: &ProgressEmitter,
    ) -> Result<Vec<PathBuf>, DownloadError> {
        let template = dir.join(format!("{}.%(ext)s", stem));
        let format_spec = FormatSelector::format_spec(ctx.profile, self.settings.quality);
        let req = ResolveRequest {
            url: &ctx.url,
            referer: ctx.profile.referer,
            format_spec: &format_spec,
        };

        self.resolver
            .download(req, &template, progress, &ctx.cancel)
            .await?;

        let files: Vec<PathBuf> = files_with_identity(dir, stem)
            .into_iter()
            .filter(|p| std::fs::metadata(p).map(|m| m.len() > 0).unwrap_or(false))
            .collect();

        if files.is_empty() {
            return Err(DownloadError::FetchFailed(format!(
                "{} finished but produced no files for '{}'",
                self.resolver.name(),
                stem
            )));
        }
        info!(count = files.len(), "resolver download complete");
        Ok(files)
    }
}

/// Remove whatever an interrupted resolver run left for `stem`
async fn discard_stem_files(dir: &Path, stem: &str) {
    let mut leftovers = files_with_identity(dir, stem);
    leftovers.extend(partial_files(dir, stem));
    for path in leftovers {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed partial download"),
            Err(e) => warn!(path = %path.display(), "could not remove partial download: {}", e),
        }
    }
}
