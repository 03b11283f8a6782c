// Extraction strategy trait and per-task handles

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::errors::DownloadError;
use super::models::{DownloadProgress, ExtractedMedia, StrategyKind};
use super::platforms::PlatformProfile;

/// Everything a strategy needs to know about the task it serves
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    pub url: String,
    pub profile: &'static PlatformProfile,
    /// Identifier recovered from the URL, if any
    pub identifier: Option<String>,
    pub cancel: CancellationToken,
}

impl ExtractionContext {
    /// Title used when the page offers none
    pub fn fallback_title(&self) -> String {
        match &self.identifier {
            Some(id) => format!("{}_{}", self.profile.file_prefix, id),
            None => format!("{}_video", self.profile.file_prefix),
        }
    }
}

/// One way of turning a page URL into a fetchable media URL
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Name of the strategy (for logging)
    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    async fn attempt(&self, ctx: &ExtractionContext) -> Result<ExtractedMedia, DownloadError>;
}

/// Progress emitter handle, passed explicitly into each task
#[derive(Debug, Clone, Default)]
pub struct ProgressEmitter {
    url: String,
    sink: Option<UnboundedSender<DownloadProgress>>,
}

impl ProgressEmitter {
    pub fn new(url: impl Into<String>, sink: Option<UnboundedSender<DownloadProgress>>) -> Self {
        Self {
            url: url.into(),
            sink,
        }
    }

    pub fn emit(&self, percent: f32, status: impl Into<String>) {
        if let Some(sink) = &self.sink {
            let _ = sink.send(DownloadProgress {
                url: self.url.clone(),
                percent,
                status: status.into(),
            });
        }
    }
}
