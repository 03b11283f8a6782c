// Public entry point: wires the strategies, fetcher and reconciler together

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::batch::{BatchOrchestrator, BatchSettings};
use super::errors::DownloadError;
use super::extractors::{
    BrowserOptions, BrowserStrategy, ExtractorConfig, PageScrapeStrategy, ResolverStrategy,
    ResolverTool, YtDlp,
};
use super::fetcher::{FetchSettings, Fetcher};
use super::media_tool::{FfmpegToolkit, MediaToolkit};
use super::models::{AcquisitionResult, DownloadProgress};
use super::orchestrator::StrategyRegistry;
use super::reconciler::Reconciler;
use super::report::BatchReport;
use super::task::TaskRunner;
use super::traits::ExtractionStrategy;
use crate::config::PipelineConfig;

pub struct Pipeline {
    orchestrator: BatchOrchestrator,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Pipeline backed by yt-dlp, headless Chromium, HTTP scraping and ffmpeg
    pub fn new(config: PipelineConfig) -> Result<Self, DownloadError> {
        PipelineBuilder::new(config).build()
    }

    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Acquire every URL; results are in completion order
    pub async fn run(&self, urls: Vec<String>) -> BatchReport {
        self.orchestrator.run(urls).await
    }

    pub async fn run_one(&self, url: &str) -> AcquisitionResult {
        self.orchestrator.run_one(url).await
    }

    /// Token that stops every task at its next checkpoint
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Assembles a Pipeline; any collaborator can be swapped before `build`
pub struct PipelineBuilder {
    config: PipelineConfig,
    resolver: Option<Arc<dyn ResolverTool>>,
    toolkit: Option<Arc<dyn MediaToolkit>>,
    strategies: Vec<Arc<dyn ExtractionStrategy>>,
    progress: Option<UnboundedSender<DownloadProgress>>,
    cancel: CancellationToken,
    client: Option<reqwest::Client>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            resolver: None,
            toolkit: None,
            strategies: Vec::new(),
            progress: None,
            cancel: CancellationToken::new(),
            client: None,
        }
    }

    pub fn resolver(mut self, resolver: Arc<dyn ResolverTool>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn toolkit(mut self, toolkit: Arc<dyn MediaToolkit>) -> Self {
        self.toolkit = Some(toolkit);
        self
    }

    /// Replace the built-in implementation for the strategy's kind
    pub fn strategy(mut self, strategy: Arc<dyn ExtractionStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn progress(mut self, sink: UnboundedSender<DownloadProgress>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    fn build_client(config: &PipelineConfig) -> Result<reqwest::Client, DownloadError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.http_timeout_secs));
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| DownloadError::InvalidUrl(format!("proxy '{}': {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|e| DownloadError::Network(format!("HTTP client: {}", e)))
    }

    fn default_resolver(config: &PipelineConfig) -> Arc<dyn ResolverTool> {
        let extractor = ExtractorConfig::default()
            .with_user_agent(config.user_agent.clone())
            .with_proxy(config.proxy.clone())
            .with_cookies_path(
                config
                    .cookies_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
            )
            .with_timeout(config.http_timeout_secs.min(u32::MAX as u64) as u32)
            .with_inspect_timeout(config.extract_timeout_secs)
            .with_download_timeout(config.fetch_timeout_secs);
        let mut tool = YtDlp::new(extractor);
        if let Some(path) = &config.ytdlp_path {
            tool = tool.with_path(path.clone());
        }
        if !tool.is_available() {
            warn!("yt-dlp not found; resolver extraction and download fallback will fail");
        }
        Arc::new(tool)
    }

    pub fn build(self) -> Result<Pipeline, DownloadError> {
        let config = self.config;
        let client = match self.client {
            Some(client) => client,
            None => Self::build_client(&config)?,
        };
        let resolver = self
            .resolver
            .unwrap_or_else(|| Self::default_resolver(&config));
        let toolkit = self.toolkit.unwrap_or_else(|| {
            Arc::new(
                FfmpegToolkit::new(config.ffmpeg_timeout_secs, config.probe_timeout_secs)
                    .with_paths(config.ffmpeg_path.clone(), config.ffprobe_path.clone()),
            )
        });

        let mut registry = StrategyRegistry::new();
        registry.register(Arc::new(ResolverStrategy::new(
            resolver.clone(),
            config.quality,
        )));
        registry.register(Arc::new(BrowserStrategy::new(BrowserOptions {
            chrome_path: config.chrome_path.clone(),
            user_agent: config.user_agent.clone(),
            element_wait: Duration::from_secs(config.browser_wait_secs),
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
        })));
        registry.register(Arc::new(PageScrapeStrategy::new(
            client.clone(),
            config.strict_media_urls,
            Duration::from_secs(config.http_timeout_secs),
        )));
        for strategy in self.strategies {
            registry.register(strategy);
        }

        let fetcher = Fetcher::new(
            client,
            resolver,
            FetchSettings {
                chunk_size: config.chunk_size.max(4096),
                stall_timeout: Duration::from_secs(config.http_timeout_secs),
                total_timeout: Duration::from_secs(config.fetch_timeout_secs),
                quality: config.quality,
            },
        );
        let runner = TaskRunner::new(
            registry,
            Arc::new(fetcher),
            Arc::new(Reconciler::new(toolkit)),
            config.download_dir.clone(),
        );

        let settings = BatchSettings {
            max_concurrent: config.max_concurrent,
            stagger: config.stagger(),
            report_target: config.report_target(),
        };
        let orchestrator =
            BatchOrchestrator::new(Arc::new(runner), settings, self.cancel.clone(), self.progress);

        Ok(Pipeline {
            orchestrator,
            cancel: self.cancel,
        })
    }
}
