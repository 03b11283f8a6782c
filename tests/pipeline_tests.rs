//! End-to-end pipeline runs with scripted strategies, resolver and toolkit.
//! No network access or external binaries are involved.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use vidgrab::downloader::extractors::{ResolveRequest, ResolvedInfo, ResolverTool};
use vidgrab::downloader::media_tool::{AudioStreamInfo, MediaToolkit};
use vidgrab::downloader::models::{Delivery, ExtractedMedia, StrategyKind};
use vidgrab::downloader::traits::{ExtractionContext, ExtractionStrategy, ProgressEmitter};
use vidgrab::downloader::utils::split_format_marker;
use vidgrab::{DownloadError, FailureKind, Pipeline, PipelineConfig, TaskStatus};

/// Succeeds with split delivery unless the URL asks otherwise
struct ScriptedStrategy {
    kind: StrategyKind,
    calls: AtomicUsize,
}

impl ScriptedStrategy {
    fn new(kind: StrategyKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ExtractionStrategy for ScriptedStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    async fn attempt(&self, ctx: &ExtractionContext) -> Result<ExtractedMedia, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if ctx.url.contains("panic") {
            panic!("scripted panic");
        }
        if ctx.url.contains("broken") {
            return Err(DownloadError::NoMedia(format!("{} found nothing", self.kind)));
        }
        let title = ctx.url.rsplit('/').next().unwrap_or("clip").to_string();
        Ok(ExtractedMedia {
            media_url: format!("https://cdn.example.com/{}.m4s", title),
            title,
            extension: "mp4".into(),
            delivery: Delivery::Split,
            strategy: self.kind,
            referer: None,
        })
    }
}

/// Download mode writes a video-only and an audio-only part
struct SplitResolver;

#[async_trait]
impl ResolverTool for SplitResolver {
    fn name(&self) -> &'static str {
        "split-resolver"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn inspect(
        &self,
        _req: ResolveRequest<'_>,
        _cancel: &CancellationToken,
    ) -> Result<ResolvedInfo, DownloadError> {
        Ok(ResolvedInfo::default())
    }

    async fn download(
        &self,
        _req: ResolveRequest<'_>,
        output_template: &Path,
        progress: &ProgressEmitter,
        _cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let template = output_template.to_string_lossy().into_owned();
        std::fs::write(template.replace(".%(ext)s", ".f137.mp4"), b"video-bytes")?;
        std::fs::write(template.replace(".%(ext)s", ".f140.m4a"), b"audio-bytes")?;
        progress.emit(100.0, "done");
        Ok(())
    }
}

/// Merges by concatenation. A silent toolkit reports no audio stream and
/// crashes halfway through every re-encode.
struct CopyToolkit {
    silent: bool,
}

#[async_trait]
impl MediaToolkit for CopyToolkit {
    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        _cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let mut bytes = std::fs::read(video)?;
        bytes.extend(std::fs::read(audio)?);
        std::fs::write(output, bytes)?;
        Ok(())
    }

    async fn probe_audio(
        &self,
        _path: &Path,
        _cancel: &CancellationToken,
    ) -> Result<Option<AudioStreamInfo>, DownloadError> {
        if self.silent {
            return Ok(None);
        }
        Ok(Some(AudioStreamInfo {
            codec: "aac".into(),
            sample_rate: Some(44100),
            channels: Some(2),
            bit_rate: Some(128_000),
        }))
    }

    async fn reencode_audio(
        &self,
        _input: &Path,
        output: &Path,
        _cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        if self.silent {
            std::fs::write(output, b"half")?;
            return Err(DownloadError::Reconciliation("encoder crashed".into()));
        }
        Err(DownloadError::Reconciliation("healthy audio is never re-encoded".into()))
    }
}

struct Harness {
    pipeline: Pipeline,
    resolver_strategy: Arc<ScriptedStrategy>,
    scrape_strategy: Arc<ScriptedStrategy>,
    dir: tempfile::TempDir,
}

fn harness(max_concurrent: usize) -> Harness {
    harness_with(max_concurrent, CopyToolkit { silent: false })
}

fn harness_with(max_concurrent: usize, toolkit: CopyToolkit) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        download_dir: dir.path().to_path_buf(),
        max_concurrent,
        stagger_ms: 0,
        save_report: false,
        ..Default::default()
    };
    let resolver_strategy = ScriptedStrategy::new(StrategyKind::Resolver);
    let scrape_strategy = ScriptedStrategy::new(StrategyKind::Scrape);
    let pipeline = Pipeline::builder(config)
        .resolver(Arc::new(SplitResolver))
        .toolkit(Arc::new(toolkit))
        .strategy(resolver_strategy.clone())
        .strategy(ScriptedStrategy::new(StrategyKind::Browser))
        .strategy(scrape_strategy.clone())
        .http_client(reqwest::Client::new())
        .build()
        .unwrap();
    Harness {
        pipeline,
        resolver_strategy,
        scrape_strategy,
        dir,
    }
}

fn has_format_marker(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(split_format_marker)
        .is_some()
}

#[tokio::test]
async fn test_supported_and_unsupported_url() {
    let h = harness(2);
    let report = h
        .pipeline
        .run(vec![
            "https://www.bilibili.com/video/BV1xx411c7mD".to_string(),
            "https://unsupported.example/x".to_string(),
        ])
        .await;

    assert_eq!(report.total, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert!((report.success_rate - 50.0).abs() < f64::EPSILON);

    let ok = report
        .results
        .iter()
        .find(|r| r.url.contains("bilibili"))
        .unwrap();
    assert_eq!(ok.status, TaskStatus::Succeeded);
    assert_eq!(ok.strategy, Some(StrategyKind::Resolver));

    let bad = report
        .results
        .iter()
        .find(|r| r.url.contains("unsupported"))
        .unwrap();
    assert_eq!(bad.status, TaskStatus::Failed);
    assert_eq!(bad.failure, Some(FailureKind::Classification));
    assert!(bad.platform.is_none());

    // Only the supported URL ever reached a strategy
    assert_eq!(h.resolver_strategy.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_success_leaves_one_merged_file() {
    let h = harness(1);
    let result = h
        .pipeline
        .run_one("https://www.bilibili.com/video/BV1xx411c7mD")
        .await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(result.output_files.len(), 1);
    let file = &result.output_files[0];
    assert_eq!(file, &h.dir.path().join("bilibili_BV1xx411c7mD.mp4"));
    assert!(!has_format_marker(file));
    assert_eq!(std::fs::read(file).unwrap(), b"video-bytesaudio-bytes");
    assert_eq!(result.file_size, 22);

    // Parts and claim markers are gone
    let leftovers: Vec<_> = std::fs::read_dir(h.dir.path())
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .filter(|p| p != file)
        .collect();
    assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
}

#[tokio::test]
async fn test_failed_audio_repair_still_succeeds() {
    let h = harness_with(1, CopyToolkit { silent: true });
    let result = h
        .pipeline
        .run_one("https://www.bilibili.com/video/BV1xx411c7mD")
        .await;

    assert!(result.is_success(), "{:?}", result.error);
    let file = h.dir.path().join("bilibili_BV1xx411c7mD.mp4");
    assert_eq!(result.output_files, vec![file.clone()]);
    assert_eq!(std::fs::read(&file).unwrap(), b"video-bytesaudio-bytes");

    // The half-written repair copy was discarded
    let names: Vec<String> = std::fs::read_dir(h.dir.path())
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["bilibili_BV1xx411c7mD.mp4"]);
}

#[tokio::test]
async fn test_extraction_failure_is_isolated() {
    let h = harness(3);
    let urls: Vec<String> = (0..5)
        .map(|i| {
            if i == 2 {
                "https://www.pinshan.com/video/broken".to_string()
            } else {
                format!("https://www.bilibili.com/video/BV{}", i)
            }
        })
        .collect();

    let report = h.pipeline.run(urls).await;
    assert_eq!(report.total, 5);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 1);

    let failed = report.results.iter().find(|r| !r.is_success()).unwrap();
    assert!(failed.url.ends_with("/broken"));
    assert_eq!(failed.failure, Some(FailureKind::Extraction));
    // Pinshan chains resolver then scrape; both reasons are kept
    assert_eq!(failed.attempts.len(), 2);
    assert!(failed.attempts[0].starts_with("resolver: "));
    assert!(failed.attempts[1].starts_with("scrape: "));
    assert_eq!(h.scrape_strategy.calls.load(Ordering::SeqCst), 1);

    for ok in report.results.iter().filter(|r| r.is_success()) {
        assert_eq!(ok.output_files.len(), 1);
        assert!(ok.output_files[0].exists());
        assert!(!has_format_marker(&ok.output_files[0]));
    }
}

#[tokio::test]
async fn test_same_title_gets_distinct_files() {
    let h = harness(3);
    let url = "https://www.bilibili.com/video/BV1same".to_string();
    let report = h.pipeline.run(vec![url.clone(), url.clone(), url]).await;

    assert_eq!(report.succeeded, 3);
    let mut files: Vec<_> = report
        .results
        .iter()
        .map(|r| r.output_files[0].clone())
        .collect();
    files.sort();
    files.dedup();
    assert_eq!(files.len(), 3);
}

#[tokio::test]
async fn test_panicking_task_does_not_sink_batch() {
    let h = harness(2);
    let report = h
        .pipeline
        .run(vec![
            "https://www.bilibili.com/video/panic".to_string(),
            "https://www.bilibili.com/video/BV9".to_string(),
        ])
        .await;

    assert_eq!(report.total, 2);
    let panicked = report.results.iter().find(|r| r.url.ends_with("panic")).unwrap();
    assert_eq!(panicked.failure, Some(FailureKind::Internal));
    assert!(panicked.error.as_deref().unwrap().contains("scripted panic"));
    assert!(report.results.iter().any(|r| r.url.ends_with("BV9") && r.is_success()));
}

#[tokio::test]
async fn test_empty_batch() {
    let h = harness(2);
    let report = h.pipeline.run(Vec::new()).await;
    assert_eq!(report.total, 0);
    assert_eq!(report.succeeded + report.failed, 0);
    assert_eq!(report.success_rate, 0.0);
}

#[tokio::test]
async fn test_cancelled_batch_fails_every_task() {
    let h = harness(2);
    h.pipeline.cancel_token().cancel();
    let report = h
        .pipeline
        .run(vec![
            "https://www.bilibili.com/video/BV1".to_string(),
            "https://tv.sohu.com/v/abc.html".to_string(),
        ])
        .await;

    assert_eq!(report.failed, 2);
    assert!(report
        .results
        .iter()
        .all(|r| r.failure == Some(FailureKind::Cancelled)));
    assert_eq!(h.resolver_strategy.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_report_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let reports = tempfile::tempdir().unwrap();
    let config = PipelineConfig {
        download_dir: dir.path().to_path_buf(),
        stagger_ms: 0,
        save_report: true,
        report_path: Some(reports.path().to_path_buf()),
        ..Default::default()
    };
    let pipeline = Pipeline::builder(config)
        .resolver(Arc::new(SplitResolver))
        .toolkit(Arc::new(CopyToolkit { silent: false }))
        .strategy(ScriptedStrategy::new(StrategyKind::Resolver))
        .http_client(reqwest::Client::new())
        .build()
        .unwrap();

    let report = pipeline
        .run(vec!["https://unsupported.example/x".to_string()])
        .await;

    let saved = reports.path().join(report.file_name());
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(saved).unwrap()).unwrap();
    assert_eq!(json["total"], 1);
    assert_eq!(json["failed"], 1);
    assert_eq!(json["results"][0]["failure"], "classification");
}
