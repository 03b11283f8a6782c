// Batch orchestrator
//
// One spawned task per URL, bounded by a semaphore worker pool, with a short
// stagger between submissions. Results come back in completion order; a task
// that panics or is aborted still yields a Failed result for its URL.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::errors::FailureKind;
use super::models::{AcquisitionResult, DownloadProgress};
use super::platforms::{classify, PlatformId};
use super::report::BatchReport;
use super::task::TaskRunner;
use super::traits::ProgressEmitter;

#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Worker pool size
    pub max_concurrent: usize,
    /// Delay between task submissions
    pub stagger: Duration,
    /// Where to persist the report (directory or file); `None` disables saving
    pub report_target: Option<PathBuf>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            stagger: Duration::from_millis(500),
            report_target: None,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Submission delay before a URL, given the platform of the one before it
fn stagger_for(base: Duration, previous: Option<PlatformId>, current: Option<PlatformId>) -> Duration {
    match (previous, current) {
        (Some(prev), Some(cur)) if prev == cur => {
            let hint = super::platforms::profile(cur).rate_limit;
            base.max(hint)
        }
        _ => base,
    }
}

pub struct BatchOrchestrator {
    runner: Arc<TaskRunner>,
    settings: BatchSettings,
    cancel: CancellationToken,
    progress: Option<UnboundedSender<DownloadProgress>>,
}

impl BatchOrchestrator {
    pub fn new(
        runner: Arc<TaskRunner>,
        settings: BatchSettings,
        cancel: CancellationToken,
        progress: Option<UnboundedSender<DownloadProgress>>,
    ) -> Self {
        Self {
            runner,
            settings,
            cancel,
            progress,
        }
    }

    /// Run one URL to completion, isolating panics
    pub async fn run_one(&self, url: &str) -> AcquisitionResult {
        run_isolated(
            self.runner.clone(),
            0,
            url.to_string(),
            self.cancel.clone(),
            ProgressEmitter::new(url, self.progress.clone()),
        )
        .await
    }

    /// Run every URL and aggregate the results
    pub async fn run(&self, urls: Vec<String>) -> BatchReport {
        let started_at = OffsetDateTime::now_utc();
        let total = urls.len();
        info!(
            total,
            max_concurrent = self.settings.max_concurrent,
            "starting batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent.max(1)));
        let mut tasks = JoinSet::new();
        let mut previous: Option<PlatformId> = None;

        for (idx, url) in urls.iter().enumerate() {
            let current = classify(url).map(|p| p.id);
            if idx > 0 {
                let delay = stagger_for(self.settings.stagger, previous, current);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
            previous = current;

            let runner = self.runner.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let progress = ProgressEmitter::new(url.as_str(), self.progress.clone());
            let url = url.clone();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            idx,
                            AcquisitionResult::failed(
                                url,
                                current,
                                FailureKind::Internal,
                                "worker pool closed",
                                Duration::ZERO,
                            ),
                        )
                    }
                };
                let result = run_isolated(runner, idx, url, cancel, progress).await;
                (idx, result)
            });
        }

        let mut results = Vec::with_capacity(total);
        let mut finished = vec![false; total];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => {
                    finished[idx] = true;
                    results.push(result);
                }
                Err(e) => error!("batch task aborted: {}", e),
            }
        }

        // Tasks lost to an abort still get a result
        for (idx, url) in urls.iter().enumerate() {
            if !finished[idx] {
                results.push(AcquisitionResult::failed(
                    url.as_str(),
                    classify(url).map(|p| p.id),
                    FailureKind::Internal,
                    "task aborted",
                    Duration::ZERO,
                ));
            }
        }

        let report = BatchReport::from_results(results, started_at, OffsetDateTime::now_utc());
        report.log_summary();

        if let Some(target) = &self.settings.report_target {
            if let Err(e) = report.save(target) {
                warn!("could not save report: {}", e);
            }
        }
        report
    }
}

/// Run a task, turning a panic into a Failed result
async fn run_isolated(
    runner: Arc<TaskRunner>,
    idx: usize,
    url: String,
    cancel: CancellationToken,
    progress: ProgressEmitter,
) -> AcquisitionResult {
    let started = Instant::now();
    let outcome = AssertUnwindSafe(runner.run(idx, &url, &cancel, progress))
        .catch_unwind()
        .await;
    match outcome {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(%url, "task panicked: {}", message);
            AcquisitionResult::failed(
                url.as_str(),
                classify(&url).map(|p| p.id),
                FailureKind::Internal,
                format!("task panicked: {}", message),
                started.elapsed(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stagger_raised_for_same_platform() {
        let base = Duration::from_millis(100);
        let bili = Some(PlatformId::Bilibili);
        let hint = crate::downloader::platforms::profile(PlatformId::Bilibili).rate_limit;

        assert_eq!(stagger_for(base, bili, bili), base.max(hint));
        assert_eq!(stagger_for(base, bili, Some(PlatformId::Sohu)), base);
        assert_eq!(stagger_for(base, None, bili), base);
        assert_eq!(stagger_for(base, None, None), base);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
