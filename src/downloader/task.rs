// Single acquisition task: state machine and stage runner

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::errors::{DownloadError, FailureKind};
use super::extractors::extract_identifier;
use super::fetcher::Fetcher;
use super::models::{AcquisitionResult, StrategyKind, TaskStatus};
use super::orchestrator::StrategyRegistry;
use super::platforms::{classify, PlatformProfile};
use super::reconciler::Reconciler;
use super::traits::{ExtractionContext, ProgressEmitter};
use super::utils::split_format_marker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Classifying,
    Extracting,
    Fetching,
    Reconciling,
    Succeeded,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Allowed edges; every non-terminal stage may fail
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match (self, next) {
            (Pending, Classifying) => true,
            (Classifying, Extracting) => true,
            (Extracting, Fetching) => true,
            (Fetching, Reconciling) => true,
            (Reconciling, Succeeded) => true,
            (Pending | Classifying | Extracting | Fetching | Reconciling, Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Classifying => "classifying",
            Self::Extracting => "extracting",
            Self::Fetching => "fetching",
            Self::Reconciling => "reconciling",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Mutable record of one URL's progress, owned by the worker running it
#[derive(Debug)]
pub struct AcquisitionTask {
    pub id: usize,
    pub url: String,
    state: TaskState,
    profile: Option<&'static PlatformProfile>,
    strategy: Option<StrategyKind>,
    errors: Vec<String>,
    outputs: Vec<PathBuf>,
    started: Instant,
}

impl AcquisitionTask {
    pub fn new(id: usize, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            state: TaskState::Pending,
            profile: None,
            strategy: None,
            errors: Vec::new(),
            outputs: Vec::new(),
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Move to `next`, rejecting edges the state machine does not allow
    pub fn advance(&mut self, next: TaskState) -> Result<(), DownloadError> {
        if !self.state.can_transition_to(next) {
            return Err(DownloadError::Unknown(format!(
                "illegal task transition {} -> {}",
                self.state, next
            )));
        }
        debug!(from = %self.state, to = %next, "task state");
        self.state = next;
        Ok(())
    }

    /// Terminal failure; consumes the task
    pub fn fail(mut self, kind: FailureKind, reason: impl Into<String>) -> AcquisitionResult {
        let reason = reason.into();
        let _ = self.advance(TaskState::Failed);
        warn!(failure = %kind, "task failed: {}", reason);
        AcquisitionResult {
            url: self.url,
            platform: self.profile.map(|p| p.id),
            status: TaskStatus::Failed,
            output_files: Vec::new(),
            file_size: 0,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            error: Some(reason),
            failure: Some(kind),
            strategy: self.strategy,
            attempts: self.errors,
        }
    }

    fn succeed(mut self) -> AcquisitionResult {
        if let Err(e) = self.advance(TaskState::Succeeded) {
            return self.fail(FailureKind::Internal, e.to_string());
        }
        let file_size = self
            .outputs
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();
        AcquisitionResult {
            url: self.url,
            platform: self.profile.map(|p| p.id),
            status: TaskStatus::Succeeded,
            output_files: self.outputs,
            file_size,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            error: None,
            failure: None,
            strategy: self.strategy,
            attempts: self.errors,
        }
    }
}

fn failure_kind(err: &DownloadError, stage: FailureKind) -> FailureKind {
    if err.is_cancelled() {
        FailureKind::Cancelled
    } else {
        stage
    }
}

fn non_empty(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// Shared collaborators for every task in a batch
pub struct TaskRunner {
    registry: StrategyRegistry,
    fetcher: Arc<Fetcher>,
    reconciler: Arc<Reconciler>,
    download_dir: PathBuf,
}

impl TaskRunner {
    pub fn new(
        registry: StrategyRegistry,
        fetcher: Arc<Fetcher>,
        reconciler: Arc<Reconciler>,
        download_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            fetcher,
            reconciler,
            download_dir,
        }
    }

    /// Drive one URL to a terminal state inside its own span
    pub async fn run(
        &self,
        id: usize,
        url: &str,
        cancel: &CancellationToken,
        progress: ProgressEmitter,
    ) -> AcquisitionResult {
        let platform = classify(url).map(|p| p.id.as_str()).unwrap_or("unknown");
        let span = info_span!("task", id, platform, url);
        self.run_stages(AcquisitionTask::new(id, url), cancel, progress)
            .instrument(span)
            .await
    }

    async fn run_stages(
        &self,
        mut task: AcquisitionTask,
        cancel: &CancellationToken,
        progress: ProgressEmitter,
    ) -> AcquisitionResult {
        macro_rules! checkpoint {
            ($task:ident, $next:expr) => {
                if cancel.is_cancelled() {
                    return $task.fail(FailureKind::Cancelled, "cancelled");
                }
                if let Err(e) = $task.advance($next) {
                    return $task.fail(FailureKind::Internal, e.to_string());
                }
            };
        }

        checkpoint!(task, TaskState::Classifying);
        let Some(profile) = classify(&task.url) else {
            return task.fail(FailureKind::Classification, "unsupported site");
        };
        task.profile = Some(profile);

        checkpoint!(task, TaskState::Extracting);
        let ctx = ExtractionContext {
            url: task.url.clone(),
            profile,
            identifier: extract_identifier(profile, &task.url),
            cancel: cancel.clone(),
        };
        let chain = self.registry.chain_for(profile);
        let outcome = match chain.extract(&ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let DownloadError::ExtractionFailed { reasons } = &e {
                    task.errors.extend(reasons.iter().cloned());
                }
                let kind = failure_kind(&e, FailureKind::Extraction);
                return task.fail(kind, e.to_string());
            }
        };
        task.errors.extend(outcome.attempts);
        task.strategy = Some(outcome.media.strategy);
        progress.emit(0.0, format!("extracted via {}", outcome.media.strategy));

        checkpoint!(task, TaskState::Fetching);
        let fetched = match self
            .fetcher
            .fetch(&outcome.media, &ctx, &self.download_dir, &progress)
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => {
                let kind = failure_kind(&e, FailureKind::Fetch);
                return task.fail(kind, e.to_string());
            }
        };

        info!(
            stem = %fetched.stem,
            files = fetched.files.len(),
            via_resolver = fetched.via_resolver,
            "fetch complete"
        );

        // Reconciliation never fails the task, so it runs even when
        // cancellation arrives after the fetch
        if let Err(e) = task.advance(TaskState::Reconciling) {
            return task.fail(FailureKind::Internal, e.to_string());
        }
        let files = self
            .reconciler
            .reconcile(&self.download_dir, fetched.files, cancel)
            .await;
        drop(fetched.claim);

        let files: Vec<PathBuf> = files.into_iter().filter(|p| non_empty(p)).collect();
        if files.is_empty() {
            return task.fail(FailureKind::Fetch, "no output file after reconciliation");
        }
        let leftover = files.iter().any(|p| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .and_then(split_format_marker)
                .is_some()
        });
        if leftover {
            warn!("kept unmerged stream parts");
        }

        task.outputs = files;
        progress.emit(100.0, "done");
        let result = task.succeed();
        info!(
            files = result.output_files.len(),
            bytes = result.file_size,
            elapsed_secs = result.elapsed_secs,
            "task succeeded"
        );
        result
    }
}
