// Downloader module - acquisition pipeline layers
//
// platforms -> orchestrator (strategy chain) -> fetcher -> reconciler,
// driven per URL by task and per batch by batch.

pub mod batch;
pub mod errors;
pub mod extractors;
pub mod fetcher;
pub mod format_selector;
pub mod media_tool;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod platforms;
pub mod reconciler;
pub mod report;
pub mod task;
pub mod tools;
pub mod traits;
pub mod utils;

pub use batch::{BatchOrchestrator, BatchSettings};
pub use errors::{DownloadError, FailureKind};
pub use fetcher::{FetchOutcome, FetchSettings, Fetcher};
pub use media_tool::{AudioStreamInfo, FfmpegToolkit, MediaToolkit};
pub use models::{
    AcquisitionResult, Delivery, DownloadProgress, ExtractedMedia, Quality, StrategyKind,
    TaskStatus,
};
pub use orchestrator::{StrategyChain, StrategyRegistry};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use platforms::{classify, PlatformId, PlatformProfile};
pub use reconciler::{MediaStreamPair, Reconciler};
pub use report::BatchReport;
pub use task::{AcquisitionTask, TaskRunner, TaskState};
pub use traits::{ExtractionContext, ExtractionStrategy, ProgressEmitter};
