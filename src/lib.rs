pub mod config;
pub mod downloader;
pub mod logging;

pub use config::PipelineConfig;
pub use downloader::{
    AcquisitionResult, BatchReport, DownloadError, FailureKind, Pipeline, PipelineBuilder,
    Quality, TaskStatus,
};
