// Batch report: aggregation and persistence

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tracing::{info, warn};

use super::errors::DownloadError;
use super::models::AcquisitionResult;

/// Aggregate over one batch; results are in completion order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Percentage of succeeded tasks, 0 for an empty batch
    pub success_rate: f64,
    pub total_time_secs: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub results: Vec<AcquisitionResult>,
}

impl BatchReport {
    pub fn from_results(
        results: Vec<AcquisitionResult>,
        started_at: OffsetDateTime,
        finished_at: OffsetDateTime,
    ) -> Self {
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let failed = total - succeeded;
        let success_rate = if total == 0 {
            0.0
        } else {
            succeeded as f64 / total as f64 * 100.0
        };
        let total_time_secs = (finished_at - started_at).as_seconds_f64().max(0.0);

        Self {
            total,
            succeeded,
            failed,
            success_rate,
            total_time_secs,
            started_at,
            finished_at,
            results,
        }
    }

    /// Default file name: `download_report_<unix seconds>.json`
    pub fn file_name(&self) -> String {
        format!("download_report_{}.json", self.finished_at.unix_timestamp())
    }

    /// Write the report as pretty JSON.
    ///
    /// `target` may be a directory (the default file name is used inside it)
    /// or a full file path.
    pub fn save(&self, target: &Path) -> Result<PathBuf, DownloadError> {
        let path = if target.is_dir() {
            target.join(self.file_name())
        } else {
            target.to_path_buf()
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        info!(path = %path.display(), "report saved");
        Ok(path)
    }

    pub fn log_summary(&self) {
        info!(
            total = self.total,
            succeeded = self.succeeded,
            failed = self.failed,
            "batch finished: {:.1}% success in {:.1}s",
            self.success_rate,
            self.total_time_secs
        );
        for result in self.results.iter().filter(|r| !r.is_success()) {
            warn!(
                url = %result.url,
                "failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
