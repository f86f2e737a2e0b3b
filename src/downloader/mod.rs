pub mod http_pool;
pub mod manager;
pub mod pipeline;
pub mod ytdlp;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::api::Song;
use crate::config::DownloadConfig;
pub use manager::DownloadManager;
pub use pipeline::{JobContext, JobReporter, Pipeline};
pub use ytdlp::{SourceFetcher, YtDlpFetcher};

pub const STEP_WAITING: &str = "Waiting for a free slot";
pub const STEP_CANCELLED: &str = "Cancelled";
pub const STEP_COMPLETED: &str = "Completed";
pub const STEP_FAILED: &str = "Failed";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadStatus {
    Pending,
    Resolving,
    Fetching,
    Transcoding,
    Tagging,
    Completed,
    Cancelled,
    Failed,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Cancelled | DownloadStatus::Failed)
    }

    /// Forward edges of the job state machine. Resolving may be skipped and
    /// so may Tagging; Cancelled and Failed are reachable from any
    /// non-terminal state. Nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: DownloadStatus) -> bool {
        use DownloadStatus::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Cancelled | Failed) {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Resolving)
                | (Pending, Fetching)
                | (Resolving, Fetching)
                | (Fetching, Transcoding)
                | (Transcoding, Tagging)
                | (Transcoding, Completed)
                | (Tagging, Completed)
        )
    }

    /// Share of overall progress owned by this phase.
    pub fn progress_slice(&self) -> (f32, f32) {
        match self {
            DownloadStatus::Pending => (0.0, 0.0),
            DownloadStatus::Resolving => (0.0, 0.1),
            DownloadStatus::Fetching => (0.1, 0.6),
            DownloadStatus::Transcoding => (0.6, 0.9),
            DownloadStatus::Tagging => (0.9, 1.0),
            DownloadStatus::Completed => (1.0, 1.0),
            DownloadStatus::Cancelled | DownloadStatus::Failed => (0.0, 0.0),
        }
    }

    /// Maps a tool's own 0..1 fraction into this phase's slice.
    pub fn map_progress(&self, fraction: f32) -> f32 {
        let (start, end) = self.progress_slice();
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        if fraction >= 1.0 {
            return end;
        }
        start + (end - start) * fraction
    }
}

/// Read-only view of one job as published to observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSnapshot {
    pub id: String,
    pub song: Song,
    pub config: DownloadConfig,
    pub status: DownloadStatus,
    pub progress: f32,
    pub step: String,
    pub error: Option<String>,
    pub output_path: Option<PathBuf>,
    /// Starts at 1 and grows with each retry.
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One committed status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub previous: DownloadStatus,
    pub job: JobSnapshot,
}

/// What a running attempt tells the manager.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    Phase { status: DownloadStatus, step: String },
    /// The song gained a fetch URL and possibly richer metadata.
    Resolved { song: Song },
    /// Overall progress, already mapped into the phase slice.
    Progress(f32),
    Completed { output_path: PathBuf },
    Failed { message: String },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct WorkerMessage {
    pub job_id: String,
    pub attempt: u32,
    pub update: JobUpdate,
}
