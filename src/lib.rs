//! Download orchestration core: resolves songs, provisions the external
//! fetch and transcode tools, and drives each download through a per-job
//! state machine with progress, cancellation and retry.

pub mod api;
pub mod binaries;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod processing;
pub mod runner;
pub mod search;
pub mod utils;

pub use api::Song;
pub use config::{AppConfig, AudioFormat, AudioQuality, DownloadConfig};
pub use downloader::{DownloadManager, DownloadStatus, JobSnapshot, Pipeline};
pub use errors::{AppError, Result};
