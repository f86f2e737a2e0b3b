use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell};
use tokio_util::sync::CancellationToken;
use crate::api::Song;
use crate::binaries::{ToolPaths, ToolProvisioning};
use crate::config::DownloadConfig;
use crate::downloader::http_pool::ArtifactSource;
use crate::downloader::ytdlp::SourceFetcher;
use crate::downloader::{DownloadStatus, JobUpdate, WorkerMessage};
use crate::errors::{AppError, Result};
use crate::processing::{TagRequest, TranscodeRequest, Transcoder};
use crate::search::ContentResolver;
use crate::utils::{ensure_dir_exists, render_filename};

/// Inputs of one attempt. The song may still lack a fetch URL.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub attempt: u32,
    pub song: Song,
    pub config: DownloadConfig,
}

/// Sends an attempt's phase changes and progress back to the manager.
#[derive(Clone)]
pub struct JobReporter {
    job_id: String,
    attempt: u32,
    tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl JobReporter {
    pub fn new(job_id: impl Into<String>, attempt: u32, tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
        Self {
            job_id: job_id.into(),
            attempt,
            tx,
        }
    }

    pub fn send(&self, update: JobUpdate) {
        // The manager going away means nobody is watching anymore.
        let _ = self.tx.send(WorkerMessage {
            job_id: self.job_id.clone(),
            attempt: self.attempt,
            update,
        });
    }

    pub fn phase(&self, status: DownloadStatus, step: impl Into<String>) {
        self.send(JobUpdate::Phase {
            status,
            step: step.into(),
        });
    }

    /// `fraction` is the tool's own 0..1 value for the given phase.
    pub fn progress(&self, status: DownloadStatus, fraction: f32) {
        self.send(JobUpdate::Progress(status.map_progress(fraction)));
    }

    pub fn resolved(&self, song: &Song) {
        self.send(JobUpdate::Resolved { song: song.clone() });
    }
}

/// Races `fut` against the job's cancellation token.
async fn guarded<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AppError::Cancelled),
        result = fut => result,
    }
}

/// Runs single attempts of the download pipeline. Shared by every job; the
/// tool lookup is done once per process and reused.
pub struct Pipeline {
    resolver: Arc<dyn ContentResolver>,
    tools: Arc<dyn ToolProvisioning>,
    tool_paths: Arc<OnceCell<ToolPaths>>,
    fetcher: Arc<dyn SourceFetcher>,
    transcoder: Arc<dyn Transcoder>,
    artwork: Arc<dyn ArtifactSource>,
    temp_root: PathBuf,
}

impl Pipeline {
    pub fn new(
        resolver: Arc<dyn ContentResolver>,
        tools: Arc<dyn ToolProvisioning>,
        fetcher: Arc<dyn SourceFetcher>,
        transcoder: Arc<dyn Transcoder>,
        artwork: Arc<dyn ArtifactSource>,
        temp_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolver,
            tools,
            tool_paths: Arc::new(OnceCell::new()),
            fetcher,
            transcoder,
            artwork,
            temp_root: temp_root.into(),
        }
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// Provisioning runs in a detached task; a job that stops waiting leaves
    /// the install running. Failures are not remembered.
    async fn tool_paths(&self) -> Result<ToolPaths> {
        if let Some(paths) = self.tool_paths.get() {
            return Ok(paths.clone());
        }
        let cell = self.tool_paths.clone();
        let tools = self.tools.clone();
        tokio::spawn(async move {
            cell.get_or_try_init(|| async {
                log::info!("🔧 [PIPELINE] Ensuring external tools are available");
                tools.ensure_tools().await
            })
            .await
            .cloned()
        })
        .await
        .map_err(|e| AppError::InvalidState(format!("Tool provisioning task failed: {}", e)))?
    }

    async fn resolve(&self, song: &Song) -> Option<Song> {
        // A link that does not resolve is a miss; its placeholder title is
        // not a search query.
        let hit = match &song.source_url {
            Some(url) => self.resolver.resolve_by_url(url).await,
            None => self.resolver.resolve_by_query(&song.search_query()).await,
        };
        hit.map(|hit| song.merge_resolved(&hit))
    }

    /// Runs one attempt and returns the final output path. Scratch files live
    /// in a job-scoped directory that is removed on every exit path.
    pub async fn execute(
        &self,
        ctx: &JobContext,
        reporter: &JobReporter,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        ensure_dir_exists(&self.temp_root).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", ctx.job_id, ctx.attempt))
            .tempdir_in(&self.temp_root)?;
        log::debug!("📁 [PIPELINE] Job {} scratch dir {:?}", ctx.job_id, scratch.path());

        let result = self.run_attempt(ctx, reporter, cancel, scratch.path()).await;

        match tokio::task::spawn_blocking(move || scratch.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("⚠️ [PIPELINE] Could not remove scratch dir of job {}: {}", ctx.job_id, e),
            Err(e) => log::warn!("⚠️ [PIPELINE] Scratch cleanup task for job {} failed: {}", ctx.job_id, e),
        }
        result
    }

    async fn run_attempt(
        &self,
        ctx: &JobContext,
        reporter: &JobReporter,
        cancel: &CancellationToken,
        scratch: &Path,
    ) -> Result<PathBuf> {
        let config = &ctx.config;
        let mut song = ctx.song.clone();

        if song.fetch_url.is_none() {
            reporter.phase(DownloadStatus::Resolving, "Resolving source");
            log::info!("🔍 [PIPELINE] Resolving '{}'", song.display_name());
            let resolved = guarded(cancel, async { self.resolve(&song).await.ok_or(AppError::SourceNotFound) }).await?;
            song = resolved;
            if song.fetch_url.is_none() {
                return Err(AppError::SourceNotFound);
            }
            reporter.resolved(&song);
            reporter.progress(DownloadStatus::Resolving, 1.0);
        }
        let fetch_url = song.fetch_url.clone().ok_or(AppError::SourceNotFound)?;

        reporter.phase(DownloadStatus::Fetching, "Preparing tools");
        let tools = guarded(cancel, self.tool_paths()).await?;

        reporter.phase(DownloadStatus::Fetching, "Downloading audio");
        let on_fetch = |p: f32| reporter.progress(DownloadStatus::Fetching, p);
        let source = self
            .fetcher
            .fetch(&tools.fetch_tool, &fetch_url, &scratch.join("source"), &on_fetch, cancel)
            .await?;

        let artwork = if config.embed_artwork && config.embed_metadata && config.format.supports_cover_art() {
            match &song.artwork_url {
                Some(url) => {
                    reporter.phase(DownloadStatus::Fetching, "Downloading artwork");
                    self.download_artwork(url, scratch, cancel).await?
                }
                None => None,
            }
        } else {
            None
        };
        reporter.progress(DownloadStatus::Fetching, 1.0);

        reporter.phase(DownloadStatus::Transcoding, format!("Converting to {}", config.format));
        let converted = scratch.join(format!("converted.{}", config.format.extension()));
        let request = TranscodeRequest {
            input: source,
            output: converted.clone(),
            format: config.format,
            quality: config.quality,
            duration_seconds: song.duration_seconds,
        };
        let on_transcode = |p: f32| reporter.progress(DownloadStatus::Transcoding, p);
        self.transcoder
            .transcode(&tools.transcode_tool, &request, &on_transcode, cancel)
            .await?;
        reporter.progress(DownloadStatus::Transcoding, 1.0);

        let mut last_status = DownloadStatus::Transcoding;
        let mut finished = converted.clone();
        if config.embed_metadata {
            last_status = DownloadStatus::Tagging;
            reporter.phase(DownloadStatus::Tagging, "Embedding metadata");
            let tagged = scratch.join(format!("tagged.{}", config.format.extension()));
            let request = TagRequest {
                input: converted,
                output: tagged.clone(),
                format: config.format,
                song: song.clone(),
                artwork,
            };
            match self.transcoder.embed_metadata(&tools.transcode_tool, &request, cancel).await {
                Ok(()) if tagged.is_file() => finished = tagged,
                Ok(()) => log::warn!("⚠️ [TAG] Tagger wrote no file, keeping untagged audio"),
                Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                Err(e) => log::warn!("⚠️ [TAG] {}; keeping untagged audio", e),
            }
        }

        reporter.phase(last_status, "Saving file");
        let file_name = format!(
            "{}.{}",
            render_filename(&config.filename_template, &song),
            config.format.extension()
        );
        let destination = config.output_directory.join(file_name);
        guarded(cancel, place_file(&finished, &destination)).await?;

        log::info!("✅ [PIPELINE] Job {} saved to {:?}", ctx.job_id, destination);
        Ok(destination)
    }

    /// `None` on any failure other than cancellation.
    async fn download_artwork(&self, url: &str, scratch: &Path, cancel: &CancellationToken) -> Result<Option<PathBuf>> {
        let dest = scratch.join("artwork.jpg");
        match self.artwork.fetch_to_file(url, &dest, &|_, _| {}, cancel).await {
            Ok(0) => {
                log::warn!("⚠️ [PIPELINE] Artwork at {} was empty, continuing without it", url);
                Ok(None)
            }
            Ok(_) => Ok(Some(dest)),
            Err(AppError::Cancelled) => Err(AppError::Cancelled),
            Err(e) => {
                log::warn!("⚠️ [PIPELINE] Artwork download failed, continuing without it: {}", e);
                Ok(None)
            }
        }
    }
}

/// Moves `from` to `to`, replacing any existing file. Falls back to
/// copy+remove when a rename crosses filesystems.
async fn place_file(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        ensure_dir_exists(parent).await?;
    }
    match tokio::fs::remove_file(to).await {
        Ok(()) => log::info!("♻️ [PIPELINE] Replacing existing {:?}", to),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if tokio::fs::rename(from, to).await.is_err() {
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reporter_maps_fractions_into_phase_slices() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = JobReporter::new("job", 2, tx);
        reporter.progress(DownloadStatus::Transcoding, 0.5);

        let message = rx.recv().await.unwrap();
        assert_eq!(message.job_id, "job");
        assert_eq!(message.attempt, 2);
        match message.update {
            JobUpdate::Progress(p) => assert!((p - 0.75).abs() < 1e-6),
            other => panic!("unexpected update {:?}", other),
        }
    }

    #[tokio::test]
    async fn guarded_returns_cancelled_once_token_fires() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<()> = guarded(&cancel, std::future::pending()).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
    }

    #[tokio::test]
    async fn place_file_replaces_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("converted.mp3");
        let to = dir.path().join("out").join("Artist - Title.mp3");
        tokio::fs::write(&from, b"new").await.unwrap();
        tokio::fs::create_dir_all(to.parent().unwrap()).await.unwrap();
        tokio::fs::write(&to, b"old").await.unwrap();

        place_file(&from, &to).await.unwrap();
        assert_eq!(tokio::fs::read(&to).await.unwrap(), b"new");
        assert!(!from.exists());
    }
}
