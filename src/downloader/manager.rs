use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use crate::api::Song;
use crate::config::DownloadConfig;
use crate::downloader::pipeline::{JobContext, JobReporter, Pipeline};
use crate::downloader::{
    DownloadStatus, JobEvent, JobSnapshot, JobUpdate, WorkerMessage, STEP_CANCELLED, STEP_COMPLETED,
    STEP_FAILED, STEP_WAITING,
};
use crate::errors::{AppError, Result};
use crate::utils::generate_download_id;

const EVENT_CAPACITY: usize = 256;

enum Command {
    Submit {
        song: Song,
        config: DownloadConfig,
        reply: oneshot::Sender<String>,
    },
    Cancel {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    CancelAll {
        reply: oneshot::Sender<()>,
    },
    Retry {
        id: String,
        reply: oneshot::Sender<Result<()>>,
    },
    ClearTerminal {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the job table. All mutations go through a single actor task
/// that publishes immutable snapshots; dropping the handle cancels every job.
pub struct DownloadManager {
    commands: mpsc::UnboundedSender<Command>,
    jobs: watch::Receiver<Arc<Vec<JobSnapshot>>>,
    events: broadcast::Sender<JobEvent>,
    root: CancellationToken,
    default_output: Option<PathBuf>,
}

impl DownloadManager {
    /// Spawns the actor on the current runtime. At most `max_concurrent`
    /// attempts run the pipeline at once; the rest wait in PENDING.
    pub fn new(pipeline: Arc<Pipeline>, max_concurrent: usize, default_output: Option<PathBuf>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let (snapshots, jobs) = watch::channel(Arc::new(Vec::new()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let root = CancellationToken::new();
        let max_concurrent = max_concurrent.max(1);

        log::info!("🚀 [MANAGER] Starting with {} download slot(s)", max_concurrent);
        let actor = Actor {
            pipeline,
            slots: Arc::new(Semaphore::new(max_concurrent)),
            root: root.clone(),
            jobs: Vec::new(),
            index: HashMap::new(),
            worker_tx,
            snapshots,
            events: events.clone(),
            dirty: false,
        };
        tokio::spawn(actor.run(command_rx, worker_rx));

        Self {
            commands,
            jobs,
            events,
            root,
            default_output,
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| AppError::InvalidState("Download manager has shut down".to_string()))?;
        rx.await
            .map_err(|_| AppError::InvalidState("Download manager has shut down".to_string()))
    }

    /// Creates a PENDING job and schedules it. Fails only on an invalid config.
    pub async fn submit(&self, song: Song, config: DownloadConfig) -> Result<String> {
        let config = config.validated(self.default_output.as_deref())?;
        self.request(|reply| Command::Submit { song, config, reply }).await
    }

    /// No-op for terminal jobs.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.request(|reply| Command::Cancel { id, reply }).await?
    }

    pub async fn cancel_all(&self) -> Result<()> {
        self.request(|reply| Command::CancelAll { reply }).await
    }

    /// Starts a fresh attempt of a FAILED job under the same id.
    pub async fn retry(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.request(|reply| Command::Retry { id, reply }).await?
    }

    /// Drops COMPLETED and FAILED jobs and returns how many were removed.
    pub async fn clear_terminal(&self) -> Result<usize> {
        self.request(|reply| Command::ClearTerminal { reply }).await
    }

    /// Continuously updated job list in submission order. Intermediate
    /// progress ticks may be coalesced; committed transitions never are.
    pub fn observe(&self) -> watch::Receiver<Arc<Vec<JobSnapshot>>> {
        self.jobs.clone()
    }

    pub fn snapshot(&self) -> Arc<Vec<JobSnapshot>> {
        self.jobs.borrow().clone()
    }

    pub fn get(&self, id: &str) -> Option<JobSnapshot> {
        self.jobs.borrow().iter().find(|job| job.id == id).cloned()
    }

    /// One event per committed status change.
    pub fn events(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Resolves once every listed job is terminal or gone.
    pub async fn wait_for(&self, ids: &[String]) -> Result<Vec<JobSnapshot>> {
        let mut rx = self.observe();
        let jobs = rx
            .wait_for(|jobs| {
                ids.iter().all(|id| {
                    jobs.iter()
                        .find(|job| &job.id == id)
                        .map_or(true, |job| job.status.is_terminal())
                })
            })
            .await
            .map_err(|_| AppError::InvalidState("Download manager has shut down".to_string()))?;
        Ok(jobs.iter().filter(|job| ids.contains(&job.id)).cloned().collect())
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

struct JobEntry {
    snapshot: JobSnapshot,
    cancel: CancellationToken,
}

struct Actor {
    pipeline: Arc<Pipeline>,
    slots: Arc<Semaphore>,
    root: CancellationToken,
    jobs: Vec<JobEntry>,
    index: HashMap<String, usize>,
    worker_tx: mpsc::UnboundedSender<WorkerMessage>,
    snapshots: watch::Sender<Arc<Vec<JobSnapshot>>>,
    events: broadcast::Sender<JobEvent>,
    dirty: bool,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut worker_rx: mpsc::UnboundedReceiver<WorkerMessage>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(message) = worker_rx.recv() => self.handle_worker(message),
            }
            while let Ok(message) = worker_rx.try_recv() {
                self.handle_worker(message);
            }
            self.publish();
        }
        log::info!("🛑 [MANAGER] All handles dropped, stopping");
        self.root.cancel();
    }

    fn publish(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;
        let jobs: Vec<JobSnapshot> = self.jobs.iter().map(|entry| entry.snapshot.clone()).collect();
        self.snapshots.send_replace(Arc::new(jobs));
    }

    /// Applies `change` to a job and emits an event when its status moved.
    fn commit(&mut self, idx: usize, change: impl FnOnce(&mut JobSnapshot)) {
        let job = &mut self.jobs[idx].snapshot;
        let previous = job.status;
        change(job);
        job.updated_at = Utc::now();
        self.dirty = true;

        if job.status != previous {
            log::debug!("📊 [MANAGER] Job {}: {:?} -> {:?}", job.id, previous, job.status);
            // No subscribers is fine.
            let _ = self.events.send(JobEvent {
                previous,
                job: job.clone(),
            });
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { song, config, reply } => {
                let id = self.create_job(song, config);
                self.publish();
                let _ = reply.send(id);
            }
            Command::Cancel { id, reply } => {
                let result = self.cancel_job(&id);
                self.publish();
                let _ = reply.send(result);
            }
            Command::CancelAll { reply } => {
                let active: Vec<String> = self
                    .jobs
                    .iter()
                    .filter(|entry| !entry.snapshot.status.is_terminal())
                    .map(|entry| entry.snapshot.id.clone())
                    .collect();
                log::info!("🛑 [MANAGER] Cancelling {} active job(s)", active.len());
                for id in active {
                    let _ = self.cancel_job(&id);
                }
                self.publish();
                let _ = reply.send(());
            }
            Command::Retry { id, reply } => {
                let result = self.retry_job(&id);
                self.publish();
                let _ = reply.send(result);
            }
            Command::ClearTerminal { reply } => {
                let before = self.jobs.len();
                self.jobs.retain(|entry| {
                    !matches!(entry.snapshot.status, DownloadStatus::Completed | DownloadStatus::Failed)
                });
                self.index = self
                    .jobs
                    .iter()
                    .enumerate()
                    .map(|(idx, entry)| (entry.snapshot.id.clone(), idx))
                    .collect();
                let removed = before - self.jobs.len();
                if removed > 0 {
                    log::info!("🧹 [MANAGER] Cleared {} finished job(s)", removed);
                    self.dirty = true;
                }
                self.publish();
                let _ = reply.send(removed);
            }
        }
    }

    fn create_job(&mut self, song: Song, config: DownloadConfig) -> String {
        let id = generate_download_id();
        let now = Utc::now();
        log::info!("📥 [MANAGER] Queued '{}' as {}", song.display_name(), id);

        self.jobs.push(JobEntry {
            snapshot: JobSnapshot {
                id: id.clone(),
                song,
                config,
                status: DownloadStatus::Pending,
                progress: 0.0,
                step: STEP_WAITING.to_string(),
                error: None,
                output_path: None,
                attempt: 1,
                created_at: now,
                updated_at: now,
            },
            cancel: self.root.child_token(),
        });
        let idx = self.jobs.len() - 1;
        self.index.insert(id.clone(), idx);
        self.dirty = true;
        self.spawn_attempt(idx);
        id
    }

    fn cancel_job(&mut self, id: &str) -> Result<()> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("No download with id {}", id)))?;
        if self.jobs[idx].snapshot.status.is_terminal() {
            return Ok(());
        }

        log::info!("🛑 [MANAGER] Cancelling job {}", id);
        self.jobs[idx].cancel.cancel();
        self.commit(idx, |job| {
            job.status = DownloadStatus::Cancelled;
            job.step = STEP_CANCELLED.to_string();
        });
        Ok(())
    }

    fn retry_job(&mut self, id: &str) -> Result<()> {
        let idx = *self
            .index
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("No download with id {}", id)))?;
        let status = self.jobs[idx].snapshot.status;
        if status != DownloadStatus::Failed {
            return Err(AppError::InvalidState(format!(
                "Only failed downloads can be retried, {} is {:?}",
                id, status
            )));
        }

        self.jobs[idx].cancel = self.root.child_token();
        self.commit(idx, |job| {
            job.attempt += 1;
            job.status = DownloadStatus::Pending;
            job.progress = 0.0;
            job.step = STEP_WAITING.to_string();
            job.error = None;
            job.output_path = None;
        });
        log::info!("🔁 [MANAGER] Retrying job {} (attempt {})", id, self.jobs[idx].snapshot.attempt);
        self.spawn_attempt(idx);
        Ok(())
    }

    fn spawn_attempt(&self, idx: usize) {
        let entry = &self.jobs[idx];
        let ctx = JobContext {
            job_id: entry.snapshot.id.clone(),
            attempt: entry.snapshot.attempt,
            song: entry.snapshot.song.clone(),
            config: entry.snapshot.config.clone(),
        };
        let reporter = JobReporter::new(ctx.job_id.clone(), ctx.attempt, self.worker_tx.clone());
        tokio::spawn(supervise(
            self.pipeline.clone(),
            self.slots.clone(),
            ctx,
            reporter,
            entry.cancel.clone(),
        ));
    }

    fn handle_worker(&mut self, message: WorkerMessage) {
        let Some(&idx) = self.index.get(&message.job_id) else {
            return;
        };
        let job = &self.jobs[idx].snapshot;
        if job.attempt != message.attempt || job.status.is_terminal() {
            return;
        }

        match message.update {
            JobUpdate::Phase { status, step } => {
                if status != job.status && !job.status.can_transition_to(status) {
                    log::warn!(
                        "⚠️ [MANAGER] Ignoring {:?} -> {:?} for job {}",
                        job.status,
                        status,
                        job.id
                    );
                    return;
                }
                self.commit(idx, |job| {
                    job.status = status;
                    job.step = step;
                    job.progress = job.progress.max(status.progress_slice().0);
                });
            }
            JobUpdate::Resolved { song } => self.commit(idx, |job| job.song = song),
            JobUpdate::Progress(progress) => {
                let progress = if progress.is_finite() { progress.clamp(0.0, 1.0) } else { 0.0 };
                if progress > job.progress {
                    self.commit(idx, |job| job.progress = progress);
                }
            }
            JobUpdate::Completed { output_path } => {
                if !job.status.can_transition_to(DownloadStatus::Completed) {
                    log::error!("❌ [MANAGER] Job {} finished from {:?}", job.id, job.status);
                }
                log::info!("✅ [MANAGER] Job {} completed: {:?}", job.id, output_path);
                self.commit(idx, |job| {
                    job.status = DownloadStatus::Completed;
                    job.progress = 1.0;
                    job.step = STEP_COMPLETED.to_string();
                    job.output_path = Some(output_path);
                });
            }
            JobUpdate::Failed { message } => {
                log::error!("❌ [MANAGER] Job {} failed: {}", job.id, message);
                self.commit(idx, |job| {
                    job.status = DownloadStatus::Failed;
                    job.step = STEP_FAILED.to_string();
                    job.error = Some(message);
                });
            }
            JobUpdate::Cancelled => self.commit(idx, |job| {
                job.status = DownloadStatus::Cancelled;
                job.step = STEP_CANCELLED.to_string();
            }),
        }
    }
}

/// Runs one attempt in its own task so a panic in the pipeline becomes a
/// FAILED job instead of taking the manager down.
async fn supervise(
    pipeline: Arc<Pipeline>,
    slots: Arc<Semaphore>,
    ctx: JobContext,
    reporter: JobReporter,
    cancel: CancellationToken,
) {
    let job_id = ctx.job_id.clone();
    let worker_reporter = reporter.clone();
    let worker_cancel = cancel.clone();
    let worker = tokio::spawn(async move {
        let _permit = tokio::select! {
            biased;
            _ = worker_cancel.cancelled() => return Err(AppError::Cancelled),
            permit = slots.acquire_owned() => permit
                .map_err(|_| AppError::InvalidState("Download slots closed".to_string()))?,
        };
        log::info!("▶️ [MANAGER] Job {} acquired a slot", ctx.job_id);
        pipeline.execute(&ctx, &worker_reporter, &worker_cancel).await
    });

    let update = match worker.await {
        Ok(Ok(output_path)) => JobUpdate::Completed { output_path },
        Ok(Err(_)) if cancel.is_cancelled() => JobUpdate::Cancelled,
        Ok(Err(e)) if e.is_cancelled() => JobUpdate::Cancelled,
        Ok(Err(e)) => JobUpdate::Failed { message: e.to_string() },
        Err(join_error) => {
            log::error!("💥 [MANAGER] Worker for job {} panicked: {}", job_id, join_error);
            JobUpdate::Failed {
                message: "internal error".to_string(),
            }
        }
    };
    reporter.send(update);
}
