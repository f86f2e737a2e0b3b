use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::info;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use spotdl_core::api::Song;
use spotdl_core::binaries::{default_catalog, BinaryManager, StaticTools, ToolProvisioning};
use spotdl_core::config::{AppConfig, AudioFormat, AudioQuality};
use spotdl_core::downloader::http_pool::HttpPool;
use spotdl_core::downloader::{DownloadManager, DownloadStatus, JobSnapshot, Pipeline, YtDlpFetcher};
use spotdl_core::processing::FfmpegTranscoder;
use spotdl_core::search::{classify_input, CompositeResolver, ContentResolver, SongInput, SpotifyResolver, YtDlpResolver};
use spotdl_core::utils::UNKNOWN_ARTIST;

const HTTP_POOL_SIZE: usize = 10;
const HTTP_STALL_TIMEOUT_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "spotdl", version, about = "Download songs from catalog links, video links or search queries")]
struct Cli {
    /// Use this config file instead of the default one
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one or more songs
    Download(DownloadArgs),
    /// Resolve an input and print the song as JSON
    Resolve { input: String },
    /// Manage the external tools
    Binaries {
        #[command(subcommand)]
        action: BinaryAction,
    },
}

#[derive(Args)]
struct DownloadArgs {
    /// Catalog links, video links or free-text queries
    #[arg(required = true)]
    inputs: Vec<String>,
    #[arg(short, long)]
    format: Option<AudioFormat>,
    #[arg(short, long)]
    quality: Option<AudioQuality>,
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Filename template using {artist}, {title}, {album} and {year}
    #[arg(short, long)]
    template: Option<String>,
    #[arg(long)]
    no_artwork: bool,
    #[arg(long)]
    no_metadata: bool,
    /// Simultaneous downloads
    #[arg(short, long)]
    jobs: Option<usize>,
}

#[derive(Subcommand)]
enum BinaryAction {
    Status,
    /// Install one tool, or every tool in the catalog
    Install { name: Option<String> },
    Remove { name: String },
}

/// Shared services built from the config.
struct Services {
    http: Arc<HttpPool>,
    tools: Arc<dyn ToolProvisioning>,
    resolver: Arc<CompositeResolver>,
}

async fn binary_manager(config: &AppConfig, http: Arc<HttpPool>) -> anyhow::Result<Arc<BinaryManager>> {
    let manager = BinaryManager::new(&config.binary_dir, default_catalog(), http)
        .await
        .with_context(|| format!("opening binary directory {}", config.binary_dir.display()))?;
    Ok(Arc::new(manager))
}

async fn build_services(config: &AppConfig) -> anyhow::Result<Services> {
    let http = Arc::new(HttpPool::new(HTTP_POOL_SIZE, HTTP_STALL_TIMEOUT_SECS, config.proxy.as_deref())?);

    let tools: Arc<dyn ToolProvisioning> = match (&config.ytdlp_path, &config.ffmpeg_path) {
        (Some(ytdlp), Some(ffmpeg)) => {
            info!("🔧 Using configured tools {:?} and {:?}", ytdlp, ffmpeg);
            Arc::new(StaticTools::new(ytdlp, ffmpeg))
        }
        _ => binary_manager(config, http.clone()).await?,
    };

    let catalog = SpotifyResolver::new(http.get_client().clone(), &config.spotify)
        .map(|resolver| Arc::new(resolver) as Arc<dyn ContentResolver>);
    if catalog.is_none() {
        info!("ℹ️ No catalog credentials configured, catalog links will not resolve");
    }
    let content: Arc<dyn ContentResolver> = Arc::new(YtDlpResolver::new(tools.clone()));
    let resolver = Arc::new(CompositeResolver::new(catalog, content));

    Ok(Services { http, tools, resolver })
}

/// Placeholder song for raw input; the pipeline resolves it.
fn pending_song(index: usize, raw: &str) -> anyhow::Result<Song> {
    let id = format!("input-{}", index + 1);
    let song = match classify_input(raw)? {
        SongInput::Query(query) => Song::from_video_title(id, &query, None),
        SongInput::CatalogUrl(url) | SongInput::ContentUrl(url) => {
            let mut song = Song::new(id, url.as_str(), UNKNOWN_ARTIST);
            song.source_url = Some(url);
            song
        }
    };
    Ok(song)
}

fn bar_style() -> anyhow::Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
        .progress_chars("#>-"))
}

fn render(bar: &ProgressBar, job: &JobSnapshot) {
    bar.set_position((job.progress * 100.0).round() as u64);
    let message = match (&job.status, &job.error) {
        (DownloadStatus::Failed, Some(error)) => format!("{} | failed: {}", job.song.display_name(), error),
        (DownloadStatus::Completed, _) => format!(
            "{} | saved to {}",
            job.song.display_name(),
            job.output_path.as_deref().map(|p| p.display().to_string()).unwrap_or_default()
        ),
        _ => format!("{} | {}", job.song.display_name(), job.step),
    };
    bar.set_message(message);
    if job.status.is_terminal() && !bar.is_finished() {
        bar.abandon();
    }
}

async fn run_download(config: AppConfig, args: DownloadArgs) -> anyhow::Result<()> {
    let mut download_config = config.download_config();
    if let Some(format) = args.format {
        download_config.format = format;
    }
    if let Some(quality) = args.quality {
        download_config.quality = quality;
    }
    if let Some(output) = args.output {
        download_config.output_directory = output;
    }
    if let Some(template) = args.template {
        download_config.filename_template = template;
    }
    download_config.embed_artwork &= !args.no_artwork;
    download_config.embed_metadata &= !args.no_metadata;

    let services = build_services(&config).await?;
    let pipeline = Arc::new(Pipeline::new(
        services.resolver.clone(),
        services.tools.clone(),
        Arc::new(YtDlpFetcher::new()),
        Arc::new(FfmpegTranscoder::new()),
        services.http.clone(),
        config.temp_dir.clone(),
    ));
    let jobs = args.jobs.unwrap_or(config.max_concurrent_downloads);
    let manager = DownloadManager::new(pipeline, jobs, Some(config.download_path.clone()));

    let progress = MultiProgress::new();
    let style = bar_style()?;
    let mut bars = HashMap::new();
    let mut ids = Vec::new();
    for (index, raw) in args.inputs.iter().enumerate() {
        let song = match pending_song(index, raw) {
            Ok(song) => song,
            Err(e) => {
                log::error!("❌ Skipping '{}': {}", raw, e);
                continue;
            }
        };
        let id = manager.submit(song, download_config.clone()).await?;
        let bar = progress.add(ProgressBar::new(100));
        bar.set_style(style.clone());
        bars.insert(id.clone(), bar);
        ids.push(id);
    }
    if ids.is_empty() {
        bail!("nothing to download");
    }

    let mut observer = manager.observe();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    loop {
        let snapshot = observer.borrow_and_update().clone();
        for job in snapshot.iter() {
            if let Some(bar) = bars.get(&job.id) {
                render(bar, job);
            }
        }
        if snapshot.iter().all(|job| job.status.is_terminal()) {
            break;
        }

        tokio::select! {
            changed = observer.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                log::warn!("🛑 Interrupted, cancelling downloads");
                manager.cancel_all().await?;
            }
        }
    }

    let finished = manager.wait_for(&ids).await?;
    let failed = finished.iter().filter(|job| job.status == DownloadStatus::Failed).count();
    let cancelled = finished.iter().filter(|job| job.status == DownloadStatus::Cancelled).count();
    info!(
        "📊 {} completed, {} failed, {} cancelled",
        finished.len() - failed - cancelled,
        failed,
        cancelled
    );
    if failed > 0 || interrupted {
        bail!("{} of {} downloads did not complete", failed + cancelled, finished.len());
    }
    Ok(())
}

async fn run_resolve(config: AppConfig, input: String) -> anyhow::Result<()> {
    let services = build_services(&config).await?;
    let song = services.resolver.resolve_input(&input).await?;
    println!("{}", serde_json::to_string_pretty(&song)?);
    Ok(())
}

async fn run_binaries(config: AppConfig, action: BinaryAction) -> anyhow::Result<()> {
    let http = Arc::new(HttpPool::new(HTTP_POOL_SIZE, HTTP_STALL_TIMEOUT_SECS, config.proxy.as_deref())?);
    let manager = binary_manager(&config, http).await?;

    match action {
        BinaryAction::Status => {
            for state in manager.check_installed().await {
                println!(
                    "{:<10} {:<16} {:<12} {}",
                    state.info.name,
                    format!("{:?}", state.status),
                    state.installed_version.as_deref().unwrap_or("-"),
                    if state.info.required { "required" } else { "optional" }
                );
            }
        }
        BinaryAction::Install { name: Some(name) } => {
            let path = manager.reinstall(&name).await?;
            println!("{} installed at {}", name, path.display());
        }
        BinaryAction::Install { name: None } => {
            for (name, path) in manager.ensure_all().await? {
                println!("{} ready at {}", name, path.display());
            }
        }
        BinaryAction::Remove { name } => {
            manager.remove(&name).await?;
            println!("{} removed", name);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path).with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            log::error!("Failed to load configuration: {}", e);
            AppConfig::default()
        }),
    };

    match cli.command {
        Commands::Download(args) => run_download(config, args).await,
        Commands::Resolve { input } => run_resolve(config, input).await,
        Commands::Binaries { action } => run_binaries(config, action).await,
    }
}
