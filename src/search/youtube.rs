use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use crate::api::Song;
use crate::binaries::ToolProvisioning;
use crate::errors::{AppError, Result};
use crate::runner::ToolRunner;
use crate::search::ContentResolver;
use crate::utils::{parse_duration, UNKNOWN_ARTIST};

/// Content-search backend driving the fetch tool in metadata-only mode.
pub struct YtDlpResolver {
    tools: Arc<dyn ToolProvisioning>,
    runner: ToolRunner,
}

impl YtDlpResolver {
    pub fn new(tools: Arc<dyn ToolProvisioning>) -> Self {
        Self {
            tools,
            runner: ToolRunner::new("RESOLVE"),
        }
    }

    async fn dump_json(&self, target: &str) -> Result<Option<Song>> {
        let tools = self.tools.ensure_tools().await?;
        let args = ["--dump-json", "--no-playlist", "--skip-download", "--no-warnings", target];
        log::info!("🔍 [RESOLVE] yt-dlp lookup: {}", target);

        let output = self
            .runner
            .run(tools.fetch_tool.as_os_str(), &args, &CancellationToken::new())
            .await?;

        let Some(line) = output.stdout.lines().map(str::trim).find(|l| l.starts_with('{')) else {
            return Ok(None);
        };
        let info: Value = serde_json::from_str(line)?;
        Ok(song_from_info_json(&info))
    }
}

/// Maps one `--dump-json` object to a song whose fetch URL is the watch page.
pub fn song_from_info_json(info: &Value) -> Option<Song> {
    let id = info["id"].as_str()?;
    let fetch_url = info["webpage_url"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", id));

    let explicit_artist = info["artist"]
        .as_str()
        .or_else(|| info["creator"].as_str())
        .map(|a| a.split(',').next().unwrap_or(a).trim())
        .filter(|a| !a.is_empty());

    let mut song = match (info["track"].as_str(), explicit_artist) {
        (Some(track), Some(artist)) => Song::new(id, track, artist),
        _ => Song::from_video_title(id, info["title"].as_str().unwrap_or(id), explicit_artist),
    };

    if song.artist == UNKNOWN_ARTIST {
        if let Some(uploader) = info["uploader"].as_str().or_else(|| info["channel"].as_str()) {
            song.artist = uploader.trim_end_matches(" - Topic").trim().to_string();
        }
    }

    song.album = info["album"].as_str().map(str::to_string);
    song.year = info["release_year"]
        .as_u64()
        .map(|y| y.to_string())
        .or_else(|| info["upload_date"].as_str().and_then(|d| d.get(..4)).map(str::to_string));
    song.genre = info["genre"].as_str().map(str::to_string);
    song.artwork_url = info["thumbnail"].as_str().map(str::to_string);
    song.duration_seconds = info["duration"]
        .as_f64()
        .map(|d| d.round() as u32)
        .or_else(|| info["duration_string"].as_str().map(parse_duration))
        .filter(|d| *d > 0);
    song.source_url = Some(fetch_url.clone());
    song.fetch_url = Some(fetch_url);
    Some(song)
}

#[async_trait]
impl ContentResolver for YtDlpResolver {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn resolve_by_query(&self, query: &str) -> Option<Song> {
        let target = format!("ytsearch1:{}", query);
        match self.dump_json(&target).await {
            Ok(song) => song,
            Err(e) => {
                log::warn!("⚠️ [RESOLVE] yt-dlp search for '{}' failed: {}", query, e);
                None
            }
        }
    }

    async fn resolve_by_url(&self, url: &str) -> Option<Song> {
        match self.dump_json(url).await {
            Ok(song) => song,
            Err(AppError::ToolExecution { stderr, .. }) => {
                log::warn!("⚠️ [RESOLVE] yt-dlp could not read {}: {}", url, stderr);
                None
            }
            Err(e) => {
                log::warn!("⚠️ [RESOLVE] yt-dlp lookup for {} failed: {}", url, e);
                None
            }
        }
    }
}
