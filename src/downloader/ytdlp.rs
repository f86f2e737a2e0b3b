use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use crate::errors::{AppError, Result};
use crate::runner::{PercentProgress, ToolRunner};

/// Extensions the fetch tool may append to the output stem.
pub const FETCHED_EXTENSIONS: [&str; 5] = ["webm", "m4a", "opus", "mp3", "ogg"];

/// Downloads raw audio for a fetch URL.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// `output_stem` has no extension; the returned path is the file that
    /// was actually written.
    async fn fetch(
        &self,
        tool: &Path,
        url: &str,
        output_stem: &Path,
        on_progress: &(dyn Fn(f32) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;
}

/// Looks for `<stem>.<ext>` over the known extension set.
pub fn probe_fetched_file(output_stem: &Path) -> Option<PathBuf> {
    FETCHED_EXTENSIONS.iter().find_map(|ext| {
        let mut candidate = output_stem.as_os_str().to_owned();
        candidate.push(".");
        candidate.push(ext);
        let candidate = PathBuf::from(candidate);
        candidate.is_file().then_some(candidate)
    })
}

pub fn build_fetch_args(url: &str, output_stem: &Path) -> Vec<OsString> {
    let mut template = output_stem.as_os_str().to_owned();
    template.push(".%(ext)s");

    let mut args: Vec<OsString> = [
        "-f",
        "bestaudio/best",
        "--no-playlist",
        "--newline",
        "--progress",
        "--no-part",
        "--no-mtime",
        "-o",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(template);
    args.push(url.into());
    args
}

pub struct YtDlpFetcher {
    runner: ToolRunner,
}

impl YtDlpFetcher {
    pub fn new() -> Self {
        Self {
            runner: ToolRunner::new("FETCH"),
        }
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceFetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        tool: &Path,
        url: &str,
        output_stem: &Path,
        on_progress: &(dyn Fn(f32) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        log::info!("⬇️ [FETCH] {} -> {:?}", url, output_stem);
        let args = build_fetch_args(url, output_stem);
        self.runner
            .run_with_progress(tool.as_os_str(), &args, PercentProgress, |p| on_progress(p), cancel)
            .await?;

        let fetched = probe_fetched_file(output_stem).ok_or_else(|| AppError::ToolExecution {
            exit_code: Some(0),
            stderr: format!("yt-dlp finished but no audio file was written for {}", url),
        })?;
        log::info!("✅ [FETCH] Downloaded {:?}", fetched);
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_request_best_audio_without_playlists() {
        let args: Vec<String> = build_fetch_args("https://youtu.be/x", Path::new("/tmp/job/source"))
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0..2], ["-f", "bestaudio/best"]);
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"/tmp/job/source.%(ext)s".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/x"));
    }

    #[test]
    fn probe_finds_whatever_extension_was_written() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("source");
        assert!(probe_fetched_file(&stem).is_none());

        std::fs::write(dir.path().join("source.opus"), b"audio").unwrap();
        assert_eq!(probe_fetched_file(&stem), Some(dir.path().join("source.opus")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fake_tool_output_is_located_and_progress_reported() {
        use std::os::unix::fs::PermissionsExt;
        use std::sync::{Arc, Mutex};

        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("fake-ytdlp");
        // Writes the templated path with an m4a extension and prints progress lines.
        std::fs::write(
            &tool,
            concat!(
                "#!/bin/sh\n",
                "for a in \"$@\"; do case \"$a\" in *'%(ext)s') out=$(printf '%s' \"$a\" | sed 's/[.]%(ext)s$/.m4a/');; esac; done\n",
                "echo '[download]  50.0% of 1.00MiB'\n",
                "echo '[download] 100% of 1.00MiB'\n",
                "printf audio > \"$out\"\n",
            ),
        )
        .unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let stem = dir.path().join("source");
        let fetched = YtDlpFetcher::new()
            .fetch(
                &tool,
                "https://youtu.be/x",
                &stem,
                &move |p| sink.lock().unwrap().push(p),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(fetched, dir.path().join("source.m4a"));
        assert_eq!(*seen.lock().unwrap(), vec![0.5, 1.0]);
    }
}
