use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use crate::api::Song;
use crate::config::{AudioFormat, AudioQuality};
use crate::errors::{AppError, Result};
use crate::runner::{FfmpegProgress, ToolRunner};

pub const TARGET_SAMPLE_RATE: &str = "44100";
pub const TARGET_CHANNELS: &str = "2";

#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: AudioFormat,
    pub quality: AudioQuality,
    /// Expected length, used to turn elapsed time into a fraction.
    pub duration_seconds: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct TagRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: AudioFormat,
    pub song: Song,
    pub artwork: Option<PathBuf>,
}

/// Converts audio and embeds tags. `ffmpeg` is the executable to drive.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        ffmpeg: &Path,
        request: &TranscodeRequest,
        on_progress: &(dyn Fn(f32) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn embed_metadata(
        &self,
        ffmpeg: &Path,
        request: &TagRequest,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Codec and quality flags for each target format.
pub fn codec_args(format: AudioFormat, quality: AudioQuality) -> Vec<String> {
    let args: Vec<&str> = match format {
        AudioFormat::Mp3 => vec!["-codec:a", "libmp3lame", "-b:a", quality.bitrate()],
        AudioFormat::M4a => vec!["-codec:a", "aac", "-b:a", quality.bitrate()],
        AudioFormat::Flac => vec!["-codec:a", "flac", "-compression_level", "8"],
        AudioFormat::Wav => vec!["-codec:a", "pcm_s16le"],
        AudioFormat::Ogg => vec!["-codec:a", "libvorbis", "-q:a", quality.vorbis_quality()],
    };
    args.into_iter().map(String::from).collect()
}

/// `-i <input> <codec flags> -ar 44100 -ac 2 -y <output>`
pub fn build_transcode_args(request: &TranscodeRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-i".into(), request.input.clone().into()];
    // Drop any video or cover stream carried by the source container.
    args.push("-vn".into());
    args.extend(codec_args(request.format, request.quality).into_iter().map(OsString::from));
    args.extend(
        ["-ar", TARGET_SAMPLE_RATE, "-ac", TARGET_CHANNELS, "-y"]
            .into_iter()
            .map(OsString::from),
    );
    args.push(request.output.clone().into());
    args
}

/// Stream-copy with tag injection. Artwork is mapped as an attached picture
/// only for containers that can carry one.
pub fn build_tag_args(request: &TagRequest) -> Vec<OsString> {
    let artwork = request
        .artwork
        .as_ref()
        .filter(|_| request.format.supports_cover_art());

    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-i".into(), request.input.clone().into()];
    if let Some(artwork) = artwork {
        args.push("-i".into());
        args.push(artwork.clone().into());
    }
    args.push("-c".into());
    args.push("copy".into());

    let song = &request.song;
    let mut tags = vec![("title", song.title.clone()), ("artist", song.artist.clone())];
    if let Some(album) = &song.album {
        tags.push(("album", album.clone()));
    }
    if let Some(year) = &song.year {
        tags.push(("date", year.clone()));
    }
    if let Some(genre) = &song.genre {
        tags.push(("genre", genre.clone()));
    }
    if let Some(isrc) = &song.isrc {
        tags.push(("isrc", isrc.clone()));
    }
    for (key, value) in tags {
        args.push("-metadata".into());
        args.push(format!("{}={}", key, value).into());
    }

    if artwork.is_some() {
        args.extend(["-map", "0:0", "-map", "1:0"].into_iter().map(OsString::from));
        if request.format != AudioFormat::Mp3 {
            args.extend(["-disposition:v:0", "attached_pic"].into_iter().map(OsString::from));
        }
    }
    if request.format == AudioFormat::Mp3 {
        args.extend(["-id3v2_version", "3"].into_iter().map(OsString::from));
    }

    args.push("-y".into());
    args.push(request.output.clone().into());
    args
}

pub struct FfmpegTranscoder {
    runner: ToolRunner,
}

impl FfmpegTranscoder {
    pub fn new() -> Self {
        Self {
            runner: ToolRunner::new("TRANSCODE"),
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        ffmpeg: &Path,
        request: &TranscodeRequest,
        on_progress: &(dyn Fn(f32) + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<()> {
        log::info!(
            "🎵 [TRANSCODE] {:?} -> {:?} ({} @ {})",
            request.input,
            request.output,
            request.format,
            request.quality.bitrate()
        );
        let args = build_transcode_args(request);
        let parser = FfmpegProgress::new(request.duration_seconds.map(f64::from));
        self.runner
            .run_with_progress(ffmpeg.as_os_str(), &args, parser, |p| on_progress(p), cancel)
            .await?;

        if !request.output.exists() {
            return Err(AppError::ToolExecution {
                exit_code: Some(0),
                stderr: format!("Transcoder produced no output at {}", request.output.display()),
            });
        }
        on_progress(1.0);
        Ok(())
    }

    async fn embed_metadata(
        &self,
        ffmpeg: &Path,
        request: &TagRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        log::info!("🏷️ [TAG] Embedding metadata for '{}'", request.song.display_name());
        let args = build_tag_args(request);
        match self.runner.run(ffmpeg.as_os_str(), &args, cancel).await {
            Ok(_) => Ok(()),
            Err(AppError::Cancelled) => Err(AppError::Cancelled),
            Err(e) => Err(AppError::Tagging(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn transcode_request(format: AudioFormat, quality: AudioQuality) -> TranscodeRequest {
        TranscodeRequest {
            input: PathBuf::from("/tmp/job/raw.webm"),
            output: PathBuf::from("/tmp/job/converted.out"),
            format,
            quality,
            duration_seconds: Some(180),
        }
    }

    #[test]
    fn mp3_uses_bitrate_and_normalizes_output() {
        let args = strings(&build_transcode_args(&transcode_request(AudioFormat::Mp3, AudioQuality::VeryHigh)));
        let joined = args.join(" ");
        assert!(joined.contains("-i /tmp/job/raw.webm"));
        assert!(joined.contains("-codec:a libmp3lame -b:a 320k"));
        assert!(joined.ends_with("-ar 44100 -ac 2 -y /tmp/job/converted.out"));
    }

    #[test]
    fn codec_table_matches_formats() {
        assert_eq!(codec_args(AudioFormat::M4a, AudioQuality::Low), ["-codec:a", "aac", "-b:a", "128k"]);
        assert_eq!(codec_args(AudioFormat::Flac, AudioQuality::Low), ["-codec:a", "flac", "-compression_level", "8"]);
        assert_eq!(codec_args(AudioFormat::Wav, AudioQuality::High), ["-codec:a", "pcm_s16le"]);
        assert_eq!(codec_args(AudioFormat::Ogg, AudioQuality::Low), ["-codec:a", "libvorbis", "-q:a", "3"]);
        assert_eq!(codec_args(AudioFormat::Ogg, AudioQuality::VeryHigh)[3], "9");
    }

    #[test]
    fn tag_args_with_artwork_map_picture_and_force_id3v23() {
        let mut song = Song::new("1", "Title", "Artist");
        song.album = Some("Album".to_string());
        let request = TagRequest {
            input: PathBuf::from("in.mp3"),
            output: PathBuf::from("out.mp3"),
            format: AudioFormat::Mp3,
            song,
            artwork: Some(PathBuf::from("cover.jpg")),
        };
        let joined = strings(&build_tag_args(&request)).join(" ");
        assert!(joined.contains("-i in.mp3 -i cover.jpg -c copy"));
        assert!(joined.contains("-metadata title=Title -metadata artist=Artist -metadata album=Album"));
        assert!(joined.contains("-map 0:0 -map 1:0"));
        assert!(joined.contains("-id3v2_version 3"));
        assert!(joined.ends_with("-y out.mp3"));
    }

    #[test]
    fn artwork_is_skipped_for_containers_without_cover_support() {
        let request = TagRequest {
            input: PathBuf::from("in.wav"),
            output: PathBuf::from("out.wav"),
            format: AudioFormat::Wav,
            song: Song::new("1", "Title", "Artist"),
            artwork: Some(PathBuf::from("cover.jpg")),
        };
        let args = strings(&build_tag_args(&request));
        assert!(!args.contains(&"cover.jpg".to_string()));
        assert!(!args.contains(&"-map".to_string()));
    }

    #[test]
    fn metadata_values_are_single_arguments() {
        let request = TagRequest {
            input: PathBuf::from("in.flac"),
            output: PathBuf::from("out.flac"),
            format: AudioFormat::Flac,
            song: Song::new("1", "Title With Spaces", "A & B"),
            artwork: None,
        };
        let args = strings(&build_tag_args(&request));
        assert!(args.contains(&"title=Title With Spaces".to_string()));
        assert!(args.contains(&"artist=A & B".to_string()));
    }
}
