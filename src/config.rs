use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use crate::errors::{AppError, Result};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub download_path: PathBuf,
    pub max_concurrent_downloads: usize,
    pub preferred_quality: AudioQuality,
    pub preferred_format: AudioFormat,
    pub enable_metadata: bool,
    pub enable_cover_art: bool,
    pub filename_template: String,
    pub proxy: Option<String>,
    pub binary_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// When both are set, provisioning is skipped and these executables are used.
    pub ffmpeg_path: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
    pub spotify: SpotifyCredentials,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SpotifyCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl SpotifyCredentials {
    pub fn is_configured(&self) -> bool {
        matches!((&self.client_id, &self.client_secret), (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AudioQuality {
    Low,      // 128 kbps
    Medium,   // 192 kbps
    High,     // 256 kbps
    VeryHigh, // 320 kbps
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Mp3,
    M4a,
    Flac,
    Wav,
    Ogg,
}

impl AudioQuality {
    pub fn bitrate(&self) -> &'static str {
        match self {
            AudioQuality::Low => "128k",
            AudioQuality::Medium => "192k",
            AudioQuality::High => "256k",
            AudioQuality::VeryHigh => "320k",
        }
    }

    /// Vorbis `-q:a` index for this tier.
    pub fn vorbis_quality(&self) -> &'static str {
        match self {
            AudioQuality::Low => "3",
            AudioQuality::Medium => "5",
            AudioQuality::High => "7",
            AudioQuality::VeryHigh => "9",
        }
    }
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Flac => "flac",
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::M4a => "audio/mp4",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Ogg => "audio/ogg",
        }
    }

    /// Containers that can carry an attached cover picture.
    pub fn supports_cover_art(&self) -> bool {
        matches!(self, AudioFormat::Mp3 | AudioFormat::M4a | AudioFormat::Flac)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.extension().to_uppercase())
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "m4a" | "aac" => Ok(AudioFormat::M4a),
            "flac" => Ok(AudioFormat::Flac),
            "wav" => Ok(AudioFormat::Wav),
            "ogg" | "vorbis" => Ok(AudioFormat::Ogg),
            other => Err(format!("unsupported audio format: {}", other)),
        }
    }
}

impl FromStr for AudioQuality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "low" => Ok(AudioQuality::Low),
            "medium" => Ok(AudioQuality::Medium),
            "high" => Ok(AudioQuality::High),
            "very_high" | "best" => Ok(AudioQuality::VeryHigh),
            other => Err(format!("unsupported audio quality: {}", other)),
        }
    }
}

pub const DEFAULT_FILENAME_TEMPLATE: &str = "{artist} - {title}";

/// Per-job settings. Read-only for the lifetime of the job.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DownloadConfig {
    pub format: AudioFormat,
    pub quality: AudioQuality,
    pub embed_artwork: bool,
    pub embed_metadata: bool,
    pub output_directory: PathBuf,
    pub filename_template: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::Mp3,
            quality: AudioQuality::High,
            embed_artwork: true,
            embed_metadata: true,
            output_directory: PathBuf::new(),
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
        }
    }
}

impl DownloadConfig {
    /// Fills an empty output directory from `fallback` and rejects configs
    /// that cannot produce an output path.
    pub fn validated(mut self, fallback: Option<&Path>) -> Result<Self> {
        if self.output_directory.as_os_str().is_empty() {
            match fallback {
                Some(dir) if !dir.as_os_str().is_empty() => self.output_directory = dir.to_path_buf(),
                _ => {
                    return Err(AppError::Validation(
                        "Output directory is empty and no default is available".to_string(),
                    ))
                }
            }
        }
        if self.filename_template.trim().is_empty() {
            self.filename_template = DEFAULT_FILENAME_TEMPLATE.to_string();
        }
        Ok(self)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("spotdl");
        Self {
            download_path: dirs::audio_dir()
                .or_else(dirs::download_dir)
                .unwrap_or_else(|| PathBuf::from("./downloads")),
            max_concurrent_downloads: 3,
            preferred_quality: AudioQuality::High,
            preferred_format: AudioFormat::Mp3,
            enable_metadata: true,
            enable_cover_art: true,
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
            proxy: None,
            binary_dir: data_dir.join("bin"),
            temp_dir: std::env::temp_dir().join("spotdl"),
            ffmpeg_path: None,
            ytdlp_path: None,
            spotify: SpotifyCredentials::default(),
        }
    }
}

impl AppConfig {
    /// Loads the config file (creating it with defaults if missing) and
    /// overlays `SPOTDL__*` environment variables.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            AppConfig::default().save_to(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("SPOTDL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        if config.max_concurrent_downloads == 0 {
            return Err(AppError::Config(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(config_dir) = path.parent() {
            if !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?;

        Ok(config_dir.join("spotdl").join("config.json"))
    }

    pub fn download_config(&self) -> DownloadConfig {
        DownloadConfig {
            format: self.preferred_format,
            quality: self.preferred_quality,
            embed_artwork: self.enable_cover_art,
            embed_metadata: self.enable_metadata,
            output_directory: self.download_path.clone(),
            filename_template: self.filename_template.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_tiers_map_to_bitrates() {
        assert_eq!(AudioQuality::Low.bitrate(), "128k");
        assert_eq!(AudioQuality::VeryHigh.bitrate(), "320k");
        assert_eq!(AudioQuality::Medium.vorbis_quality(), "5");
    }

    #[test]
    fn formats_parse_from_user_input() {
        assert_eq!("MP3".parse::<AudioFormat>(), Ok(AudioFormat::Mp3));
        assert_eq!("vorbis".parse::<AudioFormat>(), Ok(AudioFormat::Ogg));
        assert!("aiff".parse::<AudioFormat>().is_err());
        assert_eq!("very-high".parse::<AudioQuality>(), Ok(AudioQuality::VeryHigh));
    }

    #[test]
    fn empty_output_directory_uses_fallback() {
        let config = DownloadConfig::default()
            .validated(Some(Path::new("/music")))
            .unwrap();
        assert_eq!(config.output_directory, PathBuf::from("/music"));
    }

    #[test]
    fn empty_output_directory_without_fallback_is_rejected() {
        let err = DownloadConfig::default().validated(None).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn config_round_trips_through_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.max_concurrent_downloads = 5;
        config.preferred_format = AudioFormat::Flac;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.preferred_format, AudioFormat::Flac);
        assert_eq!(loaded.download_config().format, AudioFormat::Flac);
    }

    #[test]
    fn partial_config_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "preferred_quality": "very_high" }"#).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.preferred_quality, AudioQuality::VeryHigh);
        assert_eq!(loaded.filename_template, DEFAULT_FILENAME_TEMPLATE);
        assert!(loaded.enable_metadata);
    }
}
