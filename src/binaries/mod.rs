pub mod checksum;
pub mod extract;
pub mod manager;
pub mod store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::errors::{AppError, Result};
pub use checksum::ChecksumAlgorithm;
pub use extract::ContainerFormat;
pub use manager::BinaryManager;

pub const YTDLP: &str = "yt-dlp";
pub const FFMPEG: &str = "ffmpeg";

/// A downloadable external tool and where to get it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BinaryInfo {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    pub required: bool,
    pub download_url: String,
    /// Mirrors tried in order after `download_url` fails.
    pub alternative_urls: Vec<String>,
    pub checksum: Option<String>,
    pub checksum_algorithm: ChecksumAlgorithm,
    pub size_hint: u64,
    pub architecture: String,
}

impl BinaryInfo {
    /// Primary URL followed by the mirrors.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.download_url.as_str()).chain(self.alternative_urls.iter().map(String::as_str))
    }

    /// File name of the executable inside archives and in the binary directory.
    pub fn file_name(&self) -> String {
        format!("{}{}", self.name, std::env::consts::EXE_SUFFIX)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BinaryStatus {
    NotInstalled,
    Downloading,
    Extracting,
    Verifying,
    Installed,
    UpdateAvailable,
    Failed,
    Outdated,
}

impl BinaryStatus {
    pub fn is_busy(&self) -> bool {
        matches!(self, BinaryStatus::Downloading | BinaryStatus::Extracting | BinaryStatus::Verifying)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BinaryState {
    pub info: BinaryInfo,
    pub status: BinaryStatus,
    pub installed_version: Option<String>,
    pub progress: f32,
    pub error: Option<String>,
}

impl BinaryState {
    pub fn new(info: BinaryInfo, status: BinaryStatus) -> Self {
        Self {
            info,
            status,
            installed_version: None,
            progress: 0.0,
            error: None,
        }
    }
}

/// Executables a download pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub fetch_tool: PathBuf,
    pub transcode_tool: PathBuf,
}

/// Makes the fetch and transcode tools available, installing them if needed.
#[async_trait]
pub trait ToolProvisioning: Send + Sync {
    async fn ensure_tools(&self) -> Result<ToolPaths>;
}

/// Fixed executables, e.g. from `ffmpeg_path`/`ytdlp_path` overrides.
pub struct StaticTools {
    paths: ToolPaths,
}

impl StaticTools {
    pub fn new(fetch_tool: impl Into<PathBuf>, transcode_tool: impl Into<PathBuf>) -> Self {
        Self {
            paths: ToolPaths {
                fetch_tool: fetch_tool.into(),
                transcode_tool: transcode_tool.into(),
            },
        }
    }
}

#[async_trait]
impl ToolProvisioning for StaticTools {
    async fn ensure_tools(&self) -> Result<ToolPaths> {
        for path in [&self.paths.fetch_tool, &self.paths.transcode_tool] {
            if path.is_absolute() && !path.exists() {
                return Err(AppError::NotFound(format!("Configured tool {} does not exist", path.display())));
            }
        }
        Ok(self.paths.clone())
    }
}

fn ghproxy(url: &str) -> String {
    format!("https://ghproxy.com/{}", url)
}

pub fn ytdlp_info() -> BinaryInfo {
    let asset = match (std::env::consts::OS, std::env::consts::ARCH) {
        ("windows", _) => "yt-dlp.exe",
        ("macos", _) => "yt-dlp_macos",
        ("linux", "aarch64") => "yt-dlp_linux_aarch64",
        _ => "yt-dlp_linux",
    };
    let primary = format!("https://github.com/yt-dlp/yt-dlp/releases/latest/download/{}", asset);

    BinaryInfo {
        name: YTDLP.to_string(),
        display_name: "yt-dlp".to_string(),
        description: "Audio and video extractor used to fetch sources".to_string(),
        version: "latest".to_string(),
        required: true,
        alternative_urls: vec![
            ghproxy(&primary),
            "https://cdn.jsdelivr.net/gh/yt-dlp/yt-dlp@master/yt-dlp".to_string(),
        ],
        download_url: primary,
        checksum: None,
        checksum_algorithm: ChecksumAlgorithm::Sha256,
        size_hint: 35_000_000,
        architecture: std::env::consts::ARCH.to_string(),
    }
}

fn ffmpeg_urls() -> (String, Vec<String>) {
    match (std::env::consts::OS, std::env::consts::ARCH) {
        ("windows", _) => {
            let primary = "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-win64-gpl.zip".to_string();
            let alternatives = vec![
                ghproxy(&primary),
                "https://www.gyan.dev/ffmpeg/builds/ffmpeg-release-essentials.zip".to_string(),
            ];
            (primary, alternatives)
        }
        ("macos", _) => ("https://evermeet.cx/ffmpeg/getrelease/zip".to_string(), Vec::new()),
        ("linux", "aarch64") => {
            let primary = "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-linuxarm64-gpl.tar.xz".to_string();
            let alternatives = vec![
                ghproxy(&primary),
                "https://johnvansickle.com/ffmpeg/releases/ffmpeg-release-arm64-static.tar.xz".to_string(),
            ];
            (primary, alternatives)
        }
        _ => {
            let primary = "https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-linux64-gpl.tar.xz".to_string();
            let alternatives = vec![
                ghproxy(&primary),
                "https://johnvansickle.com/ffmpeg/releases/ffmpeg-release-amd64-static.tar.xz".to_string(),
            ];
            (primary, alternatives)
        }
    }
}

pub fn ffmpeg_info() -> BinaryInfo {
    let (download_url, alternative_urls) = ffmpeg_urls();
    BinaryInfo {
        name: FFMPEG.to_string(),
        display_name: "FFmpeg".to_string(),
        description: "Audio conversion and tagging".to_string(),
        version: "latest".to_string(),
        required: true,
        download_url,
        alternative_urls,
        checksum: None,
        checksum_algorithm: ChecksumAlgorithm::Sha256,
        size_hint: 80_000_000,
        architecture: std::env::consts::ARCH.to_string(),
    }
}

/// Every binary known for the host platform. Catalogs may also carry
/// optional entries; these two are what the pipeline runs.
pub fn default_catalog() -> Vec<BinaryInfo> {
    vec![ytdlp_info(), ffmpeg_info()]
}
