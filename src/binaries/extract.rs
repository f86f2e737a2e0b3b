use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use crate::errors::{AppError, Result};

const UNIX_FILE_TYPE_MASK: u32 = 0o170000;
const UNIX_SYMLINK: u32 = 0o120000;

/// How a downloaded artifact packages its executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    /// The download is the executable itself.
    Plain,
    Zip,
    /// Zip-based platform package carrying native binaries under `jni/`.
    PlatformPackage,
    TarGz,
    TarXz,
}

impl ContainerFormat {
    pub fn from_url(url: &str) -> Self {
        let path = url::Url::parse(url)
            .map(|u| u.path().to_lowercase())
            .unwrap_or_else(|_| url.to_lowercase());

        if path.ends_with(".tar.xz") || path.ends_with(".txz") {
            ContainerFormat::TarXz
        } else if path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            ContainerFormat::TarGz
        } else if path.ends_with(".aar") || path.ends_with(".apk") {
            ContainerFormat::PlatformPackage
        } else if path.ends_with(".zip") || path.ends_with("/zip") {
            ContainerFormat::Zip
        } else {
            ContainerFormat::Plain
        }
    }

    /// Pulls the member named `member_hint` out of `archive` into `dest`.
    /// Blocking; run it on a blocking thread.
    pub fn extract_single_file(&self, archive: &Path, member_hint: &str, dest: &Path) -> Result<PathBuf> {
        match self {
            ContainerFormat::Plain => {
                if archive != dest {
                    std::fs::copy(archive, dest)?;
                }
                Ok(dest.to_path_buf())
            }
            ContainerFormat::Zip => extract_from_zip(archive, member_hint, dest, false),
            ContainerFormat::PlatformPackage => extract_from_zip(archive, member_hint, dest, true),
            ContainerFormat::TarGz => {
                let decoder = flate2::read::GzDecoder::new(File::open(archive)?);
                extract_from_tar(decoder, member_hint, dest)
            }
            ContainerFormat::TarXz => {
                let decoder = xz2::read::XzDecoder::new(File::open(archive)?);
                extract_from_tar(decoder, member_hint, dest)
            }
        }
    }
}

fn basename_matches(entry_name: &str, member_hint: &str) -> bool {
    let normalized = entry_name.replace('\\', "/");
    let basename = normalized.rsplit('/').next().unwrap_or(&normalized);
    basename.eq_ignore_ascii_case(member_hint)
}

fn write_member<R: Read>(reader: &mut R, dest: &Path) -> Result<PathBuf> {
    let mut out = File::create(dest)?;
    io::copy(reader, &mut out)?;
    out.sync_all()?;
    Ok(dest.to_path_buf())
}

fn extract_from_zip(archive: &Path, member_hint: &str, dest: &Path, jni_only: bool) -> Result<PathBuf> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;

    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        if let Some(mode) = file.unix_mode() {
            if mode & UNIX_FILE_TYPE_MASK == UNIX_SYMLINK {
                continue;
            }
        }
        let name = file.name().replace('\\', "/");
        if jni_only && !name.starts_with("jni/") {
            continue;
        }
        if basename_matches(&name, member_hint) {
            log::info!("📦 [PROVISION] Extracting {} from {:?}", name, archive);
            return write_member(&mut file, dest);
        }
    }

    Err(AppError::Extraction(format!(
        "{} not found in archive {}",
        member_hint,
        archive.display()
    )))
}

fn extract_from_tar<R: Read>(decoder: R, member_hint: &str, dest: &Path) -> Result<PathBuf> {
    let mut ar = tar::Archive::new(decoder);

    for entry in ar.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().into_owned();
        if basename_matches(&name, member_hint) {
            log::info!("📦 [PROVISION] Extracting {} from tar archive", name);
            return write_member(&mut entry, dest);
        }
    }

    Err(AppError::Extraction(format!("{} not found in tar archive", member_hint)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn format_follows_url_suffix() {
        assert_eq!(
            ContainerFormat::from_url("https://github.com/BtbN/FFmpeg-Builds/releases/download/latest/ffmpeg-master-latest-linux64-gpl.tar.xz"),
            ContainerFormat::TarXz
        );
        assert_eq!(ContainerFormat::from_url("https://example.com/ffmpeg.zip?dl=1"), ContainerFormat::Zip);
        assert_eq!(ContainerFormat::from_url("https://example.com/ffmpeg-kit.aar"), ContainerFormat::PlatformPackage);
        assert_eq!(ContainerFormat::from_url("https://example.com/a.tgz"), ContainerFormat::TarGz);
        assert_eq!(ContainerFormat::from_url("https://evermeet.cx/ffmpeg/getrelease/zip"), ContainerFormat::Zip);
        assert_eq!(
            ContainerFormat::from_url("https://github.com/yt-dlp/yt-dlp/releases/latest/download/yt-dlp_linux"),
            ContainerFormat::Plain
        );
    }

    #[test]
    fn zip_member_is_found_by_basename() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("tools.zip");
        {
            let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
            let options = zip::write::FileOptions::default();
            writer.start_file("ffmpeg-7.0/doc/readme.txt", options).unwrap();
            writer.write_all(b"docs").unwrap();
            writer.start_file("ffmpeg-7.0/bin/ffmpeg", options).unwrap();
            writer.write_all(b"#!/bin/sh\necho ffmpeg\n").unwrap();
            writer.finish().unwrap();
        }

        let dest = dir.path().join("ffmpeg");
        ContainerFormat::Zip.extract_single_file(&archive, "ffmpeg", &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"#!/bin/sh\necho ffmpeg\n");
    }

    #[test]
    fn platform_package_only_considers_jni_members() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("kit.aar");
        {
            let mut writer = zip::ZipWriter::new(File::create(&archive).unwrap());
            let options = zip::write::FileOptions::default();
            writer.start_file("assets/libffmpeg.so", options).unwrap();
            writer.write_all(b"wrong").unwrap();
            writer.start_file("jni/arm64-v8a/libffmpeg.so", options).unwrap();
            writer.write_all(b"right").unwrap();
            writer.finish().unwrap();
        }

        let dest = dir.path().join("libffmpeg.so");
        ContainerFormat::PlatformPackage
            .extract_single_file(&archive, "libffmpeg.so", &dest)
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"right");
    }

    #[test]
    fn tar_gz_member_is_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("ffmpeg.tar.gz");
        {
            let encoder = flate2::write::GzEncoder::new(
                File::create(&archive).unwrap(),
                flate2::Compression::default(),
            );
            let mut builder = tar::Builder::new(encoder);
            let payload = b"binary";
            let mut header = tar::Header::new_gnu();
            header.set_size(payload.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder
                .append_data(&mut header, "ffmpeg-static/ffmpeg", &payload[..])
                .unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }

        let dest = dir.path().join("ffmpeg");
        ContainerFormat::TarGz.extract_single_file(&archive, "ffmpeg", &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"binary");
    }

    #[test]
    fn missing_member_is_an_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("empty.zip");
        zip::ZipWriter::new(File::create(&archive).unwrap()).finish().unwrap();

        let err = ContainerFormat::Zip
            .extract_single_file(&archive, "ffmpeg", &dir.path().join("ffmpeg"))
            .unwrap_err();
        assert!(matches!(err, AppError::Extraction(_)));
    }
}
