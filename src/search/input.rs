use crate::errors::{AppError, Result};

/// What a user typed on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SongInput {
    /// `open.spotify.com/track/...` or `spotify:track:...`
    CatalogUrl(String),
    /// youtube.com, youtu.be or music.youtube.com
    ContentUrl(String),
    Query(String),
}

const CONTENT_HOSTS: [&str; 4] = ["youtube.com", "www.youtube.com", "m.youtube.com", "music.youtube.com"];

pub fn classify_input(raw: &str) -> Result<SongInput> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::Validation("Empty input".to_string()));
    }
    if raw.starts_with("spotify:") {
        return Ok(SongInput::CatalogUrl(raw.to_string()));
    }

    let looks_like_url = raw.starts_with("http://") || raw.starts_with("https://");
    if !looks_like_url {
        return Ok(SongInput::Query(raw.to_string()));
    }

    let url = url::Url::parse(raw).map_err(|e| AppError::Validation(format!("Invalid URL {}: {}", raw, e)))?;
    let host = url.host_str().unwrap_or_default().to_lowercase();

    if host == "open.spotify.com" {
        Ok(SongInput::CatalogUrl(raw.to_string()))
    } else if host == "youtu.be" || CONTENT_HOSTS.contains(&host.as_str()) {
        Ok(SongInput::ContentUrl(raw.to_string()))
    } else {
        Err(AppError::Validation(format!("Unsupported URL host: {}", host)))
    }
}
