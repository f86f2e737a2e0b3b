use serde::{Deserialize, Serialize};
use crate::utils::{parse_title, UNKNOWN_ARTIST};

/// Canonical song record produced by a resolver.
///
/// Songs are values: attaching a resolved fetch URL produces a new `Song`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub isrc: Option<String>,
    pub artwork_url: Option<String>,
    /// Content-provider page, e.g. a catalog track link.
    pub source_url: Option<String>,
    /// Streamable content URL understood by the fetch tool.
    pub fetch_url: Option<String>,
    pub duration_seconds: Option<u32>,
}

impl Song {
    pub fn new(id: impl Into<String>, title: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            album: None,
            year: None,
            genre: None,
            isrc: None,
            artwork_url: None,
            source_url: None,
            fetch_url: None,
            duration_seconds: None,
        }
    }

    /// Builds a song from a raw video title, splitting "Artist - Title" when
    /// no explicit artist is known.
    pub fn from_video_title(id: impl Into<String>, raw_title: &str, artist: Option<&str>) -> Self {
        match artist.map(str::trim).filter(|a| !a.is_empty()) {
            Some(artist) => Self::new(id, raw_title.trim(), artist),
            None => {
                let (artist, title) = parse_title(raw_title);
                Self::new(id, title, artist)
            }
        }
    }

    pub fn with_fetch_url(&self, fetch_url: impl Into<String>) -> Self {
        Self {
            fetch_url: Some(fetch_url.into()),
            ..self.clone()
        }
    }

    /// Combines this song with a content-search hit: the hit supplies the
    /// fetch URL and fills any field this record lacks.
    pub fn merge_resolved(&self, resolved: &Song) -> Self {
        let mut merged = self.clone();
        merged.fetch_url = resolved.fetch_url.clone().or_else(|| self.fetch_url.clone());

        if merged.artist.is_empty() || merged.artist == UNKNOWN_ARTIST {
            merged.artist = resolved.artist.clone();
            if !resolved.title.is_empty() {
                merged.title = resolved.title.clone();
            }
        }
        merged.album = merged.album.or_else(|| resolved.album.clone());
        merged.year = merged.year.or_else(|| resolved.year.clone());
        merged.genre = merged.genre.or_else(|| resolved.genre.clone());
        merged.isrc = merged.isrc.or_else(|| resolved.isrc.clone());
        merged.artwork_url = merged.artwork_url.or_else(|| resolved.artwork_url.clone());
        merged.source_url = merged.source_url.or_else(|| resolved.source_url.clone());
        merged.duration_seconds = merged.duration_seconds.or(resolved.duration_seconds);
        merged
    }

    /// Free-text query used to look this song up on a content-search service.
    pub fn search_query(&self) -> String {
        if self.artist.is_empty() || self.artist == UNKNOWN_ARTIST {
            self.title.clone()
        } else {
            format!("{} {}", self.artist, self.title)
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}
