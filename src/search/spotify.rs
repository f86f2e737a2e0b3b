use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use crate::api::Song;
use crate::config::SpotifyCredentials;
use crate::errors::{AppError, Result};
use crate::search::ContentResolver;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Catalog backend. Songs it returns carry catalog metadata and a
/// `source_url` but never a fetch URL.
pub struct SpotifyResolver {
    client: Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl SpotifyResolver {
    /// `None` when the credentials are incomplete.
    pub fn new(client: Client, credentials: &SpotifyCredentials) -> Option<Self> {
        if !credentials.is_configured() {
            return None;
        }
        Some(Self {
            client,
            client_id: credentials.client_id.clone().unwrap_or_default(),
            client_secret: credentials.client_secret.clone().unwrap_or_default(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let basic = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.client_id, self.client_secret));
        let response = self
            .client
            .post(TOKEN_URL)
            .header("Authorization", format!("Basic {}", basic))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Network(format!("Token request failed: {}", response.status())));
        }

        let json: Value = response.json().await?;
        let value = json["access_token"]
            .as_str()
            .ok_or_else(|| AppError::Network("Token response without access_token".to_string()))?
            .to_string();
        let expires_in = json["expires_in"].as_u64().unwrap_or(3600);
        // Refresh a minute early.
        let expires_at = Instant::now() + Duration::from_secs(expires_in.saturating_sub(60));

        log::debug!("🔑 [RESOLVE] Obtained catalog token valid for {}s", expires_in);
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at,
        });
        Ok(value)
    }

    async fn get_json(&self, url: &str) -> Result<Option<Value>> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(AppError::Network(format!("Catalog request failed: {}", response.status())));
        }
        Ok(Some(response.json().await?))
    }

    async fn try_track(&self, id: &str) -> Result<Option<Song>> {
        let url = format!("{}/tracks/{}", API_BASE, id);
        Ok(self.get_json(&url).await?.as_ref().and_then(song_from_track_json))
    }

    async fn try_search(&self, query: &str) -> Result<Option<Song>> {
        let url = format!(
            "{}/search?q={}&type=track&limit=1",
            API_BASE,
            urlencoding::encode(query)
        );
        let Some(json) = self.get_json(&url).await? else {
            return Ok(None);
        };
        Ok(json["tracks"]["items"]
            .as_array()
            .and_then(|items| items.first())
            .and_then(song_from_track_json))
    }
}

/// Track id from `open.spotify.com/track/<id>` links or `spotify:track:<id>` URIs.
pub fn extract_track_id(input: &str) -> Option<String> {
    let input = input.trim();
    if let Some(rest) = input.strip_prefix("spotify:track:") {
        return Some(rest.to_string()).filter(|id| !id.is_empty());
    }

    let url = url::Url::parse(input).ok()?;
    let mut segments = url.path_segments()?;
    while let Some(segment) = segments.next() {
        if segment == "track" {
            return segments.next().filter(|id| !id.is_empty()).map(str::to_string);
        }
    }
    None
}

pub fn song_from_track_json(track: &Value) -> Option<Song> {
    let id = track["id"].as_str()?;
    let title = track["name"].as_str()?;
    let artists: Vec<&str> = track["artists"]
        .as_array()
        .map(|arr| arr.iter().filter_map(|artist| artist["name"].as_str()).collect())
        .unwrap_or_default();
    let artist = if artists.is_empty() {
        crate::utils::UNKNOWN_ARTIST.to_string()
    } else {
        artists.join(", ")
    };

    let mut song = Song::new(id, title, artist);
    song.album = track["album"]["name"].as_str().map(str::to_string);
    song.year = track["album"]["release_date"]
        .as_str()
        .and_then(|date| date.split('-').next())
        .filter(|year| !year.is_empty())
        .map(str::to_string);
    song.isrc = track["external_ids"]["isrc"].as_str().map(str::to_string);
    song.artwork_url = track["album"]["images"]
        .as_array()
        .and_then(|images| images.first())
        .and_then(|image| image["url"].as_str())
        .map(str::to_string);
    song.duration_seconds = track["duration_ms"].as_u64().map(|ms| (ms / 1000) as u32);
    song.source_url = track["external_urls"]["spotify"]
        .as_str()
        .map(str::to_string)
        .or_else(|| Some(format!("https://open.spotify.com/track/{}", id)));
    Some(song)
}

#[async_trait]
impl ContentResolver for SpotifyResolver {
    fn name(&self) -> &str {
        "spotify"
    }

    async fn resolve_by_query(&self, query: &str) -> Option<Song> {
        self.try_search(query).await.unwrap_or_else(|e| {
            log::warn!("⚠️ [RESOLVE] Catalog search for '{}' failed: {}", query, e);
            None
        })
    }

    async fn resolve_by_url(&self, url: &str) -> Option<Song> {
        let Some(id) = extract_track_id(url) else {
            log::warn!("⚠️ [RESOLVE] Not a catalog track link: {}", url);
            return None;
        };
        self.try_track(&id).await.unwrap_or_else(|e| {
            log::warn!("⚠️ [RESOLVE] Catalog lookup for {} failed: {}", id, e);
            None
        })
    }
}
