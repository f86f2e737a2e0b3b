use log::info;
use crate::api::Song;
use crate::errors::Result;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Separators recognised between artist and title in video titles.
const TITLE_SEPARATORS: [&str; 4] = [" - ", ": ", " – ", " | "];

/// Sanitizes a filename by removing invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Applies `{artist}`, `{title}`, `{album}` and `{year}` to the template and
/// returns a sanitized file stem (no extension).
pub fn render_filename(template: &str, song: &Song) -> String {
    let rendered = template
        .replace("{artist}", &song.artist)
        .replace("{title}", &song.title)
        .replace("{album}", song.album.as_deref().unwrap_or(UNKNOWN_ALBUM))
        .replace("{year}", song.year.as_deref().unwrap_or(""));

    let sanitized = sanitize_filename(rendered.trim());
    // Leading dots would produce hidden files.
    let sanitized = sanitized.trim_start_matches('.').trim();
    if sanitized.is_empty() {
        "untitled".to_string()
    } else {
        sanitized.to_string()
    }
}

/// Splits "Artist - Title" style strings on the first recognised separator.
/// Without a separator the whole string is the title.
pub fn parse_title(raw: &str) -> (String, String) {
    let raw = raw.trim();
    let first = TITLE_SEPARATORS
        .iter()
        .filter_map(|sep| raw.find(sep).map(|idx| (idx, *sep)))
        .min_by_key(|(idx, _)| *idx);

    if let Some((idx, sep)) = first {
        let artist = raw[..idx].trim();
        let title = raw[idx + sep.len()..].trim();
        if !artist.is_empty() && !title.is_empty() {
            return (artist.to_string(), title.to_string());
        }
    }

    (UNKNOWN_ARTIST.to_string(), raw.to_string())
}

/// Parses `HH:MM:SS` or `MM:SS` into seconds. Anything malformed is zero.
pub fn parse_duration(raw: &str) -> u32 {
    let parts: Vec<&str> = raw.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return 0;
    }

    let mut total: u32 = 0;
    for part in parts {
        match part.trim().parse::<u32>() {
            Ok(value) => total = total.saturating_mul(60).saturating_add(value),
            Err(_) => return 0,
        }
    }
    total
}

/// Creates a directory if it doesn't exist
pub async fn ensure_dir_exists(path: &std::path::Path) -> Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

/// Generates a unique ID for downloads
pub fn generate_download_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_names_contain_no_reserved_characters() {
        let name = sanitize_filename(r#"AC/DC: "Back\In*Black"? <live> |1980|"#);
        for c in ['\\', '/', ':', '*', '?', '"', '<', '>', '|'] {
            assert!(!name.contains(c), "{} still contains {}", name, c);
        }
        assert_eq!(sanitize_filename("a\tb"), "a_b");
    }

    #[test]
    fn template_tokens_are_substituted() {
        let mut song = Song::new("1", "Title/Part", "Artist");
        song.album = Some("Album".to_string());
        song.year = Some("2001".to_string());

        assert_eq!(render_filename("{artist} - {title}", &song), "Artist - Title_Part");
        assert_eq!(render_filename("{year} {album} {title}", &song), "2001 Album Title_Part");
    }

    #[test]
    fn missing_album_uses_placeholder() {
        let song = Song::new("1", "Title", "Artist");
        assert_eq!(render_filename("{album}/{title}", &song), "Unknown Album_Title");
        assert_eq!(render_filename("{year}", &song), "untitled");
    }

    #[test]
    fn title_splits_on_first_separator() {
        assert_eq!(parse_title("Artist - Title"), ("Artist".to_string(), "Title".to_string()));
        assert_eq!(parse_title("A: B: C"), ("A".to_string(), "B: C".to_string()));
        assert_eq!(
            parse_title("NoSeparatorTitle"),
            (UNKNOWN_ARTIST.to_string(), "NoSeparatorTitle".to_string())
        );
    }

    #[test]
    fn earliest_separator_wins_regardless_of_kind() {
        assert_eq!(parse_title("Band | Song - Live"), ("Band".to_string(), "Song - Live".to_string()));
        assert_eq!(parse_title("X – Y"), ("X".to_string(), "Y".to_string()));
    }

    #[test]
    fn durations_parse_left_to_right() {
        assert_eq!(parse_duration("03:45"), 225);
        assert_eq!(parse_duration("01:02:03"), 3723);
        assert_eq!(parse_duration("42"), 42);
        assert_eq!(parse_duration("garbage"), 0);
        assert_eq!(parse_duration("1:2:3:4"), 0);
        assert_eq!(parse_duration(""), 0);
    }

    #[test]
    fn download_ids_are_unique() {
        assert_ne!(generate_download_id(), generate_download_id());
    }
}
