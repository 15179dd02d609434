//! Canonical cache filename convention.
//!
//! `<song>_<artist>_<id>_normalized[_pending].<ext>` is the only persisted
//! playback state. Song and artist are sanitized so they never contain `_`,
//! which keeps the first two separators unambiguous even for ids that do.

use std::path::Path;

pub const NORMALIZED_MARKER: &str = "_normalized";
pub const PENDING_MARKER: &str = "_pending";
pub const DEFAULT_MEDIA_EXTENSION: &str = "mp4";
pub const UNKNOWN_SONG: &str = "Unknown Title";

const MAX_COMPONENT_CHARS: usize = 80;
const ILLEGAL_FILENAME_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

pub const MEDIA_EXTENSIONS: [&str; 5] = ["mp4", "mkv", "webm", "mov", "m4a"];

/// Fields recovered from a canonical filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCacheName {
    pub song: String,
    pub artist: String,
    pub id: String,
    pub pending: bool,
    pub extension: String,
}

fn collapse_repeated(value: &str, separator: char) -> String {
    let mut collapsed = String::with_capacity(value.len());
    let mut previous_was_separator = false;
    for ch in value.chars() {
        if ch == separator {
            if !previous_was_separator {
                collapsed.push(ch);
            }
            previous_was_separator = true;
        } else {
            collapsed.push(ch);
            previous_was_separator = false;
        }
    }
    collapsed
}

/// Makes one song/artist component safe for every common filesystem.
pub fn sanitize_component(value: &str, fallback: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|ch| {
            if ILLEGAL_FILENAME_CHARS.contains(&ch) || ch.is_control() || ch == '_' {
                ' '
            } else {
                ch
            }
        })
        .collect();
    let spaced = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let dashed = collapse_repeated(&collapse_repeated(&spaced, '-'), '.');
    let capped: String = dashed.chars().take(MAX_COMPONENT_CHARS).collect();
    let trimmed = capped.trim_matches(|ch: char| ch == '.' || ch == ' ' || ch == '-');
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Ids come from the catalog and only need path separators neutralized.
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|ch| {
            if ILLEGAL_FILENAME_CHARS.contains(&ch) || ch.is_control() {
                '-'
            } else {
                ch
            }
        })
        .collect()
}

pub fn canonical_file_name(
    song: &str,
    artist: &str,
    id: &str,
    pending: bool,
    extension: &str,
) -> String {
    let song = sanitize_component(song, UNKNOWN_SONG);
    let artist = sanitize_component(artist, crate::metadata::UNKNOWN_ARTIST);
    let marker = if pending { PENDING_MARKER } else { "" };
    let extension = extension.trim_start_matches('.');
    format!(
        "{song}_{artist}_{}{NORMALIZED_MARKER}{marker}.{extension}",
        sanitize_id(id)
    )
}

pub fn is_media_extension(extension: &str) -> bool {
    MEDIA_EXTENSIONS
        .iter()
        .any(|supported| extension.eq_ignore_ascii_case(supported))
}

/// Parses a canonical filename back into its fields; `None` for anything else.
pub fn parse_cache_file_name(file_name: &str) -> Option<ParsedCacheName> {
    let path = Path::new(file_name);
    let extension = path.extension()?.to_str()?.to_string();
    if !is_media_extension(&extension) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;

    let (stem, pending) = match stem.strip_suffix(PENDING_MARKER) {
        Some(stripped) => (stripped, true),
        None => (stem, false),
    };
    let stem = stem.strip_suffix(NORMALIZED_MARKER)?;

    let mut parts = stem.splitn(3, '_');
    let song = parts.next()?.trim();
    let artist = parts.next()?.trim();
    let id = parts.next()?.trim();
    if song.is_empty() || artist.is_empty() || id.is_empty() {
        return None;
    }

    Some(ParsedCacheName {
        song: song.to_string(),
        artist: artist.to_string(),
        id: id.to_string(),
        pending,
        extension,
    })
}

#[cfg(test)]
mod tests {
    use super::{canonical_file_name, parse_cache_file_name, sanitize_component};

    #[test]
    fn test_canonical_name_includes_markers() {
        assert_eq!(
            canonical_file_name("Song", "Artist", "abc123", false, "mp4"),
            "Song_Artist_abc123_normalized.mp4"
        );
        assert_eq!(
            canonical_file_name("Song", "Artist", "abc123", true, ".mp4"),
            "Song_Artist_abc123_normalized_pending.mp4"
        );
    }

    #[test]
    fn test_sanitize_strips_illegal_characters_and_collapses_separators() {
        assert_eq!(
            sanitize_component("AC/DC: Back  in -- Black?", "x"),
            "AC DC Back in - Black"
        );
        assert_eq!(sanitize_component("snake_case_title", "x"), "snake case title");
        assert_eq!(sanitize_component("...", "fallback"), "fallback");
        assert_eq!(sanitize_component(&"a".repeat(200), "x").chars().count(), 80);
    }

    #[test]
    fn test_parse_recovers_fields_for_ids_with_underscores() {
        let name = canonical_file_name("My Song", "The Band", "a_b-c_D1", true, "mp4");
        let parsed = parse_cache_file_name(&name).expect("canonical name should parse");
        assert_eq!(parsed.song, "My Song");
        assert_eq!(parsed.artist, "The Band");
        assert_eq!(parsed.id, "a_b-c_D1");
        assert!(parsed.pending);
        assert_eq!(parsed.extension, "mp4");
    }

    #[test]
    fn test_parse_rejects_non_canonical_names() {
        assert!(parse_cache_file_name("random.mp4").is_none());
        assert!(parse_cache_file_name("Song_Artist_id.mp4").is_none());
        assert!(parse_cache_file_name("Song_Artist_id_normalized.part").is_none());
        assert!(parse_cache_file_name("Song_id_normalized.mp4").is_none());
    }
}
