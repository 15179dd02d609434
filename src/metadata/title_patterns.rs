//! Deterministic song/artist extraction from free-form video titles.

use crate::metadata::title_cleaning::clean_title;
use crate::metadata::UNKNOWN_ARTIST;

/// `Song <sep> Artist` separators, tried in order. The first one that yields
/// two non-empty sides wins.
const SONG_FIRST_SEPARATORS: [&str; 5] = [" - ", " – ", " — ", "|", "//"];

const OPENING_QUOTES: [char; 2] = ['"', '“'];
const CLOSING_QUOTES: [char; 2] = ['"', '”'];

fn non_empty_pair(song: &str, artist: &str) -> Option<(String, String)> {
    let song = song.trim();
    let artist = artist.trim();
    if song.is_empty() || artist.is_empty() {
        None
    } else {
        Some((song.to_string(), artist.to_string()))
    }
}

fn split_separator(title: &str) -> Option<(String, String)> {
    SONG_FIRST_SEPARATORS.iter().find_map(|separator| {
        let (song, artist) = title.split_once(separator)?;
        non_empty_pair(song, artist)
    })
}

/// Splits `"quoted" rest` into the quoted text and what follows it.
fn leading_quoted(value: &str) -> Option<(&str, &str)> {
    let rest = value.strip_prefix(OPENING_QUOTES)?;
    let close = rest.find(CLOSING_QUOTES)?;
    let quote_len = rest[close..].chars().next()?.len_utf8();
    Some((&rest[..close], &rest[close + quote_len..]))
}

/// `"Song" by Artist`
fn split_quoted_by(title: &str) -> Option<(String, String)> {
    let (song, tail) = leading_quoted(title)?;
    let tail = tail.trim_start();
    if !tail.to_ascii_lowercase().starts_with("by ") {
        return None;
    }
    non_empty_pair(song, &tail[3..])
}

/// `Artist: "Song"`. Unquoted colons are usually subtitles, so they stay put.
fn split_colon_quoted(title: &str) -> Option<(String, String)> {
    let (artist, rest) = title.split_once(": ")?;
    let (song, tail) = leading_quoted(rest.trim_start())?;
    if !tail.trim().is_empty() {
        return None;
    }
    non_empty_pair(song, artist)
}

/// Splits a raw title into `(song, artist)`; never fails.
///
/// Annotations are removed before splitting so they cannot end up on the
/// performer side. Titles with no recognized convention keep their text as the
/// song and get [`UNKNOWN_ARTIST`].
pub fn split_title(raw_title: &str) -> (String, String) {
    let title = clean_title(raw_title);
    split_separator(&title)
        .or_else(|| split_quoted_by(&title))
        .or_else(|| split_colon_quoted(&title))
        .unwrap_or_else(|| (title.clone(), UNKNOWN_ARTIST.to_string()))
}
