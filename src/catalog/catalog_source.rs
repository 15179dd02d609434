//! Remote playlist listing through the download tool's flat-playlist mode.

use log::debug;
use serde::Deserialize;

use crate::acquisition::media_tools::run_tool;
use crate::protocol::CatalogItem;

const PLAYLIST_URL_PREFIX: &str = "https://www.youtube.com/playlist?list=";
const UNAVAILABLE_TITLES: [&str; 2] = ["[Private video]", "[Deleted video]"];

/// One call returning the whole ordered playlist, or an error. Never partial.
pub trait CatalogSource: Send + Sync {
    fn fetch(&self, playlist: &str) -> Result<Vec<CatalogItem>, String>;
}

/// Accepts a full URL or a bare playlist id.
pub fn playlist_url(reference: &str) -> String {
    let reference = reference.trim();
    if reference.contains("://") {
        reference.to_string()
    } else {
        format!("{PLAYLIST_URL_PREFIX}{}", urlencoding::encode(reference))
    }
}

#[derive(Debug, Deserialize)]
struct FlatPlaylist {
    #[serde(default)]
    entries: Vec<Option<FlatEntry>>,
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Parses `yt-dlp -J --flat-playlist` output into ordered, de-duplicated items.
///
/// Entries without an id and unavailable (private/deleted) videos are skipped.
pub fn parse_flat_playlist(json: &str) -> Result<Vec<CatalogItem>, String> {
    let playlist: FlatPlaylist = serde_json::from_str(json)
        .map_err(|error| format!("invalid playlist JSON: {error}"))?;
    let mut items: Vec<CatalogItem> = Vec::with_capacity(playlist.entries.len());
    for entry in playlist.entries.into_iter().flatten() {
        let Some(id) = entry.id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty())
        else {
            continue;
        };
        let title = entry
            .title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| id.clone());
        if UNAVAILABLE_TITLES.contains(&title.as_str()) {
            debug!("CatalogSync: skipping unavailable entry {}", id);
            continue;
        }
        if items.iter().any(|item| item.id == id) {
            continue;
        }
        let position = items.len();
        items.push(CatalogItem { id, title, position });
    }
    Ok(items)
}

pub struct YtDlpCatalog {
    ytdlp_path: String,
}

impl YtDlpCatalog {
    pub fn new(ytdlp_path: &str) -> Self {
        Self {
            ytdlp_path: ytdlp_path.to_string(),
        }
    }
}

impl CatalogSource for YtDlpCatalog {
    fn fetch(&self, playlist: &str) -> Result<Vec<CatalogItem>, String> {
        let args = vec![
            "--flat-playlist".to_string(),
            "-J".to_string(),
            "--no-warnings".to_string(),
            playlist_url(playlist),
        ];
        let output = run_tool(&self.ytdlp_path, &args)?;
        if !output.success {
            return Err(format!(
                "playlist listing exited with {:?}: {}",
                output.exit_code,
                output.stderr_tail()
            ));
        }
        parse_flat_playlist(&output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_flat_playlist, playlist_url};

    #[test]
    fn test_playlist_url_expands_bare_ids() {
        assert_eq!(
            playlist_url(" PLabc123 "),
            "https://www.youtube.com/playlist?list=PLabc123"
        );
        assert_eq!(
            playlist_url("https://www.youtube.com/playlist?list=PLx"),
            "https://www.youtube.com/playlist?list=PLx"
        );
    }

    #[test]
    fn test_parse_flat_playlist_keeps_order_and_skips_bad_entries() {
        let json = r#"{
            "_type": "playlist",
            "id": "PLabc",
            "entries": [
                {"id": "a", "title": "First"},
                null,
                {"id": "", "title": "No id"},
                {"id": "b", "title": "[Private video]"},
                {"id": "c"},
                {"id": "a", "title": "First again"},
                {"id": "d", "title": "  Fourth  "}
            ]
        }"#;
        let items = parse_flat_playlist(json).expect("playlist should parse");
        let summary: Vec<(&str, &str, usize)> = items
            .iter()
            .map(|item| (item.id.as_str(), item.title.as_str(), item.position))
            .collect();
        assert_eq!(
            summary,
            vec![("a", "First", 0), ("c", "c", 1), ("d", "Fourth", 2)]
        );
    }

    #[test]
    fn test_parse_flat_playlist_treats_missing_entries_as_empty() {
        assert!(parse_flat_playlist(r#"{"_type": "playlist"}"#)
            .expect("should parse")
            .is_empty());
        assert!(parse_flat_playlist("ERROR: not json").is_err());
    }
}
