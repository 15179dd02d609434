//! Two-tier song/artist resolution with a shared cleaning pass.

use log::{debug, info};

use crate::metadata::classifier::Classifier;
use crate::metadata::title_cleaning::{clean_artist, clean_title};
use crate::metadata::title_patterns::split_title;
use crate::metadata::UNKNOWN_ARTIST;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataSource {
    Classifier,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMetadata {
    pub song: String,
    pub artist: String,
    pub source: MetadataSource,
    /// The classifier was consulted and did not produce a usable answer.
    pub classifier_failed: bool,
}

fn finalize(song: &str, artist: &str, source: MetadataSource, classifier_failed: bool) -> ResolvedMetadata {
    let artist = clean_artist(artist);
    ResolvedMetadata {
        song: clean_title(song),
        artist: if artist.is_empty() {
            UNKNOWN_ARTIST.to_string()
        } else {
            artist
        },
        source,
        classifier_failed,
    }
}

/// Resolves `(song, artist)` for one item; never fails.
///
/// Without a classifier the fallback tier is used directly and the result is
/// not flagged as a classifier failure.
pub fn resolve_metadata(
    classifier: Option<&dyn Classifier>,
    id: &str,
    title: &str,
) -> ResolvedMetadata {
    let (fallback_song, fallback_artist) = split_title(title);

    let Some(classifier) = classifier else {
        debug!("Metadata[{}]: no classifier configured, using title patterns", id);
        return finalize(&fallback_song, &fallback_artist, MetadataSource::Fallback, false);
    };

    match classifier.classify(id, title) {
        Ok(answer) => {
            let artist = if answer.artist.trim().is_empty() {
                fallback_artist.as_str()
            } else {
                answer.artist.as_str()
            };
            finalize(&answer.song, artist, MetadataSource::Classifier, false)
        }
        Err(reason) => {
            info!(
                "Metadata[{}]: classifier failed for {:?} ({}); using title patterns",
                id, title, reason
            );
            finalize(&fallback_song, &fallback_artist, MetadataSource::Fallback, true)
        }
    }
}

/// Overlay line for the title source.
pub fn overlay_text(song: &str, artist: &str) -> String {
    if artist.trim().is_empty() || artist == UNKNOWN_ARTIST {
        song.to_string()
    } else {
        format!("{song} — {artist}")
    }
}
