//! Song/artist resolution for acquired items.

pub mod classifier;
pub mod metadata_resolver;
pub mod title_cleaning;
pub mod title_patterns;

/// Performer placeholder when no tier could name one.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
