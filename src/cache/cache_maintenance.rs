//! Startup scan, integrity validation and stale-entry removal for the cache.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::cache::cache_naming::{
    canonical_file_name, parse_cache_file_name, ParsedCacheName, DEFAULT_MEDIA_EXTENSION,
};
use crate::protocol::CacheEntry;
use crate::state::SharedState;

/// Per-item scratch space used by the acquisition pipeline.
pub const INCOMING_DIR_NAME: &str = ".incoming";

const TEMP_ARTIFACT_EXTENSIONS: [&str; 5] = ["part", "ytdl", "temp", "tmp", "download"];

#[derive(Debug, Default)]
pub struct CacheScanReport {
    pub entries: Vec<CacheEntry>,
    /// Files deleted because they were undersized, duplicated or temporary.
    pub discarded: Vec<PathBuf>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StaleRemoval {
    pub removed: Vec<String>,
    pub retained: Vec<String>,
}

pub fn incoming_dir(cache_dir: &Path) -> PathBuf {
    cache_dir.join(INCOMING_DIR_NAME)
}

fn is_temp_artifact(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            TEMP_ARTIFACT_EXTENSIONS
                .iter()
                .any(|temp| ext.eq_ignore_ascii_case(temp))
        })
        .unwrap_or(false)
}

fn remove_path(path: &Path, discarded: &mut Vec<PathBuf>) {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Ok(()) => discarded.push(path.to_path_buf()),
        Err(err) => warn!("CacheMaintenance: failed to remove {}: {}", path.display(), err),
    }
}

fn entry_from_parsed(parsed: ParsedCacheName, file_path: PathBuf) -> CacheEntry {
    CacheEntry {
        id: parsed.id,
        file_path,
        song: parsed.song,
        artist: parsed.artist,
        normalized: true,
        metadata_pending: parsed.pending,
    }
}

/// Rebuilds cache entries from canonical filenames found in `cache_dir`.
///
/// Files below `min_file_bytes`, partial downloads and leftover scratch data
/// are deleted. When two files claim one id, the non-pending (then larger)
/// file wins and the other is deleted.
pub fn scan_cache_dir(cache_dir: &Path, min_file_bytes: u64) -> CacheScanReport {
    let mut report = CacheScanReport::default();
    let entries = match std::fs::read_dir(cache_dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(
                "CacheMaintenance: failed to read cache directory {}: {}",
                cache_dir.display(),
                err
            );
            return report;
        }
    };

    let mut by_id: BTreeMap<String, (CacheEntry, u64)> = BTreeMap::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(
                    "CacheMaintenance: failed to read a directory entry in {}: {}",
                    cache_dir.display(),
                    err
                );
                continue;
            }
        };
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(err) => {
                debug!("CacheMaintenance: failed to inspect {}: {}", path.display(), err);
                continue;
            }
        };

        if file_type.is_dir() {
            if entry.file_name() == INCOMING_DIR_NAME {
                remove_path(&path, &mut report.discarded);
            }
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        if is_temp_artifact(&path) {
            remove_path(&path, &mut report.discarded);
            continue;
        }

        let Some(parsed) = entry
            .file_name()
            .to_str()
            .and_then(parse_cache_file_name)
        else {
            continue;
        };

        let size = entry.metadata().map(|metadata| metadata.len()).unwrap_or(0);
        if size == 0 || size < min_file_bytes {
            info!(
                "CacheMaintenance: discarding undersized file {} ({} bytes)",
                path.display(),
                size
            );
            remove_path(&path, &mut report.discarded);
            continue;
        }

        let candidate = entry_from_parsed(parsed, path);
        match by_id.remove(&candidate.id) {
            None => {
                by_id.insert(candidate.id.clone(), (candidate, size));
            }
            Some((existing, existing_size)) => {
                let candidate_wins = match (existing.metadata_pending, candidate.metadata_pending) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => size > existing_size,
                };
                let (winner, winner_size, loser) = if candidate_wins {
                    (candidate, size, existing)
                } else {
                    (existing, existing_size, candidate)
                };
                info!(
                    "CacheMaintenance: duplicate cache files for {}; keeping {}",
                    winner.id,
                    winner.file_path.display()
                );
                remove_path(&loser.file_path, &mut report.discarded);
                by_id.insert(winner.id.clone(), (winner, winner_size));
            }
        }
    }

    report.entries = by_id.into_values().map(|(entry, _)| entry).collect();
    report
}

/// Scans the configured cache directory and replaces the store's index.
pub fn load_cache_index(state: &SharedState) -> CacheScanReport {
    let config = state.config();
    let cache_dir = config.cache_dir();
    if let Err(err) = std::fs::create_dir_all(&cache_dir) {
        warn!(
            "CacheMaintenance: failed to create cache directory {}: {}",
            cache_dir.display(),
            err
        );
    }
    let report = scan_cache_dir(&cache_dir, config.cache.min_file_bytes);
    info!(
        "CacheMaintenance: indexed {} cached items ({} artifacts discarded) in {}",
        report.entries.len(),
        report.discarded.len(),
        cache_dir.display()
    );
    state.replace_cache(report.entries.clone());
    report
}

fn delete_entry_file(entry: &CacheEntry) {
    match std::fs::remove_file(&entry.file_path) {
        Ok(()) => info!(
            "CacheMaintenance: removed stale item {} ({})",
            entry.id,
            entry.file_path.display()
        ),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(
            "CacheMaintenance: failed to delete {} for {}: {}",
            entry.file_path.display(),
            entry.id,
            err
        ),
    }
}

/// Deletes every stale entry except the one on air.
///
/// The on-air check and the index removal happen under one lock; files are
/// deleted only after the lock is released. Protected ids are remembered and
/// swept later by [`sweep_deferred_removals`].
pub fn remove_stale_entries(state: &SharedState, stale_ids: &BTreeSet<String>) -> StaleRemoval {
    if stale_ids.is_empty() {
        return StaleRemoval::default();
    }

    let mut retained = Vec::new();
    let removed = state.retain_cache_entries(|entry, session| {
        if !stale_ids.contains(&entry.id) {
            return true;
        }
        let on_air = session.is_some_and(|session| session.current_id == entry.id);
        if on_air {
            retained.push(entry.id.clone());
        }
        on_air
    });

    for id in &retained {
        info!("CacheMaintenance: keeping stale item {} until it leaves the air", id);
        state.defer_removal(id);
    }
    for entry in &removed {
        delete_entry_file(entry);
    }

    StaleRemoval {
        removed: removed.into_iter().map(|entry| entry.id).collect(),
        retained,
    }
}

/// Moves `source` to its canonical name in `cache_dir` and removes any other
/// canonical file for the same id, so exactly one file per id remains.
pub fn install_cache_file(
    cache_dir: &Path,
    source: &Path,
    song: &str,
    artist: &str,
    id: &str,
    pending: bool,
) -> Result<PathBuf, String> {
    let extension = source
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or(DEFAULT_MEDIA_EXTENSION);
    let target = cache_dir.join(canonical_file_name(song, artist, id, pending, extension));
    std::fs::rename(source, &target).map_err(|error| {
        format!(
            "failed to move {} to {}: {}",
            source.display(),
            target.display(),
            error
        )
    })?;

    if let Ok(entries) = std::fs::read_dir(cache_dir) {
        for path in entries.flatten().map(|entry| entry.path()) {
            if path == target {
                continue;
            }
            let same_id = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(parse_cache_file_name)
                .is_some_and(|parsed| parsed.id == id);
            if same_id {
                info!(
                    "CacheMaintenance: replacing older file for {}: {}",
                    id,
                    path.display()
                );
                if let Err(error) = std::fs::remove_file(&path) {
                    warn!(
                        "CacheMaintenance: failed to remove {}: {}",
                        path.display(),
                        error
                    );
                }
            }
        }
    }
    Ok(target)
}

/// Removes deferred stale entries that are no longer on air.
pub fn sweep_deferred_removals(state: &SharedState) -> Vec<String> {
    let removed = state.take_deferred_removals();
    for entry in &removed {
        delete_entry_file(entry);
    }
    removed.into_iter().map(|entry| entry.id).collect()
}
