//! One-shot startup pass that re-asks the classifier about pending items.

use std::collections::BTreeSet;

use log::{debug, info, warn};
use tokio::sync::broadcast::Sender;

use crate::acquisition::retry_index::RetryIndex;
use crate::cache::cache_maintenance::install_cache_file;
use crate::metadata::classifier::Classifier;
use crate::metadata::metadata_resolver::resolve_metadata;
use crate::metadata::UNKNOWN_ARTIST;
use crate::protocol::{CacheEntry, Message, PipelineMessage};
use crate::state::SharedState;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetryPassSummary {
    pub resolved: Vec<String>,
    pub still_pending: Vec<String>,
    /// Ids whose retry budget is used up.
    pub exhausted: Vec<String>,
    /// Ids skipped because they were on air.
    pub deferred: Vec<String>,
}

/// Title handed back to the classifier, rebuilt from what the filename kept.
fn retry_title(entry: &CacheEntry) -> String {
    if entry.artist.is_empty() || entry.artist == UNKNOWN_ARTIST {
        entry.song.clone()
    } else {
        format!("{} - {}", entry.song, entry.artist)
    }
}

fn record_failure(index: &RetryIndex, id: &str, reason: &str) {
    match index.record_attempt(id, Some(reason)) {
        Ok(attempts) => debug!("MetadataRetry[{}]: {} attempts so far", id, attempts),
        Err(error) => warn!("MetadataRetry[{}]: failed to record attempt: {}", id, error),
    }
}

/// Retries every pending entry once, within the per-id attempt budget.
///
/// A success renames the file to drop the pending marker and updates the
/// index entry in place; the item currently on air is left for a later start.
/// The rename runs under a store claim, so the scheduler cannot start the
/// item while its file moves.
pub fn run_metadata_retry_pass(
    state: &SharedState,
    classifier: &dyn Classifier,
    index: &RetryIndex,
    max_retries: u32,
    bus_producer: Option<&Sender<Message>>,
) -> RetryPassSummary {
    let mut summary = RetryPassSummary::default();
    let pending: Vec<CacheEntry> = state
        .cache_entries()
        .into_iter()
        .filter(|entry| entry.metadata_pending)
        .collect();

    let pending_ids: BTreeSet<String> = pending.iter().map(|entry| entry.id.clone()).collect();
    if let Err(error) = index.retain_only(&pending_ids) {
        warn!("MetadataRetry: failed to prune retry index: {}", error);
    }
    if pending.is_empty() {
        return summary;
    }
    info!("MetadataRetry: {} pending items", pending.len());

    let cache_dir = state.config().cache_dir();
    for entry in pending {
        if state.is_shutting_down() {
            break;
        }
        if state.current_session_id().as_deref() == Some(entry.id.as_str()) {
            summary.deferred.push(entry.id);
            continue;
        }
        let attempts = index.attempts(&entry.id).unwrap_or(0);
        if attempts >= max_retries {
            debug!(
                "MetadataRetry[{}]: retry budget used ({} attempts)",
                entry.id, attempts
            );
            summary.exhausted.push(entry.id);
            continue;
        }

        let resolved = resolve_metadata(Some(classifier), &entry.id, &retry_title(&entry));
        if resolved.classifier_failed {
            record_failure(index, &entry.id, "classifier failed");
            summary.still_pending.push(entry.id);
            continue;
        }

        // The classifier call can take a while; the item may have gone on air.
        if !state.claim_for_rename(&entry.id) {
            debug!(
                "MetadataRetry[{}]: went on air while classifying, leaving it for a later start",
                entry.id
            );
            summary.deferred.push(entry.id);
            continue;
        }
        let installed = install_cache_file(
            &cache_dir,
            &entry.file_path,
            &resolved.song,
            &resolved.artist,
            &entry.id,
            false,
        );
        let file_path = match installed {
            Ok(file_path) => file_path,
            Err(reason) => {
                state.release_rename_claim(&entry.id);
                warn!("MetadataRetry[{}]: rename failed: {}", entry.id, reason);
                record_failure(index, &entry.id, &reason);
                summary.still_pending.push(entry.id);
                continue;
            }
        };

        info!(
            "MetadataRetry[{}]: resolved {:?} by {:?}",
            entry.id, resolved.song, resolved.artist
        );
        let updated = CacheEntry {
            file_path: file_path.clone(),
            song: resolved.song,
            artist: resolved.artist,
            metadata_pending: false,
            ..entry
        };
        let id = updated.id.clone();
        state.upsert_cache_entry(updated);
        state.release_rename_claim(&id);
        if let Err(error) = index.clear(&id) {
            warn!("MetadataRetry[{}]: failed to clear retry record: {}", id, error);
        }
        if let Some(bus_producer) = bus_producer {
            let _ = bus_producer.send(Message::Pipeline(PipelineMessage::MetadataRetried {
                id: id.clone(),
                path: file_path,
            }));
        }
        summary.resolved.push(id);
    }
    summary
}
