//! Event-bus protocol shared by all runtime components.
//!
//! This module defines the message payloads exchanged between the console,
//! the catalog sync worker and the acquisition pipeline, plus the item records
//! those components pass around.

use std::path::PathBuf;

use crate::config::PlaybackMode;

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Control(ControlMessage),
    Catalog(CatalogMessage),
    Pipeline(PipelineMessage),
}

/// Operator requests. These never carry presentation state.
#[derive(Debug, Clone)]
pub enum ControlMessage {
    SyncNow,
    SetPlaybackMode(PlaybackMode),
    Shutdown,
}

/// Catalog-sync notifications.
#[derive(Debug, Clone)]
pub enum CatalogMessage {
    SyncStarted,
    SyncCompleted(SyncOutcome),
    SyncFailed(String),
}

/// Acquisition-pipeline notifications.
#[derive(Debug, Clone)]
pub enum PipelineMessage {
    ItemPublished {
        id: String,
        path: PathBuf,
        metadata_pending: bool,
    },
    ItemFailed {
        id: String,
        stage: String,
        reason: String,
    },
    MetadataRetried {
        id: String,
        path: PathBuf,
    },
}

/// One playlist entry as reported by the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
    /// Zero-based position in the remote list.
    pub position: usize,
}

/// One unit of acquisition work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
}

/// A fully processed, playable item in the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub id: String,
    pub file_path: PathBuf,
    pub song: String,
    pub artist: String,
    pub normalized: bool,
    /// Classifier resolution failed; eligible for the startup retry pass.
    pub metadata_pending: bool,
}

/// Result of one catalog sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Number of items the remote catalog returned.
    pub fetched: usize,
    /// Ids newly queued for acquisition.
    pub enqueued: Vec<String>,
    /// Stale ids removed from the cache.
    pub removed: Vec<String>,
    /// Stale ids kept because they were on air at sync time.
    pub retained: Vec<String>,
}
