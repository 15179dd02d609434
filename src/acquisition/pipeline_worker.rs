//! Serialized download → metadata → normalize → publish worker.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::broadcast::Sender;

use crate::acquisition::media_tools::MediaTools;
use crate::cache::cache_maintenance::{incoming_dir, install_cache_file, sweep_deferred_removals};
use crate::cache::cache_naming::DEFAULT_MEDIA_EXTENSION;
use crate::metadata::classifier::Classifier;
use crate::metadata::metadata_resolver::resolve_metadata;
use crate::protocol::{CacheEntry, Message, PipelineMessage, WorkItem};
use crate::state::SharedState;

const IDLE_WAIT: Duration = Duration::from_secs(1);
const TOOLS_WAIT_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Download,
    Metadata,
    Normalize,
    Publish,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Metadata => "metadata",
            Self::Normalize => "normalize",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFailure {
    pub stage: PipelineStage,
    pub reason: String,
}

impl PipelineFailure {
    fn new(stage: PipelineStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage failed: {}", self.stage, self.reason)
    }
}

/// Scratch files for one item. Dropping it removes whatever is left.
struct IncomingArtifacts {
    directory: PathBuf,
    id: String,
}

impl IncomingArtifacts {
    fn new(directory: PathBuf, id: &str) -> Self {
        Self {
            directory,
            id: id.to_string(),
        }
    }

    fn download_prefix(&self) -> PathBuf {
        self.directory.join(format!("{}.download", self.id))
    }

    fn normalized_path(&self, extension: &str) -> PathBuf {
        self.directory
            .join(format!("{}.normalized.{}", self.id, extension))
    }

    fn remove_all(&self) {
        let prefix = format!("{}.", self.id);
        let Ok(entries) = std::fs::read_dir(&self.directory) else {
            return;
        };
        for path in entries.flatten().map(|entry| entry.path()) {
            let owned_by_item = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&prefix));
            if owned_by_item {
                if let Err(error) = std::fs::remove_file(&path) {
                    debug!(
                        "Pipeline[{}]: failed to remove temp file {}: {}",
                        self.id,
                        path.display(),
                        error
                    );
                }
            }
        }
    }
}

impl Drop for IncomingArtifacts {
    fn drop(&mut self) {
        self.remove_all();
    }
}

/// Drains the shared work queue one item at a time.
pub struct AcquisitionPipeline {
    state: Arc<SharedState>,
    tools: Arc<dyn MediaTools>,
    classifier: Option<Arc<dyn Classifier>>,
    bus_producer: Sender<Message>,
}

impl AcquisitionPipeline {
    pub fn new(
        state: Arc<SharedState>,
        tools: Arc<dyn MediaTools>,
        classifier: Option<Arc<dyn Classifier>>,
        bus_producer: Sender<Message>,
    ) -> Self {
        Self {
            state,
            tools,
            classifier,
            bus_producer,
        }
    }

    /// Blocks until tools are ready. Fails only when shutdown begins.
    fn ensure_can_run(&self, stage: PipelineStage) -> Result<(), PipelineFailure> {
        loop {
            if self.state.is_shutting_down() {
                return Err(PipelineFailure::new(stage, "shutting down"));
            }
            if self.state.tools_ready() {
                return Ok(());
            }
            std::thread::sleep(TOOLS_WAIT_POLL);
        }
    }

    /// Runs every stage for `item`. `Ok(None)` means the item was already cached.
    pub fn process_item(&self, item: &WorkItem) -> Result<Option<CacheEntry>, PipelineFailure> {
        if self
            .state
            .cache_entry(&item.id)
            .is_some_and(|entry| entry.normalized)
        {
            debug!("Pipeline[{}]: already cached, skipping", item.id);
            return Ok(None);
        }

        let config = self.state.config();
        let cache_dir = config.cache_dir();
        let scratch_dir = incoming_dir(&cache_dir);
        std::fs::create_dir_all(&scratch_dir).map_err(|error| {
            PipelineFailure::new(
                PipelineStage::Download,
                format!("failed to create {}: {}", scratch_dir.display(), error),
            )
        })?;
        let artifacts = IncomingArtifacts::new(scratch_dir, &item.id);

        self.ensure_can_run(PipelineStage::Download)?;
        info!("Pipeline[{}]: downloading {:?}", item.id, item.title);
        let downloaded = self
            .tools
            .download(&item.id, &artifacts.download_prefix(), config.tools.max_height)
            .map_err(|reason| PipelineFailure::new(PipelineStage::Download, reason))?;

        if self.state.is_shutting_down() {
            return Err(PipelineFailure::new(PipelineStage::Metadata, "shutting down"));
        }
        let resolved = resolve_metadata(self.classifier.as_deref(), &item.id, &item.title);
        debug!(
            "Pipeline[{}]: resolved {:?} by {:?} via {:?}",
            item.id, resolved.song, resolved.artist, resolved.source
        );

        self.ensure_can_run(PipelineStage::Normalize)?;
        let extension = downloaded
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or(DEFAULT_MEDIA_EXTENSION)
            .to_string();
        let normalized = artifacts.normalized_path(&extension);
        self.tools
            .normalize(&downloaded, &normalized, &config.normalization)
            .map_err(|reason| PipelineFailure::new(PipelineStage::Normalize, reason))?;

        let pending = resolved.classifier_failed;
        let file_path = install_cache_file(
            &cache_dir,
            &normalized,
            &resolved.song,
            &resolved.artist,
            &item.id,
            pending,
        )
        .map_err(|reason| PipelineFailure::new(PipelineStage::Publish, reason))?;

        let entry = CacheEntry {
            id: item.id.clone(),
            file_path,
            song: resolved.song,
            artist: resolved.artist,
            normalized: true,
            metadata_pending: pending,
        };
        self.state.upsert_cache_entry(entry.clone());
        Ok(Some(entry))
    }

    fn publish_outcome(&self, item: &WorkItem, outcome: Result<Option<CacheEntry>, PipelineFailure>) {
        match outcome {
            Ok(Some(entry)) => {
                info!(
                    "Pipeline[{}]: published {}{}",
                    entry.id,
                    entry.file_path.display(),
                    if entry.metadata_pending {
                        " (metadata pending)"
                    } else {
                        ""
                    }
                );
                let _ = self
                    .bus_producer
                    .send(Message::Pipeline(PipelineMessage::ItemPublished {
                        id: entry.id,
                        path: entry.file_path,
                        metadata_pending: entry.metadata_pending,
                    }));
            }
            Ok(None) => {}
            Err(failure) => {
                if self.state.is_shutting_down() {
                    info!("Pipeline[{}]: abandoned during shutdown", item.id);
                } else {
                    error!(
                        "Pipeline[{}]: {:?} dropped: {}",
                        item.id, item.title, failure
                    );
                }
                let _ = self
                    .bus_producer
                    .send(Message::Pipeline(PipelineMessage::ItemFailed {
                        id: item.id.clone(),
                        stage: failure.stage.to_string(),
                        reason: failure.reason,
                    }));
            }
        }
    }

    /// Starts the blocking worker loop.
    pub fn run(&self) {
        while !self.state.is_shutting_down() {
            match self.state.wait_for_work(IDLE_WAIT) {
                Some(item) => {
                    let outcome = self.process_item(&item);
                    self.state.finish_work(&item.id);
                    self.publish_outcome(&item, outcome);
                }
                None => {
                    let swept = sweep_deferred_removals(&self.state);
                    if !swept.is_empty() {
                        info!("Pipeline: removed {} deferred stale items", swept.len());
                    }
                }
            }
        }
        let leftover = self.state.queued_work().len();
        if leftover > 0 {
            warn!("Pipeline: stopping with {} items still queued", leftover);
        }
        debug!("Pipeline: worker stopped");
    }
}
