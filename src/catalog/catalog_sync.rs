//! Remote-list diffing and the catalog sync worker loop.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::cache::cache_maintenance::remove_stale_entries;
use crate::catalog::catalog_source::CatalogSource;
use crate::protocol::{CatalogItem, CatalogMessage, ControlMessage, Message, SyncOutcome, WorkItem};
use crate::state::SharedState;

const TOOLS_WAIT_POLL: Duration = Duration::from_millis(250);

/// What one remote listing means for the local cache.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    /// Remote items missing from the cache, in remote order.
    pub new_items: Vec<WorkItem>,
    /// Cached ids the remote list no longer contains.
    pub stale_ids: BTreeSet<String>,
}

pub fn plan_sync(remote: &[CatalogItem], cached: &BTreeSet<String>) -> SyncPlan {
    let remote_ids: BTreeSet<&str> = remote.iter().map(|item| item.id.as_str()).collect();
    let new_items = remote
        .iter()
        .filter(|item| !cached.contains(&item.id))
        .map(|item| WorkItem {
            id: item.id.clone(),
            title: item.title.clone(),
        })
        .collect();
    let stale_ids = cached
        .iter()
        .filter(|id| !remote_ids.contains(id.as_str()))
        .cloned()
        .collect();
    SyncPlan {
        new_items,
        stale_ids,
    }
}

/// Fetches the remote list once and applies the diff.
///
/// A fetch failure changes nothing. An empty remote list queues nothing and
/// deletes nothing.
pub fn run_catalog_sync(
    state: &SharedState,
    source: &dyn CatalogSource,
) -> Result<SyncOutcome, String> {
    let playlist = state.config().catalog.playlist;
    if playlist.is_empty() {
        return Err("no playlist configured".to_string());
    }

    let remote = source.fetch(&playlist)?;
    let relisted = state.cancel_deferred_removals(remote.iter().map(|item| item.id.as_str()));
    if !relisted.is_empty() {
        debug!(
            "CatalogSync: {} listed again, keeping them: {:?}",
            relisted.len(),
            relisted
        );
    }
    let plan = plan_sync(&remote, &state.cache_ids());

    let enqueued: Vec<String> = plan
        .new_items
        .into_iter()
        .filter_map(|item| {
            let id = item.id.clone();
            state.enqueue_work(item).then_some(id)
        })
        .collect();

    let removal = if remote.is_empty() {
        if !plan.stale_ids.is_empty() {
            warn!(
                "CatalogSync: remote playlist is empty; keeping all {} cached items",
                plan.stale_ids.len()
            );
        }
        Default::default()
    } else {
        remove_stale_entries(state, &plan.stale_ids)
    };

    Ok(SyncOutcome {
        fetched: remote.len(),
        enqueued,
        removed: removal.removed,
        retained: removal.retained,
    })
}

/// Runs one sync at start and one per explicit request, never on a timer.
pub struct CatalogSyncWorker {
    state: Arc<SharedState>,
    source: Box<dyn CatalogSource>,
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    sync_pending: bool,
    running: bool,
}

impl CatalogSyncWorker {
    pub fn new(
        state: Arc<SharedState>,
        source: Box<dyn CatalogSource>,
        bus_consumer: Receiver<Message>,
        bus_producer: Sender<Message>,
    ) -> Self {
        Self {
            state,
            source,
            bus_consumer,
            bus_producer,
            sync_pending: true,
            running: true,
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Control(ControlMessage::SyncNow) => {
                if self.sync_pending {
                    debug!("CatalogSync: sync already pending, coalescing request");
                }
                self.sync_pending = true;
            }
            Message::Control(ControlMessage::Shutdown) => self.running = false,
            _ => {}
        }
    }

    fn drain_bus_messages_nonblocking(&mut self) {
        loop {
            match self.bus_consumer.try_recv() {
                Ok(message) => self.handle_message(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Closed) => {
                    self.running = false;
                    break;
                }
            }
        }
    }

    fn sync_once(&mut self) {
        self.sync_pending = false;
        let _ = self
            .bus_producer
            .send(Message::Catalog(CatalogMessage::SyncStarted));
        match run_catalog_sync(&self.state, self.source.as_ref()) {
            Ok(outcome) => {
                info!(
                    "CatalogSync: fetched {} items, queued {}, removed {}, retained {}",
                    outcome.fetched,
                    outcome.enqueued.len(),
                    outcome.removed.len(),
                    outcome.retained.len()
                );
                let _ = self
                    .bus_producer
                    .send(Message::Catalog(CatalogMessage::SyncCompleted(outcome)));
            }
            Err(reason) => {
                error!("CatalogSync: sync abandoned: {}", reason);
                let _ = self
                    .bus_producer
                    .send(Message::Catalog(CatalogMessage::SyncFailed(reason)));
            }
        }
    }

    /// Starts the blocking sync loop.
    pub fn run(&mut self) {
        while self.running && !self.state.is_shutting_down() {
            if self.sync_pending {
                self.drain_bus_messages_nonblocking();
                if !self.running || self.state.is_shutting_down() {
                    break;
                }
                if self.state.tools_ready() {
                    self.sync_once();
                } else {
                    std::thread::sleep(TOOLS_WAIT_POLL);
                }
                continue;
            }

            match self.bus_consumer.blocking_recv() {
                Ok(message) => self.handle_message(message),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        debug!("CatalogSync: worker stopped");
    }
}
