//! Lock-guarded registry shared by the background workers and the scheduler.
//!
//! Every accessor takes the single inner mutex for the duration of one read or
//! write and never performs I/O while holding it. Reads hand out owned copies,
//! so no caller can keep a reference into the registry across a lock release.
//! Domain rules (which entry may be deleted, what plays next) belong to the
//! callers; the store only applies them atomically when handed a closure.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::{Config, PlaybackMode};
use crate::protocol::{CacheEntry, WorkItem};

/// Cross-component signals. Each flag has exactly one writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerFlags {
    /// Written by the tools probe.
    pub tools_ready: bool,
    /// Written by the scheduler.
    pub scene_active: bool,
    /// Written by the operator console / host.
    pub stop_requested: bool,
    /// Written by bootstrap on exit.
    pub shutting_down: bool,
}

/// The single "on air now" record. Only the scheduler writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSession {
    pub current_id: String,
    pub file_path: PathBuf,
    pub started_at: Instant,
    pub mode: PlaybackMode,
    pub loop_id: Option<String>,
}

#[derive(Debug, Default)]
struct StateInner {
    config: Config,
    flags: WorkerFlags,
    cache: BTreeMap<String, CacheEntry>,
    work_queue: VecDeque<WorkItem>,
    in_flight: Option<String>,
    play_history: Vec<String>,
    session: Option<PlaybackSession>,
    deferred_removals: BTreeSet<String>,
    /// Ids whose file is being renamed; the scheduler keeps away from them.
    renaming: BTreeSet<String>,
}

/// Shared registry of configuration, flags and collections.
#[derive(Debug, Default)]
pub struct SharedState {
    inner: Mutex<StateInner>,
    work_signal: Condvar,
}

impl SharedState {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Mutex::new(StateInner {
                config,
                ..StateInner::default()
            }),
            work_signal: Condvar::new(),
        }
    }

    // The registry holds plain data, so a panic elsewhere never leaves it
    // half-written in a way later readers must avoid.
    fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> Config {
        self.lock().config.clone()
    }

    pub fn playback_mode(&self) -> PlaybackMode {
        self.lock().config.playback.mode
    }

    pub fn set_playback_mode(&self, mode: PlaybackMode) {
        self.lock().config.playback.mode = mode;
    }

    pub fn replace_config(&self, config: Config) {
        self.lock().config = config;
    }

    pub fn flags(&self) -> WorkerFlags {
        self.lock().flags
    }

    pub fn tools_ready(&self) -> bool {
        self.lock().flags.tools_ready
    }

    pub fn set_tools_ready(&self, ready: bool) {
        self.lock().flags.tools_ready = ready;
        self.work_signal.notify_all();
    }

    pub fn set_scene_active(&self, active: bool) {
        self.lock().flags.scene_active = active;
    }

    pub fn set_stop_requested(&self, requested: bool) {
        self.lock().flags.stop_requested = requested;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().flags.shutting_down
    }

    pub fn begin_shutdown(&self) {
        self.lock().flags.shutting_down = true;
        self.work_signal.notify_all();
    }

    pub fn cache_entries(&self) -> Vec<CacheEntry> {
        self.lock().cache.values().cloned().collect()
    }

    pub fn cache_entry(&self, id: &str) -> Option<CacheEntry> {
        self.lock().cache.get(id).cloned()
    }

    pub fn cache_ids(&self) -> BTreeSet<String> {
        self.lock().cache.keys().cloned().collect()
    }

    /// Cached ids the scheduler may start right now.
    pub fn playable_cache_ids(&self) -> BTreeSet<String> {
        let inner = self.lock();
        inner
            .cache
            .keys()
            .filter(|id| !inner.renaming.contains(*id))
            .cloned()
            .collect()
    }

    pub fn upsert_cache_entry(&self, entry: CacheEntry) {
        self.lock().cache.insert(entry.id.clone(), entry);
    }

    pub fn remove_cache_entry(&self, id: &str) -> Option<CacheEntry> {
        self.lock().cache.remove(id)
    }

    pub fn replace_cache(&self, entries: Vec<CacheEntry>) {
        let mut inner = self.lock();
        inner.cache = entries
            .into_iter()
            .map(|entry| (entry.id.clone(), entry))
            .collect();
    }

    /// Removes every entry for which `keep` returns false and returns them.
    ///
    /// `keep` sees the current session in the same critical section, so a
    /// rule like "never drop what is on air" cannot race the scheduler.
    pub fn retain_cache_entries<F>(&self, mut keep: F) -> Vec<CacheEntry>
    where
        F: FnMut(&CacheEntry, Option<&PlaybackSession>) -> bool,
    {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let session = inner.session.as_ref();
        let doomed: Vec<String> = inner
            .cache
            .values()
            .filter(|entry| !keep(entry, session))
            .map(|entry| entry.id.clone())
            .collect();
        doomed
            .iter()
            .filter_map(|id| inner.cache.remove(id))
            .collect()
    }

    /// Queues `item` unless the id is already queued or being processed.
    pub fn enqueue_work(&self, item: WorkItem) -> bool {
        let mut inner = self.lock();
        let already_present = inner.in_flight.as_deref() == Some(item.id.as_str())
            || inner.work_queue.iter().any(|queued| queued.id == item.id);
        if already_present {
            return false;
        }
        inner.work_queue.push_back(item);
        drop(inner);
        self.work_signal.notify_all();
        true
    }

    pub fn queued_work(&self) -> Vec<WorkItem> {
        self.lock().work_queue.iter().cloned().collect()
    }

    pub fn in_flight_work(&self) -> Option<String> {
        self.lock().in_flight.clone()
    }

    /// Pops the next work item and marks it in flight, waiting up to `timeout`.
    ///
    /// Returns `None` on timeout, on shutdown, or while tools are not ready.
    pub fn wait_for_work(&self, timeout: Duration) -> Option<WorkItem> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        loop {
            if inner.flags.shutting_down {
                return None;
            }
            if inner.flags.tools_ready && inner.in_flight.is_none() {
                if let Some(item) = inner.work_queue.pop_front() {
                    inner.in_flight = Some(item.id.clone());
                    return Some(item);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (next, _) = self
                .work_signal
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            inner = next;
        }
    }

    pub fn finish_work(&self, id: &str) {
        let mut inner = self.lock();
        if inner.in_flight.as_deref() == Some(id) {
            inner.in_flight = None;
        }
        drop(inner);
        self.work_signal.notify_all();
    }

    pub fn play_history(&self) -> Vec<String> {
        self.lock().play_history.clone()
    }

    pub fn record_played(&self, id: &str) {
        let mut inner = self.lock();
        if !inner.play_history.iter().any(|played| played == id) {
            inner.play_history.push(id.to_string());
        }
    }

    pub fn clear_play_history(&self) {
        self.lock().play_history.clear();
    }

    pub fn session(&self) -> Option<PlaybackSession> {
        self.lock().session.clone()
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.lock()
            .session
            .as_ref()
            .map(|session| session.current_id.clone())
    }

    pub fn set_session(&self, session: Option<PlaybackSession>) {
        self.lock().session = session;
    }

    /// Puts `id` on air unless its file is being renamed.
    ///
    /// Returns the entry as it is at that moment, so the path handed to the
    /// host is never one a rename is about to move.
    pub fn begin_session(
        &self,
        id: &str,
        started_at: Instant,
        mode: PlaybackMode,
        loop_id: Option<String>,
    ) -> Option<CacheEntry> {
        let mut inner = self.lock();
        if inner.renaming.contains(id) {
            return None;
        }
        let entry = inner.cache.get(id).cloned()?;
        inner.session = Some(PlaybackSession {
            current_id: entry.id.clone(),
            file_path: entry.file_path.clone(),
            started_at,
            mode,
            loop_id,
        });
        Some(entry)
    }

    /// Reserves `id` for a file rename. Fails while the id is on air.
    pub fn claim_for_rename(&self, id: &str) -> bool {
        let mut inner = self.lock();
        let on_air = inner
            .session
            .as_ref()
            .is_some_and(|session| session.current_id == id);
        if on_air {
            return false;
        }
        inner.renaming.insert(id.to_string())
    }

    pub fn release_rename_claim(&self, id: &str) {
        self.lock().renaming.remove(id);
    }

    pub fn defer_removal(&self, id: &str) {
        self.lock().deferred_removals.insert(id.to_string());
    }

    /// Drops every deferred removal for `ids`; returns the ids that were deferred.
    pub fn cancel_deferred_removals<'a, I>(&self, ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut inner = self.lock();
        ids.into_iter()
            .filter(|id| inner.deferred_removals.remove(*id))
            .map(str::to_string)
            .collect()
    }

    pub fn deferred_removals(&self) -> BTreeSet<String> {
        self.lock().deferred_removals.clone()
    }

    /// Clears every deferred removal that is no longer on air and drops those
    /// entries from the index, in one critical section.
    pub fn take_deferred_removals(&self) -> Vec<CacheEntry> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let on_air = inner.session.as_ref().map(|session| session.current_id.clone());
        let due: Vec<String> = inner
            .deferred_removals
            .iter()
            .filter(|id| on_air.as_deref() != Some(id.as_str()))
            .cloned()
            .collect();
        due.iter()
            .filter_map(|id| {
                inner.deferred_removals.remove(id);
                inner.cache.remove(id)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{PlaybackSession, SharedState};
    use crate::config::{Config, PlaybackMode};
    use crate::protocol::{CacheEntry, WorkItem};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn entry(id: &str) -> CacheEntry {
        CacheEntry {
            id: id.to_string(),
            file_path: PathBuf::from(format!("/cache/{id}.mp4")),
            song: format!("Song {id}"),
            artist: "Artist".to_string(),
            normalized: true,
            metadata_pending: false,
        }
    }

    fn work(id: &str) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            title: format!("Title {id}"),
        }
    }

    #[test]
    fn test_reads_return_independent_copies() {
        let state = SharedState::new(Config::default());
        state.upsert_cache_entry(entry("a"));

        let mut snapshot = state.cache_entries();
        snapshot[0].song = "mutated".to_string();
        snapshot.clear();

        assert_eq!(state.cache_entry("a").map(|e| e.song), Some("Song a".to_string()));
    }

    #[test]
    fn test_enqueue_skips_queued_and_in_flight_ids() {
        let state = SharedState::new(Config::default());
        state.set_tools_ready(true);
        assert!(state.enqueue_work(work("a")));
        assert!(!state.enqueue_work(work("a")));

        let taken = state
            .wait_for_work(Duration::from_millis(10))
            .expect("work should be available");
        assert_eq!(taken.id, "a");
        assert_eq!(state.in_flight_work().as_deref(), Some("a"));
        assert!(!state.enqueue_work(work("a")));

        state.finish_work("a");
        assert!(state.enqueue_work(work("a")));
    }

    #[test]
    fn test_wait_for_work_holds_items_until_tools_ready() {
        let state = SharedState::new(Config::default());
        state.enqueue_work(work("a"));
        assert!(state.wait_for_work(Duration::from_millis(20)).is_none());
        state.set_tools_ready(true);
        assert!(state.wait_for_work(Duration::from_millis(20)).is_some());
    }

    #[test]
    fn test_wait_for_work_wakes_on_enqueue_and_shutdown() {
        let state = Arc::new(SharedState::new(Config::default()));
        state.set_tools_ready(true);

        let producer = Arc::clone(&state);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            producer.enqueue_work(work("late"));
        });
        let started = Instant::now();
        let item = state.wait_for_work(Duration::from_secs(5));
        handle.join().expect("producer thread should finish");
        assert_eq!(item.map(|item| item.id), Some("late".to_string()));
        assert!(started.elapsed() < Duration::from_secs(5));

        state.finish_work("late");
        state.begin_shutdown();
        state.enqueue_work(work("ignored"));
        assert!(state.wait_for_work(Duration::from_secs(5)).is_none());
    }

    #[test]
    fn test_rename_claim_and_session_exclude_each_other() {
        let state = SharedState::new(Config::default());
        state.upsert_cache_entry(entry("a"));
        state.upsert_cache_entry(entry("b"));
        let now = Instant::now();

        assert!(state.claim_for_rename("a"));
        assert!(!state.claim_for_rename("a"));
        assert_eq!(state.playable_cache_ids().len(), 1);
        assert!(state
            .begin_session("a", now, PlaybackMode::Continuous, None)
            .is_none());
        assert!(state.session().is_none());

        let mut moved = entry("a");
        moved.file_path = PathBuf::from("/cache/renamed_a.mp4");
        state.upsert_cache_entry(moved);
        state.release_rename_claim("a");
        let started = state
            .begin_session("a", now, PlaybackMode::Continuous, None)
            .expect("released id should start");
        assert_eq!(started.file_path, PathBuf::from("/cache/renamed_a.mp4"));
        assert_eq!(
            state.session().map(|session| session.file_path),
            Some(PathBuf::from("/cache/renamed_a.mp4"))
        );

        assert!(!state.claim_for_rename("a"));
        assert!(state.claim_for_rename("b"));
        assert!(state
            .begin_session("missing", now, PlaybackMode::Continuous, None)
            .is_none());
    }

    #[test]
    fn test_retain_cache_entries_sees_session_atomically() {
        let state = SharedState::new(Config::default());
        state.upsert_cache_entry(entry("a"));
        state.upsert_cache_entry(entry("b"));
        state.set_session(Some(PlaybackSession {
            current_id: "b".to_string(),
            file_path: PathBuf::from("/cache/b.mp4"),
            started_at: Instant::now(),
            mode: PlaybackMode::Continuous,
            loop_id: None,
        }));

        let removed = state.retain_cache_entries(|entry, session| {
            session.is_some_and(|session| session.current_id == entry.id)
        });
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, "a");
        assert!(state.cache_entry("b").is_some());
    }

    #[test]
    fn test_play_history_is_an_ordered_set() {
        let state = SharedState::new(Config::default());
        state.record_played("a");
        state.record_played("b");
        state.record_played("a");
        assert_eq!(state.play_history(), vec!["a".to_string(), "b".to_string()]);
        state.clear_play_history();
        assert!(state.play_history().is_empty());
    }
}
