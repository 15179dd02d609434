//! Cooperative playback scheduler driven by the host's tick.
//!
//! One call to [`PlaybackScheduler::tick`] observes the surface and the store,
//! runs the pure [`step`] function and carries out its actions. Nothing in here
//! blocks on disk or network; file problems are reported by the host through
//! `set_media` and handled by dropping the id from the cache index.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::{PlaybackConfig, PlaybackMode};
use crate::metadata::metadata_resolver::overlay_text;
use crate::protocol::CacheEntry;
use crate::state::SharedState;

use super::playback_state::{step, Action, Observation, Phase, StepLimits};
use super::scene_visibility::{is_scene_visible, is_scene_visible_under, SceneActivation};
use super::selection::{Selection, Selector};
use super::surface::{MediaState, PresentationSurface, SurfaceEvent};
use super::title_timeline::{title_should_show, TitleTiming};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Ran,
    /// Another tick was still running.
    Skipped,
}

struct SchedulerCore {
    selector: Selector,
    phase: Phase,
    title_shown: bool,
    tracked_scene: Option<String>,
    activation: SceneActivation,
    was_active: bool,
    last_mode: Option<PlaybackMode>,
    activation_spent: bool,
    loop_id: Option<String>,
    prepared_next: Option<Selection>,
    /// Cache ids at the time starts were suppressed.
    suppressed_for: Option<BTreeSet<String>>,
    stop_seen: bool,
}

pub struct PlaybackScheduler {
    state: Arc<SharedState>,
    core: Mutex<SchedulerCore>,
}

impl PlaybackScheduler {
    pub fn new(state: Arc<SharedState>, selector: Selector) -> Self {
        Self {
            state,
            core: Mutex::new(SchedulerCore {
                selector,
                phase: Phase::Idle,
                title_shown: false,
                tracked_scene: None,
                activation: SceneActivation::default(),
                was_active: false,
                last_mode: None,
                activation_spent: false,
                loop_id: None,
                prepared_next: None,
                suppressed_for: None,
                stop_seen: false,
            }),
        }
    }

    /// Current phase name, or `None` while a tick holds the scheduler.
    pub fn phase_label(&self) -> Option<&'static str> {
        self.core.try_lock().ok().map(|core| core.phase.label())
    }

    pub fn tick<S: PresentationSurface>(&self, surface: &mut S, now: Instant) -> TickOutcome {
        let started = Instant::now();
        let mut core = match self.core.try_lock() {
            Ok(core) => core,
            Err(TryLockError::WouldBlock) => {
                warn!("Scheduler: previous tick still running, skipping this one");
                return TickOutcome::Skipped;
            }
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        let playback = self.state.config().playback;
        self.run_tick(&mut core, surface, now, &playback);

        let budget = Duration::from_millis(playback.tick_interval_ms);
        let spent = started.elapsed();
        if spent > budget {
            warn!(
                "Scheduler: tick took {} ms, over its {} ms budget",
                spent.as_millis(),
                budget.as_millis()
            );
        }
        TickOutcome::Ran
    }

    fn run_tick<S: PresentationSurface>(
        &self,
        core: &mut SchedulerCore,
        surface: &mut S,
        now: Instant,
        playback: &PlaybackConfig,
    ) {
        let timing = TitleTiming::from_config(playback);
        let limits = StepLimits::from_config(playback);
        self.apply_mode(core, surface, playback.mode);

        if core.tracked_scene.as_deref() != Some(playback.scene_name.as_str()) {
            info!("Scheduler: tracking scene '{}'", playback.scene_name);
            core.tracked_scene = Some(playback.scene_name.clone());
            core.activation = SceneActivation::default();
        }
        let scene = playback.scene_name.as_str();

        for event in surface.take_events() {
            match event {
                SurfaceEvent::TransitionStarted { to_scene, duration } => {
                    let visible_after = is_scene_visible_under(&*surface, scene, &to_scene);
                    debug!(
                        "Scheduler: transition to '{}' over {} ms (tracked scene visible after: {})",
                        to_scene,
                        duration.as_millis(),
                        visible_after
                    );
                    core.activation.on_transition(visible_after, duration, now);
                }
            }
        }
        let visible_now = is_scene_visible(&*surface, scene);
        let scene_active = core.activation.observe(visible_now, now);
        self.track_activation(core, scene_active);
        self.state.set_scene_active(scene_active);

        let flags = self.state.flags();
        if flags.stop_requested != core.stop_seen {
            info!(
                "Scheduler: playback {}",
                if flags.stop_requested { "stopped by operator" } else { "resumed" }
            );
            core.stop_seen = flags.stop_requested;
            core.suppressed_for = None;
        }
        let cached = self.state.playable_cache_ids();
        if core
            .suppressed_for
            .as_ref()
            .is_some_and(|snapshot| *snapshot != cached)
        {
            core.suppressed_for = None;
        }

        let media = surface.media_status();
        let on_air = matches!(core.phase, Phase::Playing { .. } | Phase::Ending { .. });
        let observation = Observation {
            now,
            scene_active,
            stop_requested: flags.stop_requested,
            mode: playback.mode,
            activation_spent: core.activation_spent,
            starts_suppressed: core.suppressed_for.is_some(),
            media,
            title_desired: on_air
                && media.state == MediaState::Playing
                && title_should_show(&timing, media.elapsed, media.duration),
            title_shown: core.title_shown,
        };

        let phase = std::mem::replace(&mut core.phase, Phase::Idle);
        let (next, actions) = step(phase, &observation, &limits);
        core.phase = next;
        for action in actions {
            self.execute(core, surface, action, now, playback.mode, &timing, &limits);
        }

        if core.phase == Phase::Idle && self.state.session().is_some() {
            self.state.set_session(None);
        }
    }

    fn apply_mode<S: PresentationSurface>(
        &self,
        core: &mut SchedulerCore,
        surface: &mut S,
        mode: PlaybackMode,
    ) {
        let Some(previous) = core.last_mode else {
            core.last_mode = Some(mode);
            return;
        };
        if previous == mode {
            return;
        }
        info!(
            "Scheduler: mode changed {} -> {}, restarting playback",
            previous.as_str(),
            mode.as_str()
        );
        if core.phase != Phase::Idle {
            surface.stop_media();
        }
        if core.title_shown {
            surface.fade_overlay(0.0, Duration::ZERO);
            core.title_shown = false;
        }
        core.phase = Phase::Idle;
        core.loop_id = None;
        core.activation_spent = false;
        core.prepared_next = None;
        core.suppressed_for = None;
        core.selector.reset();
        core.last_mode = Some(mode);
        self.state.set_session(None);
        self.state.clear_play_history();
    }

    fn track_activation(&self, core: &mut SchedulerCore, scene_active: bool) {
        if scene_active && !core.was_active {
            debug!("Scheduler: scene activated");
            core.activation_spent = false;
            core.suppressed_for = None;
        } else if !scene_active && core.was_active {
            debug!("Scheduler: scene deactivated");
            core.activation_spent = false;
            core.loop_id = None;
            core.prepared_next = None;
        }
        core.was_active = scene_active;
    }

    #[allow(clippy::too_many_arguments)]
    fn execute<S: PresentationSurface>(
        &self,
        core: &mut SchedulerCore,
        surface: &mut S,
        action: Action,
        now: Instant,
        mode: PlaybackMode,
        timing: &TitleTiming,
        limits: &StepLimits,
    ) {
        match action {
            Action::StartNext { attempt } => {
                self.start_next(core, surface, now, mode, attempt, limits.max_start_attempts);
            }
            Action::Stop => {
                surface.stop_media();
                core.phase = Phase::Idle;
                self.state.set_session(None);
            }
            Action::PrepareNext => {
                if core.prepared_next.is_none() {
                    let cached = self.state.playable_cache_ids();
                    let history = self.state.play_history();
                    core.prepared_next = core.selector.select(&cached, &history);
                    if let Some(prepared) = &core.prepared_next {
                        debug!("Scheduler: prepared next item {}", prepared.id);
                    }
                }
            }
            Action::ShowTitle => {
                surface.fade_overlay(1.0, timing.fade);
                core.title_shown = true;
            }
            Action::HideTitle => {
                surface.fade_overlay(0.0, timing.fade);
                core.title_shown = false;
            }
            Action::ConsumeActivation => {
                info!("Scheduler: single item finished, waiting for the scene to be re-activated");
                core.activation_spent = true;
            }
            Action::StartTimedOut { id } => {
                warn!("Scheduler: host did not confirm playback of {} in time", id);
            }
            Action::StartAborted { id } => {
                warn!("Scheduler: host stopped {} right after it started", id);
            }
            Action::SuppressStarts => {
                warn!("Scheduler: giving up on starts until the cache or scene changes");
                core.suppressed_for = Some(self.state.playable_cache_ids());
            }
        }
    }

    fn choose(&self, core: &mut SchedulerCore, mode: PlaybackMode) -> Option<Selection> {
        let cached = self.state.playable_cache_ids();
        if mode == PlaybackMode::Loop {
            if let Some(id) = core.loop_id.clone() {
                if cached.contains(&id) {
                    return Some(Selection {
                        id,
                        reset_history: false,
                        record: false,
                    });
                }
                core.loop_id = None;
            }
        }
        if let Some(prepared) = core.prepared_next.take() {
            if cached.contains(&prepared.id) {
                return Some(prepared);
            }
        }
        let history = self.state.play_history();
        core.selector.select(&cached, &history)
    }

    fn start_next<S: PresentationSurface>(
        &self,
        core: &mut SchedulerCore,
        surface: &mut S,
        now: Instant,
        mode: PlaybackMode,
        attempt: u32,
        max_attempts: u32,
    ) {
        for _ in 0..max_attempts {
            let Some(selection) = self.choose(core, mode) else {
                info!("Scheduler: nothing playable cached yet, waiting for the pipeline");
                core.phase = Phase::Idle;
                core.suppressed_for = Some(BTreeSet::new());
                return;
            };
            let loop_id = (mode == PlaybackMode::Loop).then(|| selection.id.clone());
            let Some(entry) = self.state.begin_session(&selection.id, now, mode, loop_id) else {
                debug!("Scheduler: {} is not available right now", selection.id);
                continue;
            };
            match surface.set_media(&entry.file_path, true) {
                Ok(()) => {
                    self.commit_start(core, surface, selection, &entry, now, mode, attempt);
                    return;
                }
                Err(error) => {
                    self.state.set_session(None);
                    warn!(
                        "Scheduler: host rejected {} ({}): {}; dropping it from the cache index",
                        entry.id,
                        entry.file_path.display(),
                        error
                    );
                    self.state.remove_cache_entry(&entry.id);
                    if core.loop_id.as_deref() == Some(entry.id.as_str()) {
                        core.loop_id = None;
                    }
                }
            }
        }
        warn!(
            "Scheduler: no playable item after {} attempts, going idle",
            max_attempts
        );
        core.phase = Phase::Idle;
        core.suppressed_for = Some(self.state.playable_cache_ids());
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_start<S: PresentationSurface>(
        &self,
        core: &mut SchedulerCore,
        surface: &mut S,
        selection: Selection,
        entry: &CacheEntry,
        now: Instant,
        mode: PlaybackMode,
        attempt: u32,
    ) {
        if selection.reset_history {
            self.state.clear_play_history();
        }
        if selection.record {
            self.state.record_played(&selection.id);
        }
        surface.set_overlay_text(&overlay_text(&entry.song, &entry.artist));
        surface.fade_overlay(0.0, Duration::ZERO);
        core.title_shown = false;
        if mode == PlaybackMode::Loop {
            core.loop_id = Some(selection.id.clone());
        }
        info!(
            "Scheduler: starting {} '{}' by {} (attempt {})",
            selection.id, entry.song, entry.artist, attempt
        );
        core.phase = Phase::Starting {
            id: selection.id,
            since: now,
            attempt,
        };
    }
}
