//! Pure transition function of the playback state machine.
//!
//! `step` never touches the host or the store. It looks at one observation of
//! the world and returns the next phase plus the actions the scheduler must
//! carry out, in order. Starting a new item is always requested through
//! [`Action::StartNext`]; the scheduler moves the phase to `Starting` only when
//! the host accepted the file.

use std::time::{Duration, Instant};

use crate::config::{PlaybackConfig, PlaybackMode};

use super::surface::{MediaState, MediaStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// Source handed to the host, waiting for it to report `Playing`.
    Starting {
        id: String,
        since: Instant,
        attempt: u32,
    },
    /// Confirmed by the host. `attempt` is kept until the item proves it can
    /// actually be decoded.
    Playing {
        id: String,
        attempt: u32,
    },
    /// Close to the end; the next selection has been prepared.
    Ending {
        id: String,
    },
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting { .. } => "starting",
            Self::Playing { .. } => "playing",
            Self::Ending { .. } => "ending",
        }
    }

    pub fn current_id(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Starting { id, .. } | Self::Playing { id, .. } | Self::Ending { id } => Some(id),
        }
    }
}

/// Everything `step` is allowed to know about one tick.
#[derive(Debug, Clone)]
pub struct Observation {
    pub now: Instant,
    pub scene_active: bool,
    pub stop_requested: bool,
    pub mode: PlaybackMode,
    /// Single mode already played its item for this activation.
    pub activation_spent: bool,
    /// Start attempts were exhausted and nothing changed since.
    pub starts_suppressed: bool,
    pub media: MediaStatus,
    pub title_desired: bool,
    pub title_shown: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLimits {
    pub start_timeout: Duration,
    pub max_start_attempts: u32,
    /// Remaining time at which the phase moves to `Ending`.
    pub ending_window: Duration,
}

impl StepLimits {
    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            start_timeout: Duration::from_secs(5),
            max_start_attempts: config.max_start_attempts.max(1),
            ending_window: Duration::from_millis(config.title_hide_before_end_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Select (or reuse the loop item) and hand it to the host.
    StartNext { attempt: u32 },
    Stop,
    /// Pre-compute the next selection while the current item finishes.
    PrepareNext,
    ShowTitle,
    HideTitle,
    /// Single mode: no further starts until the scene is re-activated.
    ConsumeActivation,
    StartTimedOut { id: String },
    /// The host stopped the item on its own right after it started.
    StartAborted { id: String },
    /// Stop trying until the cache or the activation changes.
    SuppressStarts,
}

fn title_action(observation: &Observation, actions: &mut Vec<Action>) {
    if observation.title_desired && !observation.title_shown {
        actions.push(Action::ShowTitle);
    } else if !observation.title_desired && observation.title_shown {
        actions.push(Action::HideTitle);
    }
}

fn hide_title(observation: &Observation, actions: &mut Vec<Action>) {
    if observation.title_shown {
        actions.push(Action::HideTitle);
    }
}

fn retry_or_suppress(attempt: u32, limits: &StepLimits, actions: &mut Vec<Action>) {
    if attempt < limits.max_start_attempts {
        actions.push(Action::StartNext {
            attempt: attempt + 1,
        });
    } else {
        actions.push(Action::Stop);
        actions.push(Action::SuppressStarts);
    }
}

/// A stop the scheduler did not ask for, before the host knew the length or
/// within the start window, means the file could not be played.
fn stopped_on_start(media: &MediaStatus, limits: &StepLimits) -> bool {
    media.duration.is_none() || media.elapsed < limits.start_timeout
}

pub fn step(phase: Phase, observation: &Observation, limits: &StepLimits) -> (Phase, Vec<Action>) {
    let mut actions = Vec::new();

    if !observation.scene_active || observation.stop_requested {
        if phase != Phase::Idle {
            actions.push(Action::Stop);
        }
        hide_title(observation, &mut actions);
        return (Phase::Idle, actions);
    }

    match phase {
        Phase::Idle => {
            hide_title(observation, &mut actions);
            if !observation.activation_spent && !observation.starts_suppressed {
                actions.push(Action::StartNext { attempt: 1 });
            }
            (Phase::Idle, actions)
        }
        Phase::Starting { id, since, attempt } => {
            match observation.media.state {
                MediaState::Playing => return (Phase::Playing { id, attempt }, actions),
                MediaState::Stopped => {
                    actions.push(Action::StartAborted { id });
                    retry_or_suppress(attempt, limits, &mut actions);
                    return (Phase::Idle, actions);
                }
                MediaState::None | MediaState::Ended => {}
            }
            if observation.now.saturating_duration_since(since) < limits.start_timeout {
                return (Phase::Starting { id, since, attempt }, actions);
            }
            actions.push(Action::StartTimedOut { id });
            retry_or_suppress(attempt, limits, &mut actions);
            (Phase::Idle, actions)
        }
        Phase::Playing { id, attempt } => on_air(id, Some(attempt), observation, limits, actions),
        Phase::Ending { id } => on_air(id, None, observation, limits, actions),
    }
}

/// `attempt` is `None` once the item reached its ending window.
fn on_air(
    id: String,
    attempt: Option<u32>,
    observation: &Observation,
    limits: &StepLimits,
    mut actions: Vec<Action>,
) -> (Phase, Vec<Action>) {
    match observation.media.state {
        MediaState::Playing => {
            title_action(observation, &mut actions);
            let near_end = observation
                .media
                .remaining()
                .is_some_and(|remaining| remaining <= limits.ending_window);
            if !near_end {
                let attempt = attempt.unwrap_or(1);
                return (Phase::Playing { id, attempt }, actions);
            }
            if attempt.is_some() && observation.mode == PlaybackMode::Continuous {
                actions.push(Action::PrepareNext);
            }
            (Phase::Ending { id }, actions)
        }
        MediaState::Ended => {
            hide_title(observation, &mut actions);
            match observation.mode {
                PlaybackMode::Continuous | PlaybackMode::Loop => {
                    actions.push(Action::StartNext { attempt: 1 });
                }
                PlaybackMode::Single => {
                    actions.push(Action::Stop);
                    actions.push(Action::ConsumeActivation);
                }
            }
            (Phase::Idle, actions)
        }
        MediaState::Stopped | MediaState::None => {
            hide_title(observation, &mut actions);
            if let Some(attempt) = attempt {
                if stopped_on_start(&observation.media, limits) {
                    actions.push(Action::StartAborted { id });
                    retry_or_suppress(attempt, limits, &mut actions);
                }
            }
            (Phase::Idle, actions)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{step, Action, Observation, Phase, StepLimits};
    use crate::config::PlaybackMode;
    use crate::playback::surface::{MediaState, MediaStatus};
    use std::time::{Duration, Instant};

    fn limits() -> StepLimits {
        StepLimits {
            start_timeout: Duration::from_secs(5),
            max_start_attempts: 3,
            ending_window: Duration::from_millis(3_500),
        }
    }

    fn observe(now: Instant, state: MediaState, elapsed: u64, duration: u64) -> Observation {
        Observation {
            now,
            scene_active: true,
            stop_requested: false,
            mode: PlaybackMode::Continuous,
            activation_spent: false,
            starts_suppressed: false,
            media: MediaStatus {
                state,
                elapsed: Duration::from_secs(elapsed),
                duration: Some(Duration::from_secs(duration)),
            },
            title_desired: false,
            title_shown: false,
        }
    }

    fn playing(id: &str) -> Phase {
        Phase::Playing {
            id: id.to_string(),
            attempt: 1,
        }
    }

    #[test]
    fn test_idle_and_active_requests_a_start() {
        let now = Instant::now();
        let (next, actions) = step(Phase::Idle, &observe(now, MediaState::None, 0, 0), &limits());
        assert_eq!(next, Phase::Idle);
        assert_eq!(actions, vec![Action::StartNext { attempt: 1 }]);
    }

    #[test]
    fn test_inactive_scene_or_stop_request_forces_idle() {
        let now = Instant::now();
        let mut observation = observe(now, MediaState::Playing, 10, 60);
        observation.scene_active = false;
        observation.title_shown = true;
        let (next, actions) = step(playing("a"), &observation, &limits());
        assert_eq!(next, Phase::Idle);
        assert_eq!(actions, vec![Action::Stop, Action::HideTitle]);

        let mut observation = observe(now, MediaState::Playing, 10, 60);
        observation.stop_requested = true;
        let (next, actions) = step(Phase::Idle, &observation, &limits());
        assert_eq!(next, Phase::Idle);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_starting_becomes_playing_on_confirmation() {
        let now = Instant::now();
        let starting = Phase::Starting {
            id: "a".to_string(),
            since: now,
            attempt: 1,
        };
        let (next, actions) = step(starting, &observe(now, MediaState::Playing, 0, 60), &limits());
        assert_eq!(next, playing("a"));
        assert!(actions.is_empty());
    }

    #[test]
    fn test_start_timeouts_retry_then_suppress() {
        let since = Instant::now();
        let later = since + Duration::from_secs(6);
        let starting = |attempt| Phase::Starting {
            id: "a".to_string(),
            since,
            attempt,
        };

        let early = observe(since + Duration::from_secs(1), MediaState::None, 0, 0);
        let (next, waiting) = step(starting(1), &early, &limits());
        assert_eq!(next, starting(1));
        assert!(waiting.is_empty());

        let (next, actions) = step(starting(1), &observe(later, MediaState::None, 0, 0), &limits());
        assert_eq!(next, Phase::Idle);
        assert_eq!(
            actions,
            vec![
                Action::StartTimedOut { id: "a".to_string() },
                Action::StartNext { attempt: 2 }
            ]
        );

        let (next, actions) = step(starting(3), &observe(later, MediaState::None, 0, 0), &limits());
        assert_eq!(next, Phase::Idle);
        assert_eq!(
            actions,
            vec![
                Action::StartTimedOut { id: "a".to_string() },
                Action::Stop,
                Action::SuppressStarts
            ]
        );

        let mut suppressed = observe(later, MediaState::None, 0, 0);
        suppressed.starts_suppressed = true;
        let (_, actions) = step(Phase::Idle, &suppressed, &limits());
        assert!(actions.is_empty());
    }

    #[test]
    fn test_near_end_prepares_next_once_and_seek_back_returns_to_playing() {
        let now = Instant::now();
        let (next, actions) = step(playing("a"), &observe(now, MediaState::Playing, 57, 60), &limits());
        assert_eq!(next, Phase::Ending { id: "a".to_string() });
        assert_eq!(actions, vec![Action::PrepareNext]);

        let (next, actions) = step(next, &observe(now, MediaState::Playing, 58, 60), &limits());
        assert_eq!(next, Phase::Ending { id: "a".to_string() });
        assert!(actions.is_empty());

        let (next, _) = step(next, &observe(now, MediaState::Playing, 20, 60), &limits());
        assert_eq!(next, playing("a"));
    }

    #[test]
    fn test_ended_follows_the_mode() {
        let now = Instant::now();
        let mut observation = observe(now, MediaState::Ended, 60, 60);

        let (next, actions) = step(playing("a"), &observation, &limits());
        assert_eq!(next, Phase::Idle);
        assert_eq!(actions, vec![Action::StartNext { attempt: 1 }]);

        observation.mode = PlaybackMode::Loop;
        let (_, actions) = step(Phase::Ending { id: "a".to_string() }, &observation, &limits());
        assert_eq!(actions, vec![Action::StartNext { attempt: 1 }]);

        observation.mode = PlaybackMode::Single;
        let (next, actions) = step(playing("a"), &observation, &limits());
        assert_eq!(next, Phase::Idle);
        assert_eq!(actions, vec![Action::Stop, Action::ConsumeActivation]);

        observation.activation_spent = true;
        observation.media.state = MediaState::Stopped;
        let (_, actions) = step(Phase::Idle, &observation, &limits());
        assert!(actions.is_empty(), "single mode waits for re-activation");
    }

    #[test]
    fn test_prepare_next_only_in_continuous_mode() {
        let now = Instant::now();
        let mut observation = observe(now, MediaState::Playing, 58, 60);
        observation.mode = PlaybackMode::Loop;
        let (next, actions) = step(playing("a"), &observation, &limits());
        assert_eq!(next, Phase::Ending { id: "a".to_string() });
        assert!(actions.is_empty());
    }

    #[test]
    fn test_title_follows_desired_visibility() {
        let now = Instant::now();
        let mut observation = observe(now, MediaState::Playing, 5, 60);
        observation.title_desired = true;
        let (_, actions) = step(playing("a"), &observation, &limits());
        assert_eq!(actions, vec![Action::ShowTitle]);

        observation.title_shown = true;
        observation.title_desired = false;
        let (_, actions) = step(playing("a"), &observation, &limits());
        assert_eq!(actions, vec![Action::HideTitle]);
    }

    #[test]
    fn test_host_stopping_the_media_returns_to_idle() {
        let now = Instant::now();
        let (next, actions) = step(playing("a"), &observe(now, MediaState::Stopped, 30, 60), &limits());
        assert_eq!(next, Phase::Idle);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_stop_right_after_start_counts_as_a_failed_attempt() {
        let now = Instant::now();
        let mut undecodable = observe(now, MediaState::Stopped, 0, 0);
        undecodable.media.duration = None;

        let (next, actions) = step(playing("bad"), &undecodable, &limits());
        assert_eq!(next, Phase::Idle);
        assert_eq!(
            actions,
            vec![
                Action::StartAborted { id: "bad".to_string() },
                Action::StartNext { attempt: 2 }
            ]
        );

        let last = Phase::Playing {
            id: "bad".to_string(),
            attempt: 3,
        };
        let (_, actions) = step(last, &undecodable, &limits());
        assert_eq!(
            actions,
            vec![
                Action::StartAborted { id: "bad".to_string() },
                Action::Stop,
                Action::SuppressStarts
            ]
        );

        let starting = Phase::Starting {
            id: "bad".to_string(),
            since: now,
            attempt: 1,
        };
        let (next, actions) = step(starting, &undecodable, &limits());
        assert_eq!(next, Phase::Idle);
        assert_eq!(
            actions,
            vec![
                Action::StartAborted { id: "bad".to_string() },
                Action::StartNext { attempt: 2 }
            ]
        );
    }

    #[test]
    fn test_attempt_carries_from_starting_into_playing() {
        let now = Instant::now();
        let starting = Phase::Starting {
            id: "a".to_string(),
            since: now,
            attempt: 2,
        };
        let (next, _) = step(starting, &observe(now, MediaState::Playing, 0, 60), &limits());
        assert_eq!(
            next,
            Phase::Playing {
                id: "a".to_string(),
                attempt: 2
            }
        );
    }
}
