//! When the title overlay should be on screen for the current media position.

use std::time::Duration;

use crate::config::PlaybackConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TitleTiming {
    pub show_delay: Duration,
    pub hide_before_end: Duration,
    pub fade: Duration,
}

impl TitleTiming {
    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            show_delay: Duration::from_millis(config.title_show_delay_ms),
            hide_before_end: Duration::from_millis(config.title_hide_before_end_ms),
            fade: Duration::from_millis(config.title_fade_ms),
        }
    }
}

impl Default for TitleTiming {
    fn default() -> Self {
        Self::from_config(&PlaybackConfig::default())
    }
}

/// Pure in elapsed/duration, so a seek in either direction is picked up on
/// the next evaluation.
pub fn title_should_show(timing: &TitleTiming, elapsed: Duration, duration: Option<Duration>) -> bool {
    if elapsed < timing.show_delay {
        return false;
    }
    match duration {
        Some(duration) => duration.saturating_sub(elapsed) > timing.hide_before_end,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::{title_should_show, TitleTiming};
    use std::time::Duration;

    fn secs(value: f64) -> Duration {
        Duration::from_secs_f64(value)
    }

    #[test]
    fn test_title_appears_after_delay_and_leaves_before_end() {
        let timing = TitleTiming::default();
        let length = Some(secs(60.0));
        assert!(!title_should_show(&timing, secs(1.0), length));
        assert!(title_should_show(&timing, secs(1.5), length));
        assert!(title_should_show(&timing, secs(56.0), length));
        assert!(!title_should_show(&timing, secs(56.5), length));
        assert!(!title_should_show(&timing, secs(60.0), length));
    }

    #[test]
    fn test_seeks_are_recomputed_from_position() {
        let timing = TitleTiming::default();
        let length = Some(secs(30.0));
        assert!(!title_should_show(&timing, secs(28.0), length));
        // Seeking back into the body shows it again.
        assert!(title_should_show(&timing, secs(10.0), length));
        // Seeking to the very start hides it until the delay passes again.
        assert!(!title_should_show(&timing, secs(0.2), length));
    }

    #[test]
    fn test_unknown_duration_never_hides_for_the_end() {
        let timing = TitleTiming::default();
        assert!(title_should_show(&timing, secs(3_600.0), None));
    }

    #[test]
    fn test_media_shorter_than_both_windows_never_shows() {
        let timing = TitleTiming::default();
        let length = Some(secs(4.0));
        for tenth in 0..=40 {
            assert!(!title_should_show(&timing, secs(f64::from(tenth) / 10.0), length));
        }
    }
}
