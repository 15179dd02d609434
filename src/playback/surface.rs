//! Host presentation surface the scheduler drives.

use std::path::Path;
use std::time::Duration;

use super::scene_visibility::SceneTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    None,
    Playing,
    Ended,
    Stopped,
}

/// Snapshot of the video slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaStatus {
    pub state: MediaState,
    pub elapsed: Duration,
    /// Unknown until the host has inspected the file.
    pub duration: Option<Duration>,
}

impl MediaStatus {
    pub fn idle() -> Self {
        Self {
            state: MediaState::None,
            elapsed: Duration::ZERO,
            duration: None,
        }
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.duration
            .map(|duration| duration.saturating_sub(self.elapsed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceEvent {
    /// The program output started moving to `to_scene`.
    TransitionStarted { to_scene: String, duration: Duration },
}

/// Everything the scheduler may read from or change on the host.
pub trait PresentationSurface: SceneTree {
    fn media_status(&self) -> MediaStatus;
    /// Points the video slot at `path`. Errors when the host rejects the file.
    fn set_media(&mut self, path: &Path, restart_on_activate: bool) -> Result<(), String>;
    fn stop_media(&mut self);
    fn set_overlay_text(&mut self, text: &str);
    /// Ramps the overlay to `target_opacity` (0.0..=1.0) over `duration`.
    fn fade_overlay(&mut self, target_opacity: f32, duration: Duration);
    /// Drains visibility notifications received since the last call.
    fn take_events(&mut self) -> Vec<SurfaceEvent>;
}
