//! Console-driven stand-in for the production host.
//!
//! Keeps a scene graph and a simulated video slot whose clock only moves when
//! [`HeadlessHost::advance_to`] is called, so the scheduler sees a
//! deterministic media position.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::playback::scene_visibility::{NestedUse, SceneTree};
use crate::playback::surface::{MediaState, MediaStatus, PresentationSurface, SurfaceEvent};

use super::media_probe::spawn_duration_probe;

struct LoadedMedia {
    path: PathBuf,
    /// Simulated position at `anchor`.
    position: Duration,
    anchor: Instant,
    duration: Option<Duration>,
    probe: Option<Receiver<Result<Duration, String>>>,
    invalid: bool,
}

#[derive(Debug, Clone, Copy)]
struct OverlayFade {
    from: f32,
    to: f32,
    started: Instant,
    duration: Duration,
}

impl OverlayFade {
    fn opacity_at(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return self.to;
        }
        let progress = (now.saturating_duration_since(self.started).as_secs_f32()
            / self.duration.as_secs_f32())
        .clamp(0.0, 1.0);
        self.from + (self.to - self.from) * progress
    }
}

pub struct HeadlessHost {
    now: Instant,
    program: Option<String>,
    /// child scene -> parent scene -> source visible
    nests: BTreeMap<String, BTreeMap<String, bool>>,
    media: Option<LoadedMedia>,
    overlay_text: String,
    fade: OverlayFade,
    events: Vec<SurfaceEvent>,
}

impl HeadlessHost {
    pub fn new(now: Instant, program: Option<String>) -> Self {
        Self {
            now,
            program,
            nests: BTreeMap::new(),
            media: None,
            overlay_text: String::new(),
            fade: OverlayFade {
                from: 0.0,
                to: 0.0,
                started: now,
                duration: Duration::ZERO,
            },
            events: Vec::new(),
        }
    }

    /// Moves the simulated clock forward and collects finished duration probes.
    pub fn advance_to(&mut self, now: Instant) {
        if now > self.now {
            self.now = now;
        }
        let Some(media) = self.media.as_mut() else {
            return;
        };
        let Some(probe) = media.probe.as_ref() else {
            return;
        };
        match probe.try_recv() {
            Ok(Ok(duration)) => {
                debug!("Host: {} runs {:?}", media.path.display(), duration);
                media.duration = Some(duration);
                media.probe = None;
            }
            Ok(Err(error)) => {
                warn!("Host: cannot play {}: {}", media.path.display(), error);
                media.invalid = true;
                media.probe = None;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                media.invalid = true;
                media.probe = None;
            }
        }
    }

    /// Cuts the program output, as if the operator clicked a scene.
    pub fn cut_to(&mut self, scene: &str) {
        self.transition_to(scene, Duration::ZERO);
    }

    pub fn transition_to(&mut self, scene: &str, duration: Duration) {
        info!("Host: program -> '{}' ({} ms)", scene, duration.as_millis());
        self.program = Some(scene.to_string());
        self.events.push(SurfaceEvent::TransitionStarted {
            to_scene: scene.to_string(),
            duration,
        });
    }

    pub fn nest(&mut self, parent: &str, child: &str, visible: bool) {
        self.nests
            .entry(child.to_string())
            .or_default()
            .insert(parent.to_string(), visible);
    }

    pub fn seek(&mut self, position: Duration) -> Result<(), String> {
        let now = self.now;
        let media = self
            .media
            .as_mut()
            .ok_or_else(|| "nothing is loaded".to_string())?;
        media.position = match media.duration {
            Some(duration) => position.min(duration),
            None => position,
        };
        media.anchor = now;
        Ok(())
    }

    pub fn overlay_opacity(&self) -> f32 {
        self.fade.opacity_at(self.now)
    }

    pub fn overlay_text(&self) -> &str {
        &self.overlay_text
    }

    pub fn loaded_path(&self) -> Option<&Path> {
        self.media.as_ref().map(|media| media.path.as_path())
    }

    pub fn describe(&self) -> String {
        let status = self.media_status();
        let position = match status.duration {
            Some(duration) => format!("{:.1}/{:.1}s", status.elapsed.as_secs_f64(), duration.as_secs_f64()),
            None => format!("{:.1}s", status.elapsed.as_secs_f64()),
        };
        format!(
            "program={} media={:?} {} file={} title={:?} opacity={:.2}",
            self.program.as_deref().unwrap_or("<none>"),
            status.state,
            position,
            self.loaded_path()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<none>".to_string()),
            self.overlay_text(),
            self.overlay_opacity()
        )
    }
}

impl SceneTree for HeadlessHost {
    fn program_scene(&self) -> Option<String> {
        self.program.clone()
    }

    fn nested_in(&self, scene: &str) -> Vec<NestedUse> {
        self.nests
            .get(scene)
            .map(|parents| {
                parents
                    .iter()
                    .map(|(parent, visible)| NestedUse {
                        parent: parent.clone(),
                        visible: *visible,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl PresentationSurface for HeadlessHost {
    fn media_status(&self) -> MediaStatus {
        let Some(media) = self.media.as_ref() else {
            return MediaStatus::idle();
        };
        if media.invalid {
            return MediaStatus {
                state: MediaState::Stopped,
                elapsed: Duration::ZERO,
                duration: None,
            };
        }
        let elapsed = media.position + self.now.saturating_duration_since(media.anchor);
        match media.duration {
            Some(duration) if elapsed >= duration => MediaStatus {
                state: MediaState::Ended,
                elapsed: duration,
                duration: Some(duration),
            },
            duration => MediaStatus {
                state: MediaState::Playing,
                elapsed,
                duration,
            },
        }
    }

    fn set_media(&mut self, path: &Path, restart_on_activate: bool) -> Result<(), String> {
        if !path.is_file() {
            return Err(format!("{} is not a file", path.display()));
        }
        debug!(
            "Host: loading {} (restart on activate: {})",
            path.display(),
            restart_on_activate
        );
        self.media = Some(LoadedMedia {
            path: path.to_path_buf(),
            position: Duration::ZERO,
            anchor: self.now,
            duration: None,
            probe: Some(spawn_duration_probe(path.to_path_buf())),
            invalid: false,
        });
        Ok(())
    }

    fn stop_media(&mut self) {
        if let Some(media) = self.media.take() {
            debug!("Host: stopped {}", media.path.display());
        }
    }

    fn set_overlay_text(&mut self, text: &str) {
        self.overlay_text = text.to_string();
    }

    fn fade_overlay(&mut self, target_opacity: f32, duration: Duration) {
        self.fade = OverlayFade {
            from: self.overlay_opacity(),
            to: target_opacity.clamp(0.0, 1.0),
            started: self.now,
            duration,
        };
    }

    fn take_events(&mut self) -> Vec<SurfaceEvent> {
        std::mem::take(&mut self.events)
    }
}
