//! Playback scheduling against the host presentation surface.

pub mod playback_state;
pub mod scene_visibility;
pub mod scheduler;
pub mod selection;
pub mod surface;
pub mod title_timeline;
