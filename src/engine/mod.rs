pub mod player;
mod worker;

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::fade::FadeJob;
use crate::source::TrackRef;
use crate::watchdog::IoWatchdog;

pub use player::PlaybackEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    TrackStarted(TrackRef),
    TrackFinished(TrackRef),
    TrackPaused,
    TrackResumed,
    TrackStopped,
    PlaylistEnded,
    VolumeChanged(u8),
    Error(String),
}

/// Options for `play`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayOptions {
    pub shuffle: bool,
    pub fade_in: bool,
}

/// Position report handed to the progression hook.
#[derive(Debug, Clone)]
pub struct Progress {
    pub percent: u8,
    pub duration_secs: Option<u64>,
}

/// Caller-supplied hooks invoked synchronously from the loop thread.
/// They must not block or do heavy work; a slow progression hook is
/// logged and tolerated, never allowed to wedge playback silently.
#[derive(Default)]
pub struct EngineHooks {
    /// Called at the configured interval with the current position.
    pub on_progress: Option<Box<dyn Fn(&Progress) + Send + Sync>>,
    /// Called exactly once per successful `remove_current`, with the
    /// removed track, so external bookkeeping (trash move, database
    /// cleanup) can happen outside the engine.
    pub on_track_removed: Option<Box<dyn Fn(&TrackRef) + Send + Sync>>,
    /// Called when the volume level changes, manually or by a fade.
    pub on_volume: Option<Box<dyn Fn(u8) + Send + Sync>>,
}

/// Read-only view of the current track, maintained by the loop thread.
#[derive(Debug, Clone)]
pub struct TrackSnapshot {
    pub track: TrackRef,
    pub display_name: String,
    pub percent: u8,
    pub duration_secs: Option<u64>,
}

// Control state mutated by commands under the mutex and observed by the
// loop at iteration boundaries. Last write wins for rapid command bursts.
pub(crate) struct Control {
    pub state: PlaybackState,
    pub queue: Vec<TrackRef>,
    pub index: usize,
    pub volume: u8,
    pub fade: Option<FadeJob>,
    pub pending_seek: Option<u8>,
    // Set when a command already moved the cursor (next/prev/remove);
    // tells the loop to reopen at the cursor instead of auto-advancing.
    pub skip_requested: bool,
}

pub(crate) struct EngineShared {
    pub control: Mutex<Control>,
    pub wake: Condvar,
    pub snapshot: Mutex<Option<TrackSnapshot>>,
    pub watchdog: IoWatchdog,
}

impl EngineShared {
    pub(crate) fn new(init_volume: u8, watchdog_poll: Duration) -> Self {
        Self {
            control: Mutex::new(Control {
                state: PlaybackState::Stopped,
                queue: Vec::new(),
                index: 0,
                volume: init_volume.min(100),
                fade: None,
                pending_seek: None,
                skip_requested: false,
            }),
            wake: Condvar::new(),
            snapshot: Mutex::new(None),
            watchdog: IoWatchdog::new(watchdog_poll),
        }
    }
}
