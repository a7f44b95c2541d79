use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::worker::Worker;
use crate::engine::{
    EngineHooks, EngineShared, PlayOptions, PlaybackState, PlayerEvent, TrackSnapshot,
};
use crate::error::{Error, Result};
use crate::fade::FadeJob;
use crate::resolver::Resolver;
use crate::sink::OutputSink;
use crate::source::{MediaOpener, TrackRef};

/// The playback engine: a command surface over a single background loop
/// thread that owns the decoder and the output sink. All commands are
/// cheap mutations of shared control state; the loop observes them at
/// its next iteration boundary.
pub struct PlaybackEngine {
    config: Config,
    resolver: Resolver,
    opener: Arc<dyn MediaOpener>,
    // The loop thread takes the sink while it runs and puts it back on exit.
    sink_slot: Arc<Mutex<Option<Box<dyn OutputSink>>>>,
    shared: Arc<EngineShared>,
    hooks: Arc<EngineHooks>,
    events: Option<UnboundedSender<PlayerEvent>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    // Track playing when `stop` was called, fronted on the next default play.
    stopped_track: Mutex<Option<TrackRef>>,
}

impl PlaybackEngine {
    pub fn new(config: Config, opener: Arc<dyn MediaOpener>, sink: Box<dyn OutputSink>) -> Self {
        let resolver = Resolver::new(&config.music_dir);
        let shared = Arc::new(EngineShared::new(
            config.playback.init_volume,
            config.watchdog_poll(),
        ));
        Self {
            config,
            resolver,
            opener,
            sink_slot: Arc::new(Mutex::new(Some(sink))),
            shared,
            hooks: Arc::new(EngineHooks::default()),
            events: None,
            loop_handle: Mutex::new(None),
            stopped_track: Mutex::new(None),
        }
    }

    /// Install hooks. Must be called before the first `play`.
    pub fn set_hooks(&mut self, hooks: EngineHooks) {
        self.hooks = Arc::new(hooks);
    }

    /// Install the event channel. Must be called before the first `play`.
    pub fn set_event_sender(&mut self, sender: UnboundedSender<PlayerEvent>) {
        self.events = Some(sender);
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Start playing `items`, or the default playlist (the whole library,
    /// with the last stopped track fronted) when `items` is `None`.
    pub fn play(&self, items: Option<Vec<TrackRef>>, opts: PlayOptions) -> Result<()> {
        // Held for the whole stop/rebuild/spawn sequence: two racing plays
        // serialize here, and the loser tears down the winner cleanly.
        let mut loop_handle = self.loop_handle.lock().unwrap();
        if self.state() != PlaybackState::Stopped {
            self.stop_with(&mut loop_handle);
        }
        // Reap a loop that ended on its own (playlist end, fade-out stop).
        if let Some(handle) = loop_handle.take() {
            let _ = handle.join();
        }

        let queue = match items {
            Some(items) => {
                let mut q = items;
                if opts.shuffle {
                    q.shuffle(&mut rand::thread_rng());
                }
                q
            }
            None => {
                let mut q = self.resolver.resolve_default();
                if opts.shuffle {
                    q.shuffle(&mut rand::thread_rng());
                }
                if let Some(last) = self.stopped_track.lock().unwrap().take() {
                    match &last {
                        TrackRef::File(path) if path.is_file() => q.insert(0, last),
                        TrackRef::File(path) => {
                            warn!("previously stopped track is gone: {}", path.display())
                        }
                        TrackRef::Stream { .. } => q.insert(0, last),
                    }
                }
                q
            }
        };

        if queue.is_empty() {
            warn!("nothing to play");
            return Err(Error::EmptyPlaylist);
        }

        {
            let mut ctl = self.shared.control.lock().unwrap();
            ctl.queue = queue;
            ctl.index = 0;
            ctl.state = PlaybackState::Playing;
            ctl.pending_seek = None;
            ctl.skip_requested = false;
            ctl.fade = if opts.fade_in {
                let target = if ctl.volume > 0 {
                    ctl.volume
                } else {
                    self.config.playback.init_volume.min(100)
                };
                ctl.volume = 0;
                Some(FadeJob::fade_in(target, self.config.fade_in_duration()))
            } else {
                None
            };
        }

        let worker = Worker {
            shared: self.shared.clone(),
            opener: self.opener.clone(),
            sink_slot: self.sink_slot.clone(),
            hooks: self.hooks.clone(),
            events: self.events.clone(),
            chunk_frames: self.config.playback.chunk_frames,
            open_bound: self.config.open_bound(),
            read_bound: self.config.read_bound(),
            notify_interval: self.config.notify_interval(),
            auto_stop_after: self.config.auto_stop_after(),
            auto_stop_fade: self.config.auto_stop_fade(),
            music_dir: self.config.music_dir.clone(),
        };
        let spawned = thread::Builder::new()
            .name("playback-loop".into())
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                *loop_handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.control.lock().unwrap().state = PlaybackState::Stopped;
                Err(Error::Output(format!("failed to spawn playback loop: {e}")))
            }
        }
    }

    /// Resolve `pattern` against the library and play the matches.
    pub fn search_and_play(&self, pattern: &str) -> Result<()> {
        let tracks = self.resolver.search(pattern)?;
        if tracks.is_empty() {
            warn!("no match for '{}'", pattern);
            return Err(Error::NoMatch(pattern.to_string()));
        }
        // Recent lists keep their order; everything else is shuffled.
        let shuffle = !pattern.starts_with('#') && !crate::source::is_stream(pattern);
        self.play(
            Some(tracks),
            PlayOptions {
                shuffle,
                fade_in: false,
            },
        )
    }

    /// Toggle pause, or start a default shuffled play when stopped.
    pub fn play_pause(&self) -> Result<()> {
        let event = {
            let mut ctl = self.shared.control.lock().unwrap();
            match ctl.state {
                PlaybackState::Stopped => None,
                PlaybackState::Playing => {
                    ctl.state = PlaybackState::Paused;
                    Some(PlayerEvent::TrackPaused)
                }
                PlaybackState::Paused => {
                    ctl.state = PlaybackState::Playing;
                    Some(PlayerEvent::TrackResumed)
                }
            }
        };
        match event {
            Some(event) => {
                self.shared.wake.notify_all();
                self.emit(event);
                Ok(())
            }
            None => self.play(
                None,
                PlayOptions {
                    shuffle: true,
                    fade_in: false,
                },
            ),
        }
    }

    /// Advance to the next track; on the last track this stops playback.
    pub fn play_next(&self) {
        let stop_after = {
            let mut ctl = self.shared.control.lock().unwrap();
            if ctl.state == PlaybackState::Stopped {
                debug!("play_next ignored while stopped");
                return;
            }
            if ctl.index + 1 < ctl.queue.len() {
                ctl.index += 1;
                ctl.skip_requested = true;
                false
            } else {
                true
            }
        };
        if stop_after {
            info!("end of playlist reached");
            self.stop();
        } else {
            self.shared.wake.notify_all();
        }
    }

    /// Go back one track. At the first track this is a no-op.
    pub fn play_prev(&self) {
        {
            let mut ctl = self.shared.control.lock().unwrap();
            if ctl.state == PlaybackState::Stopped {
                debug!("play_prev ignored while stopped");
                return;
            }
            if ctl.index == 0 {
                debug!("already at the first track");
                return;
            }
            ctl.index -= 1;
            ctl.skip_requested = true;
        }
        self.shared.wake.notify_all();
    }

    /// Stop playback and wait for the loop thread to exit. Idempotent.
    pub fn stop(&self) {
        let mut handle = self.loop_handle.lock().unwrap();
        self.stop_with(&mut handle);
    }

    // The actual stop sequence, run while holding the loop-handle lock so
    // it cannot interleave with a concurrent `play` rebuilding the session.
    fn stop_with(&self, handle: &mut Option<JoinHandle<()>>) {
        let remembered = {
            let mut ctl = self.shared.control.lock().unwrap();
            let current = if ctl.state != PlaybackState::Stopped {
                ctl.queue.get(ctl.index).cloned()
            } else {
                None
            };
            ctl.state = PlaybackState::Stopped;
            ctl.fade = None;
            ctl.pending_seek = None;
            ctl.skip_requested = false;
            current
        };
        self.shared.wake.notify_all();
        // Unblock a wedged open/read instead of waiting out its bound.
        self.shared.watchdog.cancel_active();
        if let Some(handle) = handle.take() {
            debug!("waiting for playback loop to exit");
            let _ = handle.join();
        }
        if let Some(track) = remembered {
            *self.stopped_track.lock().unwrap() = Some(track);
        }
    }

    /// Seek within the current track. Out-of-range percentages are clamped.
    pub fn seek(&self, percent: i32) -> Result<()> {
        let clamped = percent.clamp(0, 100) as u8;
        let mut ctl = self.shared.control.lock().unwrap();
        if ctl.state == PlaybackState::Stopped {
            return Err(Error::InvalidSeek("nothing is playing".into()));
        }
        if ctl.queue.get(ctl.index).is_some_and(|t| t.is_stream()) {
            return Err(Error::InvalidSeek("cannot seek in a stream".into()));
        }
        ctl.pending_seek = Some(clamped);
        drop(ctl);
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Set the volume level, clamped to [0, 100]. Cancels any running fade.
    /// Returns the applied level.
    pub fn set_volume(&self, level: i32) -> u8 {
        let clamped = level.clamp(0, 100) as u8;
        {
            let mut ctl = self.shared.control.lock().unwrap();
            ctl.volume = clamped;
            ctl.fade = None;
        }
        if let Some(cb) = &self.hooks.on_volume {
            cb(clamped);
        }
        self.emit(PlayerEvent::VolumeChanged(clamped));
        clamped
    }

    /// Ramp the volume from zero up to its pre-fade level.
    pub fn start_volume_fade_in(&self, duration: Duration) {
        let mut ctl = self.shared.control.lock().unwrap();
        let target = if ctl.volume > 0 {
            ctl.volume
        } else {
            self.config.playback.init_volume.min(100)
        };
        info!("fading in to {} over {:?}", target, duration);
        ctl.volume = 0;
        ctl.fade = Some(FadeJob::fade_in(target, duration));
    }

    /// Ramp the volume down to silence, then stop playback.
    pub fn start_volume_fade_out(&self, duration: Duration) {
        let mut ctl = self.shared.control.lock().unwrap();
        info!("fading out from {} over {:?}", ctl.volume, duration);
        ctl.fade = Some(FadeJob::fade_out(ctl.volume, duration));
    }

    /// Cancel a running fade, freezing the volume at its current level.
    pub fn stop_volume_fade(&self) {
        let mut ctl = self.shared.control.lock().unwrap();
        if ctl.fade.take().is_some() {
            debug!("fade cancelled at level {}", ctl.volume);
        }
    }

    /// Remove the current track from the queue and move on. Returns the
    /// removed track, or `None` when nothing is playing. The removal hook
    /// fires exactly once per successful call.
    pub fn remove_current(&self) -> Option<TrackRef> {
        let (removed, stop_after) = {
            let mut ctl = self.shared.control.lock().unwrap();
            if ctl.state == PlaybackState::Stopped || ctl.queue.is_empty() {
                debug!("remove_current ignored while stopped");
                return None;
            }
            let idx = ctl.index;
            let track = ctl.queue.remove(idx);
            if ctl.index < ctl.queue.len() {
                ctl.skip_requested = true;
                (track, false)
            } else {
                // Removed the last entry, nothing left to play after it.
                (track, true)
            }
        };
        info!("removed from queue: {}", removed.location());
        if let Some(cb) = &self.hooks.on_track_removed {
            cb(&removed);
        }
        if stop_after {
            self.stop();
            // Do not resurrect a track the caller just removed.
            self.stopped_track.lock().unwrap().take();
        } else {
            self.shared.wake.notify_all();
        }
        Some(removed)
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.control.lock().unwrap().state
    }

    pub fn volume(&self) -> u8 {
        self.shared.control.lock().unwrap().volume
    }

    /// The track at the cursor, `None` when stopped.
    pub fn current(&self) -> Option<TrackRef> {
        let ctl = self.shared.control.lock().unwrap();
        if ctl.state == PlaybackState::Stopped {
            None
        } else {
            ctl.queue.get(ctl.index).cloned()
        }
    }

    /// Display name of the track at the cursor, empty when stopped.
    pub fn current_display_name(&self) -> String {
        self.current()
            .map(|track| track.display_name(&self.config.music_dir))
            .unwrap_or_default()
    }

    /// Loop-maintained view of the playing track (name, position, duration).
    pub fn snapshot(&self) -> Option<TrackSnapshot> {
        self.shared.snapshot.lock().unwrap().clone()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.control.lock().unwrap().queue.len()
    }

    fn emit(&self, event: PlayerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
