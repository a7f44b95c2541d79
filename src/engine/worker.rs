use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::engine::{EngineHooks, EngineShared, PlaybackState, PlayerEvent, Progress, TrackSnapshot};
use crate::error::Error;
use crate::fade::FadeJob;
use crate::sink::OutputSink;
use crate::source::{MediaOpener, MediaSource};
use crate::watchdog::InterruptToken;

// Progression hooks are expected to return well within this budget;
// slower ones are logged so a stalling UI callback is visible.
const HOOK_BUDGET: Duration = Duration::from_millis(50);

/// The decode/write loop. One instance per `play` session, running on the
/// "playback-loop" thread until the queue ends or a stop is observed.
pub(crate) struct Worker {
    pub shared: Arc<EngineShared>,
    pub opener: Arc<dyn MediaOpener>,
    pub sink_slot: Arc<Mutex<Option<Box<dyn OutputSink>>>>,
    pub hooks: Arc<EngineHooks>,
    pub events: Option<UnboundedSender<PlayerEvent>>,
    pub chunk_frames: usize,
    pub open_bound: Duration,
    pub read_bound: Duration,
    pub notify_interval: Duration,
    // Session timer: after this long the loop fades out and stops on its
    // own. Zero disables it.
    pub auto_stop_after: Duration,
    pub auto_stop_fade: Duration,
    pub music_dir: PathBuf,
}

impl Worker {
    pub(crate) fn run(self) {
        let mut sink = match self.sink_slot.lock().unwrap().take() {
            Some(sink) => sink,
            None => {
                error!("output sink unavailable, another loop still owns it");
                self.shared.control.lock().unwrap().state = PlaybackState::Stopped;
                return;
            }
        };
        if let Err(e) = sink.open() {
            error!("failed to open output: {}", e);
            self.emit(PlayerEvent::Error(e.to_string()));
            self.shared.control.lock().unwrap().state = PlaybackState::Stopped;
            *self.sink_slot.lock().unwrap() = Some(sink);
            return;
        }

        // Consecutive failed opens; reaching the queue length means no
        // entry in the playlist is playable.
        let mut failed_opens = 0usize;
        let session_started = Instant::now();
        let mut auto_stop_fired = false;

        loop {
            let track = {
                let mut ctl = self.shared.control.lock().unwrap();
                if ctl.state == PlaybackState::Stopped || ctl.queue.is_empty() {
                    break;
                }
                if ctl.index >= ctl.queue.len() {
                    ctl.index = 0;
                }
                ctl.skip_requested = false;
                ctl.queue[ctl.index].clone()
            };

            debug!("opening {}", track.location());
            let token = InterruptToken::new();
            let opened = self.shared.watchdog.guard(self.open_bound, token.clone(), || {
                self.opener.open(&track, &token)
            });

            let mut source = match opened {
                Ok(source) => {
                    failed_opens = 0;
                    source
                }
                Err(e) => {
                    // A stop cancels the active guarded call; not a failure.
                    if self.stop_requested() {
                        continue;
                    }
                    failed_opens += 1;
                    let err = match e {
                        Error::IoTimeout => Error::OpenTimeout(track.location()),
                        other => other,
                    };
                    warn!("skipping unplayable track: {}", err);
                    self.emit(PlayerEvent::Error(err.to_string()));

                    let mut playlist_ended = false;
                    {
                        let mut ctl = self.shared.control.lock().unwrap();
                        if ctl.state == PlaybackState::Stopped {
                            continue;
                        }
                        if failed_opens >= ctl.queue.len() {
                            error!("no playable track in the playlist");
                            self.emit(PlayerEvent::Error(Error::NoPlayableTrack.to_string()));
                            ctl.state = PlaybackState::Stopped;
                        } else if ctl.index + 1 < ctl.queue.len() {
                            ctl.index += 1;
                        } else {
                            ctl.state = PlaybackState::Stopped;
                            playlist_ended = true;
                        }
                    }
                    if playlist_ended {
                        self.emit(PlayerEvent::PlaylistEnded);
                    }
                    continue;
                }
            };

            if let Err(e) = sink.configure(&source.spec()) {
                error!("failed to configure output: {}", e);
                self.emit(PlayerEvent::Error(e.to_string()));
                source.close();
                self.shared.control.lock().unwrap().state = PlaybackState::Stopped;
                continue;
            }

            info!("playing: {}", track.location());
            *self.shared.snapshot.lock().unwrap() = Some(TrackSnapshot {
                track: track.clone(),
                display_name: track.display_name(&self.music_dir),
                percent: source.percent_pos(),
                duration_secs: source.duration_secs(),
            });
            self.emit(PlayerEvent::TrackStarted(track.clone()));

            let finished =
                self.play_track(source.as_mut(), sink.as_mut(), session_started, &mut auto_stop_fired);
            source.close();
            if finished {
                self.emit(PlayerEvent::TrackFinished(track));
            }

            let mut playlist_ended = false;
            {
                let mut ctl = self.shared.control.lock().unwrap();
                if ctl.state == PlaybackState::Stopped || ctl.skip_requested {
                    // Stop is handled at the top; a skip already moved the cursor.
                    continue;
                }
                if ctl.index + 1 < ctl.queue.len() {
                    ctl.index += 1;
                } else {
                    ctl.state = PlaybackState::Stopped;
                    playlist_ended = true;
                }
            }
            if playlist_ended {
                self.emit(PlayerEvent::PlaylistEnded);
            }
        }

        debug!("playback loop exiting");
        sink.close();
        *self.sink_slot.lock().unwrap() = Some(sink);
        *self.shared.snapshot.lock().unwrap() = None;
        {
            let mut ctl = self.shared.control.lock().unwrap();
            ctl.state = PlaybackState::Stopped;
            ctl.fade = None;
            ctl.pending_seek = None;
            ctl.skip_requested = false;
        }
        self.emit(PlayerEvent::TrackStopped);
    }

    /// Decode and write one track. Returns true when the track reached its
    /// natural end, false when playback was interrupted or failed.
    fn play_track(
        &self,
        source: &mut dyn MediaSource,
        sink: &mut dyn OutputSink,
        session_started: Instant,
        auto_stop_fired: &mut bool,
    ) -> bool {
        let mut last_notify: Option<Instant> = None;
        let mut pushed_volume: Option<u8> = None;

        self.notify_progress(source, &mut last_notify, true);

        loop {
            self.maybe_auto_stop(session_started, auto_stop_fired);

            let pending_seek = {
                let mut ctl = self.shared.control.lock().unwrap();
                while ctl.state == PlaybackState::Paused && !ctl.skip_requested {
                    ctl = self.shared.wake.wait(ctl).unwrap();
                }
                if ctl.state == PlaybackState::Stopped || ctl.skip_requested {
                    return false;
                }
                ctl.pending_seek.take()
            };
            // Respawning a decoder can take a while, never do it under the lock.
            if let Some(percent) = pending_seek {
                info!("seeking to {}%", percent);
                if let Err(e) = source.seek_percent(percent) {
                    warn!("seek failed: {}", e);
                    self.emit(PlayerEvent::Error(e.to_string()));
                }
            }

            let token = InterruptToken::new();
            token.set_abort(source.abort_handle());
            let read = self.shared.watchdog.guard(self.read_bound, token.clone(), || {
                source.read_next_chunk(self.chunk_frames, &token)
            });

            let mut chunk = match read {
                Ok(Some(chunk)) => chunk,
                Ok(None) => return true,
                Err(e) => {
                    if self.stop_requested() {
                        return false;
                    }
                    warn!("read failed, giving up on this track: {}", e);
                    self.emit(PlayerEvent::Error(e.to_string()));
                    return false;
                }
            };

            // Volume is applied in software at chunk granularity; fades
            // resolve to a level against the wall clock here.
            let (level, fading) = self.current_level();
            chunk.apply_gain(level as f32 / 100.0);
            if pushed_volume != Some(level) {
                sink.set_volume(level);
                // Manual changes notify from the command thread; fade
                // steps are only visible here.
                if fading && pushed_volume.is_some() {
                    if let Some(cb) = &self.hooks.on_volume {
                        cb(level);
                    }
                }
                pushed_volume = Some(level);
            }

            if let Err(e) = sink.write_chunk(&chunk) {
                error!("output write failed: {}", e);
                self.emit(PlayerEvent::Error(e.to_string()));
                self.shared.control.lock().unwrap().state = PlaybackState::Stopped;
                return false;
            }

            if let Some(snapshot) = self.shared.snapshot.lock().unwrap().as_mut() {
                snapshot.percent = source.percent_pos();
            }
            self.notify_progress(source, &mut last_notify, false);
        }
    }

    // Once the session outlives the configured limit, wind it down with a
    // fade-out; the fade's completion is what stops the loop. A fade the
    // caller already started takes precedence.
    fn maybe_auto_stop(&self, session_started: Instant, fired: &mut bool) {
        if *fired
            || self.auto_stop_after.is_zero()
            || session_started.elapsed() < self.auto_stop_after
        {
            return;
        }
        *fired = true;
        let mut ctl = self.shared.control.lock().unwrap();
        if ctl.fade.is_none() {
            info!(
                "session reached its {:?} limit, fading out",
                self.auto_stop_after
            );
            ctl.fade = Some(FadeJob::fade_out(ctl.volume, self.auto_stop_fade));
        }
    }

    /// Current volume level and whether a fade drove it, advancing any
    /// active fade. A completed fade-out stops playback.
    fn current_level(&self) -> (u8, bool) {
        let mut ctl = self.shared.control.lock().unwrap();
        let Some(fade) = ctl.fade.clone() else {
            return (ctl.volume, false);
        };
        let now = Instant::now();
        if fade.finished_at(now) {
            let target = fade.target();
            ctl.fade = None;
            ctl.volume = target;
            if target == 0 {
                info!("fade-out complete, stopping");
                ctl.state = PlaybackState::Stopped;
            }
            (target, true)
        } else {
            ctl.volume = fade.level_at(now);
            (ctl.volume, true)
        }
    }

    fn notify_progress(
        &self,
        source: &dyn MediaSource,
        last: &mut Option<Instant>,
        force: bool,
    ) {
        let now = Instant::now();
        if !force {
            if let Some(at) = *last {
                if now.duration_since(at) < self.notify_interval {
                    return;
                }
            }
        }
        *last = Some(now);
        if let Some(cb) = &self.hooks.on_progress {
            let progress = Progress {
                percent: source.percent_pos(),
                duration_secs: source.duration_secs(),
            };
            let started = Instant::now();
            cb(&progress);
            let took = started.elapsed();
            if took > HOOK_BUDGET {
                warn!("progression hook took {:?}, it must not block playback", took);
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.shared.control.lock().unwrap().state == PlaybackState::Stopped
    }

    fn emit(&self, event: PlayerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}
