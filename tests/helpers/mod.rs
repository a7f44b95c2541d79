// Scripted collaborators for engine integration tests: a fake decode
// backend whose per-track behavior is configured up front, and a sink
// that records everything written to it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use aulos::error::{Error, Result};
use aulos::sink::OutputSink;
use aulos::source::{AbortHandle, AudioSpec, Chunk, MediaOpener, MediaSource, TrackRef};
use aulos::watchdog::InterruptToken;
use aulos::{Config, EngineHooks, PlaybackEngine, PlayerEvent};

/// Sample value emitted by the fake decoder, before gain.
pub const SAMPLE_VALUE: i16 = 1000;

/// Per-track script for the fake backend.
#[derive(Debug, Clone)]
pub struct ScriptedTrack {
    /// Chunks to produce before end of track.
    pub chunks: usize,
    /// Pause before each chunk, to make a track last a while.
    pub chunk_delay: Duration,
    /// Refuse to open.
    pub fail_open: bool,
    /// Block forever on this read (0-based) until aborted.
    pub wedge_on_read: Option<usize>,
}

impl Default for ScriptedTrack {
    fn default() -> Self {
        Self {
            chunks: 3,
            chunk_delay: Duration::ZERO,
            fail_open: false,
            wedge_on_read: None,
        }
    }
}

impl ScriptedTrack {
    pub fn long() -> Self {
        Self {
            chunks: 200,
            chunk_delay: Duration::from_millis(10),
            ..Self::default()
        }
    }
}

#[derive(Default)]
pub struct FakeOpener {
    scripts: Mutex<HashMap<String, ScriptedTrack>>,
    /// Locations in open order, including failed opens.
    pub opened: Mutex<Vec<String>>,
}

impl FakeOpener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, location: impl Into<String>, script: ScriptedTrack) {
        self.scripts.lock().unwrap().insert(location.into(), script);
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl MediaOpener for FakeOpener {
    fn open(&self, track: &TrackRef, token: &InterruptToken) -> Result<Box<dyn MediaSource>> {
        token.touch();
        let location = track.location();
        self.opened.lock().unwrap().push(location.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&location)
            .cloned()
            .unwrap_or_default();
        if script.fail_open {
            return Err(Error::OpenFailed(location, "scripted failure".into()));
        }
        Ok(Box::new(FakeSource {
            script,
            read: 0,
            wedge: Arc::new(WedgeFlag::default()),
        }))
    }
}

#[derive(Default)]
pub struct WedgeFlag {
    aborted: Mutex<bool>,
    wake: Condvar,
}

impl AbortHandle for WedgeFlag {
    fn abort(&self) {
        *self.aborted.lock().unwrap() = true;
        self.wake.notify_all();
    }
}

pub struct FakeSource {
    script: ScriptedTrack,
    read: usize,
    wedge: Arc<WedgeFlag>,
}

impl MediaSource for FakeSource {
    fn spec(&self) -> AudioSpec {
        AudioSpec {
            channels: 2,
            sample_rate: 44100,
        }
    }

    fn duration_secs(&self) -> Option<u64> {
        Some(self.script.chunks as u64)
    }

    fn read_next_chunk(&mut self, frames: usize, token: &InterruptToken) -> Result<Option<Chunk>> {
        if self.script.wedge_on_read == Some(self.read) {
            // Stay blocked until the abort handle fires, like a decoder
            // pipe that stopped producing bytes.
            let mut aborted = self.wedge.aborted.lock().unwrap();
            while !*aborted {
                let (guard, timeout) = self
                    .wedge
                    .wake
                    .wait_timeout(aborted, Duration::from_secs(30))
                    .unwrap();
                aborted = guard;
                if timeout.timed_out() {
                    return Err(Error::ReadFailed("wedge was never aborted".into()));
                }
            }
            return Err(Error::ReadFailed("read aborted".into()));
        }
        if self.read >= self.script.chunks {
            return Ok(None);
        }
        if !self.script.chunk_delay.is_zero() {
            thread::sleep(self.script.chunk_delay);
        }
        token.touch();
        self.read += 1;
        let mut pcm = Vec::with_capacity(frames * self.spec().frame_bytes());
        for _ in 0..frames * usize::from(self.spec().channels) {
            pcm.extend_from_slice(&SAMPLE_VALUE.to_le_bytes());
        }
        Ok(Some(Chunk::new(pcm)))
    }

    fn seek_percent(&mut self, percent: u8) -> Result<()> {
        self.read = self.script.chunks * usize::from(percent.min(100)) / 100;
        Ok(())
    }

    fn percent_pos(&self) -> u8 {
        (self.read * 100 / self.script.chunks.max(1)).min(100) as u8
    }

    fn abort_handle(&self) -> Arc<dyn AbortHandle> {
        self.wedge.clone()
    }

    fn close(&mut self) {}
}

#[derive(Default)]
pub struct SinkLog {
    pub opens: usize,
    pub closes: usize,
    pub configures: Vec<AudioSpec>,
    pub chunks: Vec<Vec<u8>>,
    pub volumes: Vec<u8>,
}

pub struct CollectSink {
    log: Arc<Mutex<SinkLog>>,
}

impl CollectSink {
    pub fn new() -> (Self, Arc<Mutex<SinkLog>>) {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        (Self { log: log.clone() }, log)
    }
}

impl OutputSink for CollectSink {
    fn open(&mut self) -> Result<()> {
        self.log.lock().unwrap().opens += 1;
        Ok(())
    }

    fn configure(&mut self, spec: &AudioSpec) -> Result<()> {
        self.log.lock().unwrap().configures.push(*spec);
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        self.log.lock().unwrap().chunks.push(chunk.pcm.clone());
        Ok(())
    }

    fn set_volume(&mut self, level: u8) {
        self.log.lock().unwrap().volumes.push(level);
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closes += 1;
    }
}

pub fn test_config(music_dir: &Path) -> Config {
    let mut config = Config::default();
    config.music_dir = music_dir.to_path_buf();
    config.playback.init_volume = 100;
    config.playback.chunk_frames = 64;
    config.playback.notify_interval_secs = 1;
    config.watchdog.open_timeout_secs = 2;
    config.watchdog.read_timeout_secs = 1;
    config.watchdog.poll_interval_ms = 20;
    config.auto_stop.after_secs = 0;
    config
}

/// Engine wired to the fakes, with its sink log and event stream.
pub fn build_engine(
    config: Config,
    opener: Arc<FakeOpener>,
    hooks: EngineHooks,
) -> (
    PlaybackEngine,
    Arc<Mutex<SinkLog>>,
    UnboundedReceiver<PlayerEvent>,
) {
    let (sink, log) = CollectSink::new();
    let mut engine = PlaybackEngine::new(config, opener, Box::new(sink));
    engine.set_hooks(hooks);
    let (tx, rx) = mpsc::unbounded_channel();
    engine.set_event_sender(tx);
    (engine, log, rx)
}

pub fn tracks(names: &[&str]) -> Vec<TrackRef> {
    names.iter().map(|name| TrackRef::file(*name)).collect()
}

/// Drain events until one matches, panicking on timeout. Returns
/// everything seen up to and including the match.
pub fn wait_for_event(
    rx: &mut UnboundedReceiver<PlayerEvent>,
    timeout: Duration,
    mut pred: impl FnMut(&PlayerEvent) -> bool,
) -> Vec<PlayerEvent> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => {
                let hit = pred(&event);
                seen.push(event);
                if hit {
                    return seen;
                }
            }
            Err(TryRecvError::Empty) => {
                if Instant::now() >= deadline {
                    panic!("timed out waiting for event; saw {seen:?}");
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(TryRecvError::Disconnected) => {
                panic!("event channel closed; saw {seen:?}");
            }
        }
    }
}

/// Poll a condition until it holds, panicking on timeout.
pub fn wait_until(timeout: Duration, what: &str, mut pred: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !pred() {
        if Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        thread::sleep(Duration::from_millis(10));
    }
}
