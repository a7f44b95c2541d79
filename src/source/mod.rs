pub mod ffmpeg;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::watchdog::InterruptToken;

pub use ffmpeg::{FfmpegOpener, FfmpegSource};

/// Returns whether the given location is a network stream rather than a file.
pub fn is_stream(location: &str) -> bool {
    location.contains("://")
}

/// One entry in a playlist - a local file or a network stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackRef {
    File(PathBuf),
    Stream { name: Option<String>, url: String },
}

impl TrackRef {
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        TrackRef::File(path.into())
    }

    pub fn stream(url: impl Into<String>) -> Self {
        TrackRef::Stream {
            name: None,
            url: url.into(),
        }
    }

    /// Path or URL as handed to the decode backend.
    pub fn location(&self) -> String {
        match self {
            TrackRef::File(path) => path.to_string_lossy().into_owned(),
            TrackRef::Stream { url, .. } => url.clone(),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, TrackRef::Stream { .. })
    }

    /// Human-readable name: for files a music-dir-relative stem, for streams
    /// the station name (falling back to the url).
    pub fn display_name(&self, music_dir: &Path) -> String {
        match self {
            TrackRef::File(path) => {
                let relative = path.strip_prefix(music_dir).unwrap_or(path);
                relative
                    .with_extension("")
                    .to_string_lossy()
                    .into_owned()
            }
            TrackRef::Stream { name, url } => name.clone().unwrap_or_else(|| url.clone()),
        }
    }
}

/// PCM layout of a decoded track, used to configure the output sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSpec {
    pub channels: u16,
    pub sample_rate: u32,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 44100, // Standard CD quality
        }
    }
}

impl AudioSpec {
    /// Bytes per frame (all channels, s16le samples).
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * 2
    }
}

/// A unit of decoded audio: interleaved s16le PCM bytes.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub pcm: Vec<u8>,
}

impl Chunk {
    pub fn new(pcm: Vec<u8>) -> Self {
        Self { pcm }
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    /// Scale every sample in place by `gain` (0.0 silence, 1.0 unity).
    /// A trailing odd byte (truncated sample) is left untouched.
    pub fn apply_gain(&mut self, gain: f32) {
        if (gain - 1.0).abs() < f32::EPSILON {
            return;
        }
        let gain = gain.clamp(0.0, 1.0);
        for sample in self.pcm.chunks_exact_mut(2) {
            let value = i16::from_le_bytes([sample[0], sample[1]]);
            let scaled = (value as f32 * gain) as i16;
            sample.copy_from_slice(&scaled.to_le_bytes());
        }
    }
}

/// Cancels the blocking call a watchdog token guards. Called from the
/// watchdog thread, so it must not touch the source's `&mut self` state.
pub trait AbortHandle: Send + Sync {
    fn abort(&self);
}

/// An abort handle for sources with nothing to cancel (local files whose
/// reads never block for long).
pub struct NoopAbort;

impl AbortHandle for NoopAbort {
    fn abort(&self) {}
}

/// An open, decodable track. Exclusively owned by the playback loop thread.
pub trait MediaSource: Send {
    /// PCM layout of the decoded output.
    fn spec(&self) -> AudioSpec;

    /// Total duration in seconds, `None` for live streams.
    fn duration_secs(&self) -> Option<u64>;

    /// Read up to `frames` frames of decoded audio. `Ok(None)` signals end
    /// of track. Implementations should call `token.touch()` whenever bytes
    /// arrive so the watchdog sees forward progress.
    fn read_next_chunk(&mut self, frames: usize, token: &InterruptToken) -> Result<Option<Chunk>>;

    /// Seek to a percentage position in [0, 100].
    fn seek_percent(&mut self, percent: u8) -> Result<()>;

    /// Current position as a percentage in [0, 100].
    fn percent_pos(&self) -> u8;

    /// Handle the watchdog uses to unblock a stalled open/read.
    fn abort_handle(&self) -> Arc<dyn AbortHandle>;

    /// Release decoder resources. Idempotent.
    fn close(&mut self);
}

/// Opens tracks into `MediaSource` instances. The engine depends only on
/// this abstraction, never on a concrete backend.
pub trait MediaOpener: Send + Sync {
    /// Open a track for decoding. Long-running opens should register an
    /// abort handle on `token` early and `touch()` it on progress.
    fn open(&self, track: &TrackRef, token: &InterruptToken) -> Result<Box<dyn MediaSource>>;
}
