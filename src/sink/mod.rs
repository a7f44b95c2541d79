pub mod subprocess;

use crate::error::Result;
use crate::source::{AudioSpec, Chunk};

pub use subprocess::SubprocessSink;

/// Audible output for decoded chunks. Opened once per play session,
/// reconfigured per track, closed when the session ends. Exclusively owned
/// by the playback loop thread.
pub trait OutputSink: Send {
    /// Open the output. Called once before the first track of a session.
    fn open(&mut self) -> Result<()>;

    /// Configure the output for the track about to play.
    fn configure(&mut self, spec: &AudioSpec) -> Result<()>;

    /// Write one chunk of audio. May block on buffer availability; that
    /// blocking is the natural playback-rate throttle.
    fn write_chunk(&mut self, chunk: &Chunk) -> Result<()>;

    /// Volume-level notification. The engine applies gain to chunks in
    /// software; sinks backed by a hardware mixer may mirror the level
    /// here instead. Default is a no-op.
    fn set_volume(&mut self, level: u8) {
        let _ = level;
    }

    /// Close the output. Idempotent.
    fn close(&mut self);
}
