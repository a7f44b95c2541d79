// Aulos Library - Pluggable audio playback engine
// Modular design makes it easy to swap out backends

pub mod config;    // settings and preferences
pub mod engine;    // playback state machine and loop
pub mod error;     // crate-wide error type
pub mod fade;      // timed volume ramps
pub mod resolver;  // library scanning and pattern search
pub mod sink;      // audio output backends
pub mod source;    // decode backends
pub mod watchdog;  // i/o inactivity cancellation

// Export the stuff callers actually use
pub use config::Config;
pub use engine::{
    EngineHooks, PlayOptions, PlaybackEngine, PlaybackState, PlayerEvent, Progress, TrackSnapshot,
};
pub use error::{Error, Result};
pub use fade::{FadeDirection, FadeJob};
pub use resolver::Resolver;
pub use sink::{OutputSink, SubprocessSink};
pub use source::{
    AbortHandle, AudioSpec, Chunk, FfmpegOpener, MediaOpener, MediaSource, TrackRef,
};
pub use watchdog::{InterruptToken, IoWatchdog, TokenState};
