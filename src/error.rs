// Error types for the playback engine.
// One enum for the whole crate keeps the skip/stop recovery logic in the
// worker readable - it matches on variants instead of string contents.

use thiserror::Error;

/// Main error type for the aulos playback engine
#[derive(Error, Debug)]
pub enum Error {
    /// `play` was called but nothing playable resolved
    #[error("empty playlist")]
    EmptyPlaylist,

    /// `search_and_play` found no matching tracks
    #[error("no tracks match pattern '{0}'")]
    NoMatch(String),

    /// A MediaSource could not open the given track
    #[error("failed to open '{0}': {1}")]
    OpenFailed(String, String),

    /// Opening a track exceeded the watchdog bound
    #[error("open of '{0}' timed out")]
    OpenTimeout(String),

    /// A MediaSource failed mid-track
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// A guarded read exceeded the watchdog inactivity bound
    #[error("i/o inactivity timeout")]
    IoTimeout,

    /// Every track in the playlist failed to open
    #[error("no playable track in playlist")]
    NoPlayableTrack,

    /// Seek issued with no current track, or into an unseekable stream
    #[error("invalid seek: {0}")]
    InvalidSeek(String),

    /// Output sink errors
    #[error("audio output error: {0}")]
    Output(String),

    /// Configuration file loading errors
    #[error("configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("file i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the aulos Error
pub type Result<T> = std::result::Result<T, Error>;
