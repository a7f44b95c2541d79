// Configuration management for the playback engine
// Handles loading/saving settings, with sensible defaults when config is missing

use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub music_dir: PathBuf,
    pub playback: PlaybackConfig,
    pub watchdog: WatchdogConfig,
    pub fade: FadeConfig,
    pub auto_stop: AutoStopConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Initial volume level, 0-100
    pub init_volume: u8,
    /// Frames per decoded chunk
    pub chunk_frames: usize,
    /// Downmix everything to mono (passed to the decode backend)
    pub mono: bool,
    /// Working sample rate requested from the decode backend
    pub sample_rate: u32,
    /// Seconds between progression-hook invocations
    pub notify_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Inactivity bound for opening a track, in seconds
    pub open_timeout_secs: u64,
    /// Inactivity bound for a single chunk read, in seconds
    pub read_timeout_secs: u64,
    /// Monitor poll interval, in milliseconds
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FadeConfig {
    /// Default fade-in length when `play` is asked to fade, in seconds
    pub fade_in_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoStopConfig {
    /// End a play session after this long, in seconds. 0 disables the timer.
    pub after_secs: u64,
    /// Length of the fade-out the timer uses to stop, in seconds
    pub fade_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            music_dir: dirs::audio_dir().unwrap_or_else(|| PathBuf::from("~/Music")),
            playback: PlaybackConfig {
                init_volume: 50,
                chunk_frames: 4096,
                mono: false,
                sample_rate: 44100, // Standard CD quality
                notify_interval_secs: 5,
            },
            watchdog: WatchdogConfig {
                open_timeout_secs: 10,
                read_timeout_secs: 5,
                poll_interval_ms: 100,
            },
            fade: FadeConfig { fade_in_secs: 60 },
            auto_stop: AutoStopConfig {
                after_secs: 3600, // an hour of playback, then wind down
                fade_secs: 300,
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("bad config file: {}", e)))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("serialize failed: {}", e)))?;
        fs::write(config_path, content)?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| Error::Config("could not find config directory".into()))?
            .join("aulos");

        Ok(config_dir.join("config.toml"))
    }

    pub fn open_bound(&self) -> Duration {
        Duration::from_secs(self.watchdog.open_timeout_secs)
    }

    pub fn read_bound(&self) -> Duration {
        Duration::from_secs(self.watchdog.read_timeout_secs)
    }

    pub fn watchdog_poll(&self) -> Duration {
        Duration::from_millis(self.watchdog.poll_interval_ms)
    }

    pub fn notify_interval(&self) -> Duration {
        Duration::from_secs(self.playback.notify_interval_secs)
    }

    pub fn fade_in_duration(&self) -> Duration {
        Duration::from_secs(self.fade.fade_in_secs)
    }

    /// Zero means the auto-stop timer is disabled.
    pub fn auto_stop_after(&self) -> Duration {
        Duration::from_secs(self.auto_stop.after_secs)
    }

    pub fn auto_stop_fade(&self) -> Duration {
        Duration::from_secs(self.auto_stop.fade_secs)
    }
}
