// Time-based volume ramps.
// A FadeJob is sampled by the playback loop at chunk boundaries against the
// wall clock, so the ramp needs no timer thread of its own and the volume
// level has a single writer while a fade is active.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeDirection {
    In,
    Out,
}

/// Active volume ramp descriptor. At most one per engine; a new fade
/// request supersedes the current one rather than queueing behind it.
#[derive(Debug, Clone)]
pub struct FadeJob {
    from: u8,
    to: u8,
    started: Instant,
    duration: Duration,
}

impl FadeJob {
    pub fn new(from: u8, to: u8, duration: Duration) -> Self {
        Self {
            from: from.min(100),
            to: to.min(100),
            started: Instant::now(),
            duration,
        }
    }

    /// Ramp from silence up to `target`.
    pub fn fade_in(target: u8, duration: Duration) -> Self {
        Self::new(0, target, duration)
    }

    /// Ramp from `from` down to silence.
    pub fn fade_out(from: u8, duration: Duration) -> Self {
        Self::new(from, 0, duration)
    }

    pub fn direction(&self) -> FadeDirection {
        if self.to >= self.from {
            FadeDirection::In
        } else {
            FadeDirection::Out
        }
    }

    pub fn target(&self) -> u8 {
        self.to
    }

    /// Linearly interpolated level at `now`, clamped to the ramp endpoints.
    pub fn level_at(&self, now: Instant) -> u8 {
        if self.duration.is_zero() {
            return self.to;
        }
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed >= self.duration {
            return self.to;
        }
        let progress = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        let span = self.to as f64 - self.from as f64;
        (self.from as f64 + span * progress).round().clamp(0.0, 100.0) as u8
    }

    /// Whether the ramp has run its full duration at `now`.
    pub fn finished_at(&self, now: Instant) -> bool {
        self.duration.is_zero()
            || now.saturating_duration_since(self.started) >= self.duration
    }

    #[cfg(test)]
    fn started(&self) -> Instant {
        self.started
    }
}
