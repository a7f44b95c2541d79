// MediaSource decoding through an ffmpeg subprocess.
// ffmpeg is forced to emit interleaved s16le at a fixed layout on stdout,
// so the PCM spec is known before the first byte arrives. Seeks respawn
// the decoder with `-ss`; the watchdog aborts a wedged open/read by
// killing the child, which unblocks the pipe read immediately.

use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::source::{AbortHandle, AudioSpec, Chunk, MediaOpener, MediaSource, NoopAbort, TrackRef};
use crate::watchdog::InterruptToken;

const READ_BUF_BYTES: usize = 8192;

/// Kills a decoder subprocess to unblock whoever is reading its stdout.
struct KillPid {
    pid: u32,
}

impl AbortHandle for KillPid {
    fn abort(&self) {
        debug!("killing decoder subprocess {}", self.pid);
        unsafe {
            libc::kill(self.pid as libc::pid_t, libc::SIGKILL);
        }
    }
}

/// Opens tracks by spawning ffmpeg decoders.
#[derive(Clone)]
pub struct FfmpegOpener {
    mono: bool,
    sample_rate: u32,
}

impl FfmpegOpener {
    pub fn new(mono: bool, sample_rate: u32) -> Self {
        Self { mono, sample_rate }
    }

    fn output_spec(&self) -> AudioSpec {
        AudioSpec {
            channels: if self.mono { 1 } else { 2 },
            sample_rate: self.sample_rate,
        }
    }

    // ffprobe gives the duration for local files. Failures are tolerated:
    // a corrupt file still gets caught by the priming read below.
    fn probe_duration(&self, location: &str, token: &InterruptToken) -> Option<u64> {
        let child = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
                location,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;

        token.set_abort(Arc::new(KillPid { pid: child.id() }));
        let output = child.wait_with_output().ok()?;
        token.touch();
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim().parse::<f64>().ok().map(|secs| secs as u64)
    }
}

impl Default for FfmpegOpener {
    fn default() -> Self {
        Self::new(false, 44100)
    }
}

impl MediaOpener for FfmpegOpener {
    fn open(&self, track: &TrackRef, token: &InterruptToken) -> Result<Box<dyn MediaSource>> {
        let location = track.location();
        let spec = self.output_spec();

        let duration = if track.is_stream() {
            info!("no duration for stream {:?}", location);
            None
        } else {
            self.probe_duration(&location, token)
        };

        let (child, stdout) = spawn_decoder(&location, &spec, 0.0)?;
        token.set_abort(Arc::new(KillPid { pid: child.id() }));

        let mut source = FfmpegSource {
            location: location.clone(),
            seekable: !track.is_stream(),
            spec,
            duration,
            child: Some(child),
            stdout: Some(stdout),
            pending: Vec::new(),
            bytes_read: 0,
            start_secs: 0.0,
        };

        // Priming read: block until the decoder produces its first bytes,
        // so a track that cannot decode at all fails here as OpenFailed
        // and a stalled stream open is killable by the watchdog.
        match source.fill_pending(READ_BUF_BYTES, token) {
            Ok(0) => {
                source.close();
                Err(Error::OpenFailed(location, "decoder produced no audio".into()))
            }
            Ok(_) => {
                if let Some(secs) = duration {
                    info!("duration: {} min {} s", secs / 60, secs % 60);
                }
                Ok(Box::new(source))
            }
            Err(e) => {
                source.close();
                Err(Error::OpenFailed(location, e.to_string()))
            }
        }
    }
}

fn spawn_decoder(location: &str, spec: &AudioSpec, start_secs: f64) -> Result<(Child, ChildStdout)> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error"]);
    if start_secs > 0.0 {
        cmd.args(["-ss", &format!("{:.3}", start_secs)]);
    }
    cmd.args(["-i", location, "-f", "s16le"])
        .args(["-ac", &spec.channels.to_string()])
        .args(["-ar", &spec.sample_rate.to_string()])
        .arg("pipe:1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .stdin(Stdio::null());

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::OpenFailed(location.to_string(), format!("spawn ffmpeg: {}", e)))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::OpenFailed(location.to_string(), "no decoder stdout".into()))?;
    Ok((child, stdout))
}

pub struct FfmpegSource {
    location: String,
    seekable: bool,
    spec: AudioSpec,
    duration: Option<u64>,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    pending: Vec<u8>,
    bytes_read: u64,
    start_secs: f64,
}

impl FfmpegSource {
    // Pull decoder output into the pending buffer until it holds `want`
    // bytes or the stream ends. Returns the pending length.
    fn fill_pending(&mut self, want: usize, token: &InterruptToken) -> std::io::Result<usize> {
        let mut buf = [0u8; READ_BUF_BYTES];
        while self.pending.len() < want {
            let stdout = match self.stdout.as_mut() {
                Some(s) => s,
                None => break,
            };
            let n = stdout.read(&mut buf)?;
            if n == 0 {
                break;
            }
            token.touch();
            self.pending.extend_from_slice(&buf[..n]);
        }
        Ok(self.pending.len())
    }

    fn position_secs(&self) -> f64 {
        let bytes_per_sec = (self.spec.sample_rate as u64 * self.spec.frame_bytes() as u64) as f64;
        self.start_secs + self.bytes_read as f64 / bytes_per_sec
    }
}

impl MediaSource for FfmpegSource {
    fn spec(&self) -> AudioSpec {
        self.spec
    }

    fn duration_secs(&self) -> Option<u64> {
        self.duration
    }

    fn read_next_chunk(&mut self, frames: usize, token: &InterruptToken) -> Result<Option<Chunk>> {
        let want = frames * self.spec.frame_bytes();
        self.fill_pending(want, token)
            .map_err(|e| Error::ReadFailed(e.to_string()))?;

        if self.pending.is_empty() {
            return Ok(None);
        }

        let take = want.min(self.pending.len());
        let chunk: Vec<u8> = self.pending.drain(..take).collect();
        self.bytes_read += chunk.len() as u64;
        Ok(Some(Chunk::new(chunk)))
    }

    fn seek_percent(&mut self, percent: u8) -> Result<()> {
        let duration = match (self.seekable, self.duration) {
            (true, Some(d)) => d,
            _ => return Err(Error::InvalidSeek("cannot seek in a stream".into())),
        };

        let percent = percent.min(100);
        let target_secs = duration as f64 * percent as f64 / 100.0;
        debug!("seek to {}% ({:.1}s) of {:?}", percent, target_secs, self.location);

        self.close();
        let (child, stdout) = spawn_decoder(&self.location, &self.spec, target_secs)?;
        self.child = Some(child);
        self.stdout = Some(stdout);
        self.pending.clear();
        self.bytes_read = 0;
        self.start_secs = target_secs;
        Ok(())
    }

    fn percent_pos(&self) -> u8 {
        match self.duration {
            Some(d) if d > 0 => {
                let percent = self.position_secs() / d as f64 * 100.0;
                percent.clamp(0.0, 100.0) as u8
            }
            _ => 0,
        }
    }

    fn abort_handle(&self) -> Arc<dyn AbortHandle> {
        match &self.child {
            Some(child) => Arc::new(KillPid { pid: child.id() }),
            None => Arc::new(NoopAbort),
        }
    }

    fn close(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if child.try_wait().ok().flatten().is_none() {
                let _ = child.kill();
            }
            if let Err(e) = child.wait() {
                warn!("decoder wait failed: {}", e);
            }
        }
        self.pending.clear();
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}
