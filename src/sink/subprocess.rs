// Output sink piping raw PCM into an external player process (aplay by
// default). The child's blocked stdin is what paces the decode loop.

use std::io::Write;
use std::process::{Child, Command, Stdio};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::sink::OutputSink;
use crate::source::{AudioSpec, Chunk};

pub struct SubprocessSink {
    program: String,
    child: Option<Child>,
    spec: Option<AudioSpec>,
    opened: bool,
}

impl SubprocessSink {
    /// Sink writing to `aplay`.
    pub fn new() -> Self {
        Self::with_program("aplay")
    }

    /// Sink writing to any player that accepts raw s16le PCM on stdin and
    /// understands aplay-style `-c`/`-r` arguments.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            child: None,
            spec: None,
            opened: false,
        }
    }

    fn spawn_player(&mut self, spec: &AudioSpec) -> Result<()> {
        debug!(
            "spawning {} for {} ch @ {} Hz",
            self.program, spec.channels, spec.sample_rate
        );
        let child = Command::new(&self.program)
            .args([
                "-q",
                "-t",
                "raw",
                "-f",
                "S16_LE",
                "-c",
                &spec.channels.to_string(),
                "-r",
                &spec.sample_rate.to_string(),
                "-",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Output(format!("failed to spawn {}: {}", self.program, e)))?;

        self.child = Some(child);
        self.spec = Some(*spec);
        Ok(())
    }

    fn kill_player(&mut self) {
        if let Some(mut child) = self.child.take() {
            // Closing stdin lets the player drain its buffer; kill only if
            // it lingers.
            drop(child.stdin.take());
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    let _ = child.kill();
                    let _ = child.wait();
                }
            }
        }
        self.spec = None;
    }
}

impl Default for SubprocessSink {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputSink for SubprocessSink {
    fn open(&mut self) -> Result<()> {
        // The player itself is spawned lazily in configure(), once the
        // first track's PCM layout is known.
        self.opened = true;
        Ok(())
    }

    fn configure(&mut self, spec: &AudioSpec) -> Result<()> {
        if !self.opened {
            return Err(Error::Output("sink not opened".into()));
        }
        if self.spec.as_ref() == Some(spec) && self.child.is_some() {
            return Ok(());
        }
        self.kill_player();
        self.spawn_player(spec)
    }

    fn write_chunk(&mut self, chunk: &Chunk) -> Result<()> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| Error::Output("sink not configured".into()))?;
        let stdin = child
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Output("player stdin gone".into()))?;
        stdin
            .write_all(&chunk.pcm)
            .map_err(|e| Error::Output(format!("write to {} failed: {}", self.program, e)))
    }

    fn close(&mut self) {
        if self.opened {
            debug!("closing {} output", self.program);
        }
        self.kill_player();
        self.opened = false;
    }
}

impl Drop for SubprocessSink {
    fn drop(&mut self) {
        if self.child.is_some() {
            warn!("subprocess sink dropped while player still running");
        }
        self.kill_player();
    }
}
