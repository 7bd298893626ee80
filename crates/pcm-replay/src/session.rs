//! Playback session: source -> decoder -> pacer -> sink.
//!
//! Lifecycle:
//! - `Opening`: validate the layout and hand stream metadata to the sink
//! - `Streaming`: release one chunk per pacer authorization
//! - end of pass: `Looping` back to `Streaming`, or `EndReached` then `Stopped`
//! - a cancel request stops the session from any state; unrecoverable errors end in `Failed`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::clock::Clock;
use crate::config::{ReplayConfig, StreamLabels};
use crate::error::{ReplayError, Result};
use crate::format::StreamDescriptor;
use crate::pacer::{Pacer, Poll};
use crate::sink::Sink;
use crate::source::FrameSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Streaming,
    Looping,
    EndReached,
    Stopped,
    Failed,
}

/// Why a session stopped cleanly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// The last pass finished and looping is off.
    EndOfStream,
    /// The cancel flag was raised.
    Interrupted,
    /// A pass produced no frames at all.
    EmptySource,
}

/// Optional knobs for one session.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    /// Raised externally to stop the session at the next poll.
    pub cancel: Option<Arc<AtomicBool>>,
    /// Incremented by every frame handed to the sink.
    pub emitted_frames: Option<Arc<AtomicU64>>,
    pub labels: StreamLabels,
}

/// Outcome of a session that ended without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub state: SessionState,
    pub end: EndReason,
    /// Frames pushed across all passes.
    pub frames_emitted: u64,
    /// Passes started, including the first.
    pub passes: u64,
}

pub struct PlaybackSession<S: Sink, C: Clock> {
    source: Box<dyn FrameSource>,
    sink: S,
    pacer: Pacer<C>,
    descriptor: StreamDescriptor,
    config: ReplayConfig,
    cancel: Option<Arc<AtomicBool>>,
    emitted_counter: Option<Arc<AtomicU64>>,
    state: SessionState,
    frames_emitted: u64,
    passes: u64,
    raw: Vec<u8>,
    samples: Vec<f32>,
}

impl<S: Sink, C: Clock> PlaybackSession<S, C> {
    /// Validate `source` and attach the stream metadata to `sink`.
    ///
    /// On error nothing has been sent to the sink; source and sink are dropped.
    pub fn open(
        source: Box<dyn FrameSource>,
        mut sink: S,
        config: ReplayConfig,
        clock: C,
        options: SessionOptions,
    ) -> Result<Self> {
        let name = source.describe();
        tracing::debug!(source = %name, state = ?SessionState::Opening, "session opening");

        let descriptor = StreamDescriptor::from_source(source.as_ref())
            .and_then(|descriptor| config.validate_for(&descriptor).map(|_| descriptor))
            .inspect_err(|e| {
                tracing::error!(
                    source = %name,
                    error = %e,
                    state = ?SessionState::Failed,
                    "session failed to open"
                );
            })?;

        let info = options.labels.stream_info(&descriptor, &name);
        if let Err(e) = sink.open(&info) {
            tracing::error!(
                source = %name,
                error = %e,
                state = ?SessionState::Failed,
                "sink refused stream"
            );
            sink.close();
            return Err(e.into());
        }

        tracing::info!(
            source = %name,
            channels = descriptor.channels,
            rate_hz = descriptor.frame_rate,
            encoding = %descriptor.encoding,
            frames = ?descriptor.frame_count,
            chunk_frames = config.chunk_frames,
            loop_playback = config.loop_playback,
            "session open"
        );

        let pacer = Pacer::new(clock, descriptor.frame_rate, config.chunk_frames)
            .with_max_catchup_chunks(config.max_catchup_chunks);

        Ok(Self {
            source,
            sink,
            pacer,
            descriptor,
            config,
            cancel: options.cancel,
            emitted_counter: options.emitted_frames,
            state: SessionState::Streaming,
            frames_emitted: 0,
            passes: 0,
            raw: Vec::new(),
            samples: Vec::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    /// Drive the session until it stops or fails; the sink is closed either way.
    pub fn run(mut self) -> Result<SessionReport> {
        match self.stream() {
            Ok(end) => {
                self.transition(SessionState::Stopped);
                self.sink.close();
                tracing::info!(
                    end = ?end,
                    frames = self.frames_emitted,
                    passes = self.passes,
                    forgiven_frames = self.pacer.forgiven_frames(),
                    "session stopped"
                );
                Ok(SessionReport {
                    state: self.state,
                    end,
                    frames_emitted: self.frames_emitted,
                    passes: self.passes,
                })
            }
            Err(e) => {
                self.transition(SessionState::Failed);
                tracing::error!(error = %e, frames = self.frames_emitted, "session failed");
                self.sink.abort(&e.to_string());
                self.sink.close();
                Err(e)
            }
        }
    }

    fn stream(&mut self) -> Result<EndReason> {
        self.pacer.start_pass();
        self.passes = 1;
        let mut pass_frames = 0u64;

        loop {
            if self.cancelled() {
                tracing::info!(frames = self.frames_emitted, "stop requested");
                return Ok(EndReason::Interrupted);
            }

            let frames = match self.pacer.poll() {
                Poll::Wait(d) => {
                    self.pacer.wait(d);
                    continue;
                }
                Poll::Emit { frames } => frames,
            };

            let emitted = self.emit_chunk(frames)?;
            pass_frames += emitted as u64;

            let pass_done =
                emitted < frames || self.descriptor.frame_count == Some(pass_frames);
            if !pass_done {
                continue;
            }

            if pass_frames == 0 {
                tracing::warn!(source = %self.source.describe(), "source produced no frames");
                return Ok(EndReason::EmptySource);
            }

            tracing::debug!(pass = self.passes, frames = pass_frames, "pass complete");
            if !self.config.loop_playback {
                self.transition(SessionState::EndReached);
                return Ok(EndReason::EndOfStream);
            }

            self.transition(SessionState::Looping);
            self.source.rewind()?;
            self.sink.begin_pass()?;
            self.pacer.start_pass();
            self.passes += 1;
            pass_frames = 0;
            self.transition(SessionState::Streaming);
        }
    }

    /// Read, decode and push up to `frames` frames; returns how many reached the sink.
    fn emit_chunk(&mut self, frames: usize) -> Result<usize> {
        self.raw.clear();
        self.source.read_frames(frames, &mut self.raw)?;

        self.samples.clear();
        let channels = self.descriptor.channel_count();
        let stats = self
            .descriptor
            .encoding
            .decode_interleaved(&self.raw, channels, &mut self.samples);
        if stats.dropped_bytes > 0 {
            let err = ReplayError::TruncatedFrame {
                dropped_bytes: stats.dropped_bytes,
                frame_bytes: self.descriptor.frame_bytes(),
            };
            tracing::warn!(error = %err, "dropping partial frame");
        }

        for frame in self.samples.chunks_exact(channels) {
            self.sink.push_frame(frame)?;
        }
        if stats.frames > 0 {
            self.sink.flush()?;
        }

        self.pacer.record_emitted(stats.frames);
        self.frames_emitted += stats.frames as u64;
        if let Some(counter) = &self.emitted_counter {
            counter.fetch_add(stats.frames as u64, Ordering::Relaxed);
        }
        Ok(stats.frames)
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "session state");
            self.state = next;
        }
    }
}
