//! Real-time pacing of chunk emission.
//!
//! The pacer compares the frames implied by elapsed wall time since the pass baseline
//! (`floor(elapsed * rate)`) with the frames already emitted. A chunk is released only once a
//! full chunk of playback time is owed, so emission never runs ahead of real time. When the
//! caller falls behind, the backlog authorizes chunks back-to-back until it is paid off;
//! frames are never skipped, only the waits between chunks shrink.

use std::time::Duration;

use crate::clock::Clock;
use crate::format::frames_to_duration;

/// Lower bound for a single back-off so waiting never degrades into a spin.
pub const MIN_BACKOFF: Duration = Duration::from_micros(100);
/// Upper bound for a single back-off; also bounds how late a stop request is seen.
pub const MAX_BACKOFF: Duration = Duration::from_millis(5);

/// Baseline and progress of one pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacerState {
    /// Clock reading at pass start (possibly moved forward by catch-up forgiveness).
    pub baseline: Duration,
    /// Frames emitted since `baseline`.
    pub emitted_frames: u64,
}

/// Answer to a poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Poll {
    /// Emit exactly one chunk of this many frames.
    Emit { frames: usize },
    /// Nothing is due yet; back off for this long before polling again.
    Wait(Duration),
}

pub struct Pacer<C> {
    clock: C,
    rate_hz: u32,
    chunk_frames: usize,
    max_lag_frames: Option<u64>,
    state: PacerState,
    forgiven_frames: u64,
}

impl<C: Clock> Pacer<C> {
    /// Create a pacer and start its first pass at the current clock reading.
    pub fn new(clock: C, rate_hz: u32, chunk_frames: usize) -> Self {
        let baseline = clock.now();
        Self {
            clock,
            rate_hz: rate_hz.max(1),
            chunk_frames: chunk_frames.max(1),
            max_lag_frames: None,
            state: PacerState {
                baseline,
                emitted_frames: 0,
            },
            forgiven_frames: 0,
        }
    }

    /// Bound the catch-up backlog to `chunks` chunks; `None` keeps it unbounded.
    pub fn with_max_catchup_chunks(mut self, chunks: Option<usize>) -> Self {
        self.max_lag_frames =
            chunks.map(|c| (c.max(1) as u64).saturating_mul(self.chunk_frames as u64));
        self
    }

    /// Reset the baseline to now and the emitted count to zero.
    pub fn start_pass(&mut self) {
        self.state = PacerState {
            baseline: self.clock.now(),
            emitted_frames: 0,
        };
    }

    pub fn state(&self) -> PacerState {
        self.state
    }

    pub fn chunk_frames(&self) -> usize {
        self.chunk_frames
    }

    /// Playback time covered by one chunk.
    pub fn chunk_duration(&self) -> Duration {
        frames_to_duration(self.chunk_frames as u64, self.rate_hz)
    }

    /// Total frames whose emission was postponed by the catch-up bound.
    pub fn forgiven_frames(&self) -> u64 {
        self.forgiven_frames
    }

    /// `floor(elapsed * rate)` for the current pass.
    pub fn target_frames(&self) -> u64 {
        let elapsed = self.clock.now().saturating_sub(self.state.baseline);
        let frames = elapsed.as_nanos() * self.rate_hz as u128 / 1_000_000_000;
        u64::try_from(frames).unwrap_or(u64::MAX)
    }

    /// Frames owed to the consumer right now.
    pub fn backlog(&self) -> u64 {
        self.target_frames()
            .saturating_sub(self.state.emitted_frames)
    }

    /// Decide whether the next chunk may be emitted.
    pub fn poll(&mut self) -> Poll {
        let mut backlog = self.backlog();

        if let Some(max_lag) = self.max_lag_frames {
            if backlog > max_lag {
                let excess = backlog - max_lag;
                self.state.baseline += frames_to_duration(excess, self.rate_hz);
                self.forgiven_frames = self.forgiven_frames.saturating_add(excess);
                tracing::warn!(
                    backlog_frames = backlog,
                    forgiven_frames = excess,
                    "pacer fell behind beyond catch-up bound; re-anchoring baseline"
                );
                backlog = self.backlog();
            }
        }

        let chunk = self.chunk_frames as u64;
        if backlog >= chunk {
            Poll::Emit {
                frames: self.chunk_frames,
            }
        } else {
            Poll::Wait(self.backoff_for(chunk - backlog))
        }
    }

    /// Account for `frames` frames actually handed to the sink.
    pub fn record_emitted(&mut self, frames: usize) {
        self.state.emitted_frames = self.state.emitted_frames.saturating_add(frames as u64);
    }

    /// Suspend on the pacer's clock.
    pub fn wait(&self, d: Duration) {
        self.clock.sleep(d);
    }

    /// Time until `missing` more frames are owed, bounded by a quarter chunk and [`MAX_BACKOFF`].
    fn backoff_for(&self, missing: u64) -> Duration {
        let nanos = (missing as u128 * 1_000_000_000).div_ceil(self.rate_hz as u128);
        let due = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
        let cap = (self.chunk_duration() / 4).clamp(MIN_BACKOFF, MAX_BACKOFF);
        due.clamp(MIN_BACKOFF, cap)
    }
}
