//! Bounded queue of interleaved samples between the network reader and the output callback.
//!
//! - reader thread: [`SharedAudio::push_interleaved_blocking`] (blocks when full, which is what
//!   pushes back on the TCP sender)
//! - output callback: [`SharedAudio::pop_nonblocking`] (never waits)
//!
//! Shutdown is `close()` followed by draining whatever is still buffered.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const LOW_BUFFER_LOG_INTERVAL: Duration = Duration::from_secs(1);
const NEVER_LOGGED: u64 = u64::MAX;

/// Thread-safe bounded queue of interleaved `f32` samples.
///
/// The `done` flag lives under the same mutex as the samples so close and drain cannot race.
/// The channel count is fixed for the lifetime of the queue.
pub struct SharedAudio {
    channels: usize,
    inner: Mutex<SharedInner>,
    cv: Condvar,
    max_buffered_samples: usize,
    /// Whole frames below which a pop logs a low-buffer warning; 0 disables it.
    low_buffer_frames: usize,
    created: Instant,
    /// Milliseconds after `created` of the last low-buffer log.
    last_low_log_ms: AtomicU64,
}

struct SharedInner {
    queue: VecDeque<f32>,
    done: bool,
}

impl SharedAudio {
    /// Queue holding at most `max_frames` frames of `channels` samples.
    pub fn new(channels: usize, max_frames: usize) -> Self {
        let channels = channels.max(1);
        Self {
            channels,
            inner: Mutex::new(SharedInner {
                queue: VecDeque::new(),
                done: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_frames.max(1).saturating_mul(channels),
            low_buffer_frames: 0,
            created: Instant::now(),
            last_low_log_ms: AtomicU64::new(NEVER_LOGGED),
        }
    }

    /// Warn (at most once per second) when a pop leaves fewer than `frames` frames queued.
    pub fn with_low_buffer_frames(mut self, frames: usize) -> Self {
        self.low_buffer_frames = frames;
        self
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Capacity in frames.
    pub fn max_frames(&self) -> usize {
        self.max_buffered_samples / self.channels
    }

    /// Buffered frames (snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().queue.len() / self.channels
    }

    pub fn is_done(&self) -> bool {
        self.lock().done
    }

    /// Mark the producer side finished and wake every waiter. Idempotent.
    pub fn close(&self) {
        self.lock().done = true;
        self.cv.notify_all();
    }

    /// Append samples, waiting for room while the queue is full.
    ///
    /// Returns `false` if the queue was closed before everything fit; the rest is dropped.
    pub fn push_interleaved_blocking(&self, samples: &[f32]) -> bool {
        let mut offset = 0;

        while offset < samples.len() {
            let mut g = self.lock();
            while g.queue.len() >= self.max_buffered_samples && !g.done {
                g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
            }
            if g.done {
                return false;
            }

            let room = self.max_buffered_samples - g.queue.len();
            let take = room.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + take]);
            offset += take;

            drop(g);
            self.cv.notify_all();
        }
        true
    }

    /// Take up to `max_frames` whole frames without waiting; `None` when nothing is buffered.
    pub fn pop_nonblocking(&self, max_frames: usize) -> Option<Vec<f32>> {
        let mut g = self.lock();
        let take_frames = (g.queue.len() / self.channels).min(max_frames);
        if take_frames == 0 {
            return None;
        }

        let out: Vec<f32> = g.queue.drain(..take_frames * self.channels).collect();
        let remaining = g.queue.len();
        drop(g);

        self.cv.notify_all();
        if self.is_low(remaining) {
            self.log_low_buffer(remaining / self.channels);
        }
        Some(out)
    }

    /// Block until the queue is closed and empty, or `cancel` is raised.
    ///
    /// Returns `true` when the queue drained normally.
    pub fn wait_until_drained_or_cancel(&self, cancel: &AtomicBool) -> bool {
        let mut g = self.lock();
        loop {
            if cancel.load(Ordering::Relaxed) {
                return false;
            }
            if g.done && g.queue.is_empty() {
                return true;
            }
            let (next, _timeout) = self
                .cv
                .wait_timeout(g, Duration::from_millis(50))
                .unwrap_or_else(PoisonError::into_inner);
            g = next;
        }
    }

    /// Drop everything still buffered (used when a stream is abandoned).
    pub fn clear(&self) {
        self.lock().queue.clear();
        self.cv.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, SharedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// An empty queue is an underrun, counted by the output side instead.
    fn is_low(&self, queued_samples: usize) -> bool {
        queued_samples > 0 && queued_samples / self.channels < self.low_buffer_frames
    }

    fn log_low_buffer(&self, queued_frames: usize) {
        let now = self.created.elapsed().as_millis() as u64;
        let last = self.last_low_log_ms.load(Ordering::Relaxed);
        let interval = LOW_BUFFER_LOG_INTERVAL.as_millis() as u64;
        if last != NEVER_LOGGED && now.saturating_sub(last) < interval {
            return;
        }
        self.last_low_log_ms.store(now, Ordering::Relaxed);
        tracing::warn!(
            queued_frames,
            threshold_frames = self.low_buffer_frames,
            "receive buffer low"
        );
    }
}
