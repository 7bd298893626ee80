//! CPAL output stream fed from a [`SharedAudio`] queue.
//!
//! The callback refills a local buffer without blocking, maps the stream's channels onto the
//! device's, and writes silence on underrun.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use crate::queue::SharedAudio;

/// Frames pulled from the queue per refill.
const REFILL_MAX_FRAMES: usize = 2048;

/// Output-side counters, shared with the reader thread for status logs.
#[derive(Debug, Default)]
pub struct OutputCounters {
    pub played_frames: AtomicU64,
    pub underrun_frames: AtomicU64,
    pub underrun_events: AtomicU64,
}

impl OutputCounters {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.played_frames.load(Ordering::Relaxed),
            self.underrun_frames.load(Ordering::Relaxed),
            self.underrun_events.load(Ordering::Relaxed),
        )
    }
}

/// Build (but do not start) an output stream draining `queue`.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SharedAudio>,
    counters: &Arc<OutputCounters>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, counters),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, counters),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, counters),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, counters),
        other => Err(anyhow!("unsupported device sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SharedAudio>,
    counters: &Arc<OutputCounters>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let dst_channels = (config.channels as usize).max(1);
    let mut local = LocalBuffer::new(queue.channels());
    let queue = queue.clone();
    let counters = counters.clone();
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / dst_channels;
            let mut filled = 0usize;

            for frame_idx in 0..frames {
                if local.is_empty() {
                    match queue.pop_nonblocking(REFILL_MAX_FRAMES) {
                        Some(samples) => local.refill(samples),
                        None => {
                            counters.underrun_events.fetch_add(1, Ordering::Relaxed);
                            counters
                                .underrun_frames
                                .fetch_add((frames - frame_idx) as u64, Ordering::Relaxed);
                            data[frame_idx * dst_channels..].fill(silence);
                            break;
                        }
                    }
                }
                let start = frame_idx * dst_channels;
                let out = &mut data[start..start + dst_channels];
                for (ch, slot) in out.iter_mut().enumerate() {
                    *slot = <T as cpal::Sample>::from_sample::<f32>(local.mapped(ch, dst_channels));
                }
                local.advance();
                filled += 1;
            }

            if filled > 0 {
                counters
                    .played_frames
                    .fetch_add(filled as u64, Ordering::Relaxed);
            }
        },
        |err| tracing::warn!("output stream error: {err}"),
        None,
    )?;

    Ok(stream)
}

/// Samples already taken from the queue but not yet written to the device.
struct LocalBuffer {
    src_channels: usize,
    samples: Vec<f32>,
    pos: usize,
}

impl LocalBuffer {
    fn new(src_channels: usize) -> Self {
        Self {
            src_channels: src_channels.max(1),
            samples: Vec::new(),
            pos: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.pos + self.src_channels > self.samples.len()
    }

    fn refill(&mut self, samples: Vec<f32>) {
        self.samples = samples;
        self.pos = 0;
    }

    fn advance(&mut self) {
        self.pos += self.src_channels;
    }

    /// Sample for output channel `dst_ch` of the current frame.
    ///
    /// Mono is duplicated to every output, stereo is averaged onto a mono device, and other
    /// layouts map channel-for-channel with extra outputs repeating the last source channel.
    fn mapped(&self, dst_ch: usize, dst_channels: usize) -> f32 {
        let frame = &self.samples[self.pos..self.pos + self.src_channels];
        match (self.src_channels, dst_channels) {
            (1, _) => frame[0],
            (2, 1) => 0.5 * (frame[0] + frame[1]),
            (src, _) => frame[dst_ch.min(src - 1)],
        }
    }
}
