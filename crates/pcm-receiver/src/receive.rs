//! Accept replay streams over TCP and play them.
//!
//! One client at a time. Each connection carries the prelude, one `STREAM_INFO` frame and then
//! sample frames until `END` (or the sender hangs up).

use std::io::{BufReader, ErrorKind, Read};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use cpal::traits::StreamTrait;
use replay_proto::{CHANNEL_FORMAT_FLOAT32, FrameKind, StreamInfo};

use crate::config::ReceiverConfig;
use crate::device;
use crate::playback::{self, OutputCounters};
use crate::queue::SharedAudio;

pub const MAX_CHANNELS: u16 = 8;
/// Largest relative difference between stream and device rates accepted without resampling.
pub const RATE_TOLERANCE: f64 = 0.001;

const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// What the reader saw on one connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PumpSummary {
    pub frames: u64,
    /// Passes announced by the sender, including the first.
    pub passes: u64,
    /// `END` was received (as opposed to a hang-up or cancel).
    pub ended: bool,
}

/// Reject layouts the output path cannot carry.
pub fn check_stream(info: &StreamInfo) -> Result<()> {
    if info.channel_count == 0 || info.channel_count > MAX_CHANNELS {
        bail!(
            "stream has {} channels (supported: 1..={MAX_CHANNELS})",
            info.channel_count
        );
    }
    if info.channel_format != CHANNEL_FORMAT_FLOAT32 {
        bail!("unsupported channel format {}", info.channel_format);
    }
    if info.nominal_srate == 0 {
        bail!("stream has no sample rate");
    }
    Ok(())
}

/// Fail unless the device runs within [`RATE_TOLERANCE`] of the stream's nominal rate.
pub fn check_device_rate(stream_hz: u32, device_hz: u32) -> Result<()> {
    let diff = stream_hz.abs_diff(device_hz) as f64;
    if diff > stream_hz as f64 * RATE_TOLERANCE {
        bail!(
            "device rate {device_hz} Hz does not match stream rate {stream_hz} Hz (no resampling)"
        );
    }
    Ok(())
}

/// Read the prelude and the leading `STREAM_INFO` frame.
pub fn read_stream_header(r: &mut impl Read) -> Result<StreamInfo> {
    replay_proto::read_prelude(&mut *r).context("read prelude")?;
    let (kind, payload) = replay_proto::read_frame(&mut *r).context("read stream info")?;
    match kind {
        FrameKind::StreamInfo => {
            replay_proto::decode_stream_info(&payload).context("decode stream info")
        }
        FrameKind::Error => Err(anyhow!(
            "sender error: {}",
            String::from_utf8_lossy(&payload)
        )),
        other => Err(anyhow!("expected STREAM_INFO, got {other:?}")),
    }
}

/// Move sample frames from `r` into `queue` until `END`, hang-up or cancel.
pub fn pump_samples(
    r: &mut impl Read,
    channels: usize,
    queue: &SharedAudio,
    cancel: &AtomicBool,
) -> Result<PumpSummary> {
    let mut summary = PumpSummary {
        passes: 1,
        ..PumpSummary::default()
    };
    let mut samples = Vec::new();

    while !cancel.load(Ordering::Relaxed) {
        let (kind, payload) = match replay_proto::read_frame(&mut *r) {
            Ok(frame) => frame,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                tracing::warn!(frames = summary.frames, "sender disconnected before END");
                return Ok(summary);
            }
            Err(e) => return Err(e).context("read frame"),
        };

        match kind {
            FrameKind::Samples => {
                samples.clear();
                let frames = replay_proto::decode_samples(&payload, channels, &mut samples)?;
                if !queue.push_interleaved_blocking(&samples) {
                    return Ok(summary);
                }
                summary.frames += frames as u64;
            }
            FrameKind::PassStart => {
                summary.passes += 1;
                tracing::info!(pass = summary.passes, frames = summary.frames, "sender looped");
            }
            FrameKind::End => {
                summary.ended = true;
                return Ok(summary);
            }
            FrameKind::Error => {
                bail!("sender error: {}", String::from_utf8_lossy(&payload));
            }
            FrameKind::StreamInfo => bail!("unexpected STREAM_INFO mid-stream"),
        }
    }
    Ok(summary)
}

/// Listen on `config.bind` and play one client at a time until `cancel` is raised.
pub fn run_receiver(config: &ReceiverConfig, cancel: Arc<AtomicBool>) -> Result<()> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, config.device.as_deref())?;
    tracing::info!(
        device = %device::device_name(&device).unwrap_or_default(),
        "output device"
    );

    let listener =
        TcpListener::bind(config.bind).with_context(|| format!("bind {}", config.bind))?;
    listener
        .set_nonblocking(true)
        .context("set listener non-blocking")?;
    tracing::info!(bind = %config.bind, "listening for replay streams");

    while !cancel.load(Ordering::Relaxed) {
        let (stream, peer) = match listener.accept() {
            Ok(conn) => conn,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
                continue;
            }
            Err(e) => {
                tracing::warn!("accept error: {e}");
                continue;
            }
        };

        tracing::info!(peer = %peer, "client connected");
        if let Err(e) = serve_client(&device, config, stream, &cancel) {
            tracing::warn!(peer = %peer, "stream rejected or failed: {e:#}");
        }
        tracing::info!("client disconnected; ready for next connection");
    }
    Ok(())
}

fn serve_client(
    device: &cpal::Device,
    config: &ReceiverConfig,
    stream: TcpStream,
    cancel: &AtomicBool,
) -> Result<()> {
    stream
        .set_nonblocking(false)
        .context("set client blocking")?;
    let mut reader = BufReader::new(stream);

    let info = read_stream_header(&mut reader)?;
    check_stream(&info)?;

    let supported = device::pick_output_config(device, info.nominal_srate)?;
    check_device_rate(info.nominal_srate, supported.sample_rate())?;
    let mut stream_config: cpal::StreamConfig = supported.clone().into();
    if let Some(buf) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = buf;
    }

    let channels = info.channel_count as usize;
    tracing::info!(
        name = %info.name,
        kind = %info.kind,
        source = %info.source_id,
        channels,
        rate_hz = info.nominal_srate,
        device_channels = stream_config.channels,
        "stream accepted"
    );

    let queue = Arc::new(
        SharedAudio::new(channels, config.queue_frames(info.nominal_srate))
            .with_low_buffer_frames(config.low_buffer_frames(info.nominal_srate)),
    );
    let counters = Arc::new(OutputCounters::default());
    let output = playback::build_output_stream(
        device,
        &stream_config,
        supported.sample_format(),
        &queue,
        &counters,
    )?;
    output.play().context("start output stream")?;

    let pumped = pump_samples(&mut reader, channels, &queue, cancel);
    queue.close();
    let summary = match pumped {
        Ok(summary) => summary,
        Err(e) => {
            queue.clear();
            return Err(e);
        }
    };

    if summary.ended {
        queue.wait_until_drained_or_cancel(cancel);
    } else {
        queue.clear();
    }

    let (played, underrun_frames, underrun_events) = counters.snapshot();
    tracing::info!(
        frames = summary.frames,
        passes = summary.passes,
        played,
        underrun_frames,
        underrun_events,
        "stream finished"
    );
    Ok(())
}
