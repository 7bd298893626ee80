//! Subcommand implementations.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, anyhow};
use pcm_receiver::ReceiverConfig;
use pcm_replay::format::frames_to_duration;
use pcm_replay::sink;
use pcm_replay::{
    FrameSource, MonotonicClock, PlaybackSession, RawLayout, RawPcmSource, ReplayConfig,
    SessionOptions, SessionReport, StreamDescriptor, StreamLabels, WavSource,
};

use crate::cli::{ReceiveArgs, StreamArgs};

/// Print output devices to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    for (i, name) in pcm_receiver::device::output_device_names(&host)?
        .iter()
        .enumerate()
    {
        println!("#{i}: {name}");
    }
    Ok(())
}

/// Replay one file until it ends or `cancel` is raised.
///
/// The source is validated before the output is touched, so a bad file never produces a
/// partial stream.
pub fn run_stream(args: &StreamArgs, cancel: Arc<AtomicBool>) -> Result<SessionReport> {
    let source = open_source(args)?;
    let descriptor = StreamDescriptor::from_source(source.as_ref())?;

    let config = replay_config(args);
    config.validate_for(&descriptor)?;

    let chunk = frames_to_duration(config.chunk_frames as u64, descriptor.frame_rate);
    let sink = sink::open_output(&args.output, sink::write_timeout(chunk))
        .with_context(|| format!("open output {}", args.output))?;
    tracing::info!(output = %args.output, "output ready");

    let options = SessionOptions {
        cancel: Some(cancel),
        emitted_frames: None,
        labels: StreamLabels {
            name: args.name.clone(),
            kind: args.kind.clone(),
        },
    };
    let report = PlaybackSession::open(source, sink, config, MonotonicClock::new(), options)?
        .run()?;
    Ok(report)
}

/// Run the receiver until `cancel` is raised.
pub fn run_receive(args: &ReceiveArgs, cancel: Arc<AtomicBool>) -> Result<()> {
    let config = ReceiverConfig {
        bind: args.bind,
        device: normalize_device_name(args.device.clone()),
        buffer_seconds: args.buffer_seconds,
        ..ReceiverConfig::default()
    };
    pcm_receiver::run_receiver(&config, cancel)
}

fn open_source(args: &StreamArgs) -> Result<Box<dyn FrameSource>> {
    if !args.raw {
        return Ok(Box::new(WavSource::open(&args.path)?));
    }
    let layout = raw_layout(args)?;
    Ok(Box::new(RawPcmSource::open(&args.path, layout)?))
}

fn raw_layout(args: &StreamArgs) -> Result<RawLayout> {
    let frame_rate = args
        .raw_rate
        .ok_or_else(|| anyhow!("--raw needs --raw-rate"))?;
    let channels = args
        .raw_channels
        .ok_or_else(|| anyhow!("--raw needs --raw-channels"))?;
    Ok(RawLayout {
        channels,
        frame_rate,
        bit_depth: args.raw_bits,
    })
}

fn replay_config(args: &StreamArgs) -> ReplayConfig {
    ReplayConfig {
        chunk_frames: args.chunk,
        loop_playback: args.loop_playback,
        max_catchup_chunks: args.max_catchup_chunks,
    }
}

fn normalize_device_name(device: Option<String>) -> Option<String> {
    device.and_then(|name| {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
