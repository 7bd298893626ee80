//! Output device discovery and configuration.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the first output device whose name contains `needle` (case-insensitive), or the
/// host default when no needle is given.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    if let Some(needle) = needle {
        let devices = host.output_devices().context("no output devices")?;
        for d in devices {
            if device_name(&d).is_some_and(|name| matches_device_name(&name, needle)) {
                return Ok(d);
            }
        }
        return Err(anyhow!("no output device matched: {needle}"));
    }

    host.default_output_device()
        .ok_or_else(|| anyhow!("no default output device"))
}

pub fn device_name(device: &cpal::Device) -> Option<String> {
    device
        .description()
        .ok()
        .map(|desc| desc.name().to_string())
}

/// Names of the host's output devices, in enumeration order.
pub fn output_device_names(host: &cpal::Host) -> Result<Vec<String>> {
    let devices = host.output_devices().context("no output devices")?;
    Ok(devices
        .map(|d| device_name(&d).unwrap_or_else(|| "<unnamed>".to_string()))
        .collect())
}

/// Choose an output config for a stream at `rate_hz`.
///
/// Ranges that contain the rate win; otherwise the closest supported rate is used and the
/// caller decides whether it is acceptable. Ties go to the better sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    rate_hz: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let mut best: Option<((u32, u8), cpal::SupportedStreamConfig)> = None;

    for range in device
        .supported_output_configs()
        .context("query output configs")?
    {
        let rate = rate_for_range(range.min_sample_rate(), range.max_sample_rate(), rate_hz);
        let key = (rate.abs_diff(rate_hz), sample_format_rank(range.sample_format()));
        if best.as_ref().is_none_or(|(best_key, _)| key < *best_key) {
            best = Some((key, range.with_sample_rate(rate)));
        }
    }

    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| anyhow!("device reports no output configs"))
}

/// Largest fixed buffer the device allows, capped at 16384 frames; `None` keeps the default.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    const MAX_FRAMES: u32 = 16_384;
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            Some(cpal::BufferSize::Fixed((*max).min(MAX_FRAMES).max(*min)))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}
