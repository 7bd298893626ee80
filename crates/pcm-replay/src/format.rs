//! PCM sample formats and normalization to `f32`.
//!
//! Every supported encoding is little-endian integer PCM. Conversion is a fixed
//! scale per encoding:
//! - `u8`: `v / 128 - 1`
//! - `s16`: `v / 32768`
//! - `s24`: `v / 8388608` (3 bytes, sign-extended)
//! - `s32`: `v / 2147483648`
//!
//! The negative full-scale value maps to exactly `-1.0`; the positive edge stays just below
//! `1.0` (except `s32`, where `f32` rounding lands on `1.0`).

use std::time::Duration;

use crate::error::{ReplayError, Result};
use crate::source::FrameSource;

/// Closed set of integer PCM encodings accepted by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleEncoding {
    U8,
    S16,
    S24,
    S32,
}

/// Outcome of decoding one byte run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Whole frames appended to the output.
    pub frames: usize,
    /// Trailing bytes that did not form a whole frame.
    pub dropped_bytes: usize,
}

impl SampleEncoding {
    /// Map a declared bit depth to an encoding; anything else is unsupported.
    pub fn from_bit_depth(bits: u16) -> Result<Self> {
        match bits {
            8 => Ok(SampleEncoding::U8),
            16 => Ok(SampleEncoding::S16),
            24 => Ok(SampleEncoding::S24),
            32 => Ok(SampleEncoding::S32),
            other => Err(ReplayError::UnsupportedFormat(format!(
                "bit depth {other} (supported: 8, 16, 24, 32)"
            ))),
        }
    }

    pub fn bit_depth(self) -> u16 {
        match self {
            SampleEncoding::U8 => 8,
            SampleEncoding::S16 => 16,
            SampleEncoding::S24 => 24,
            SampleEncoding::S32 => 32,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        self.bit_depth() as usize / 8
    }

    /// Normalize one sample.
    ///
    /// `bytes` must hold exactly [`bytes_per_sample`](Self::bytes_per_sample) bytes.
    #[inline]
    pub fn decode_sample(self, bytes: &[u8]) -> f32 {
        match self {
            SampleEncoding::U8 => (bytes[0] as f32 / 128.0) - 1.0,
            SampleEncoding::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32_768.0,
            SampleEncoding::S24 => {
                // Place the 3 bytes in the top of an i32 and shift back to sign-extend.
                let v = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
                v as f32 / 8_388_608.0
            }
            SampleEncoding::S32 => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32
                    / 2_147_483_648.0
            }
        }
    }

    /// Decode interleaved PCM into `out`, keeping only whole frames of `channels` samples.
    pub fn decode_interleaved(
        self,
        bytes: &[u8],
        channels: usize,
        out: &mut Vec<f32>,
    ) -> DecodeStats {
        let width = self.bytes_per_sample();
        let frame_bytes = width * channels.max(1);
        let frames = bytes.len() / frame_bytes;
        let usable = frames * frame_bytes;

        out.reserve(frames * channels);
        out.extend(
            bytes[..usable]
                .chunks_exact(width)
                .map(|sample| self.decode_sample(sample)),
        );

        DecodeStats {
            frames,
            dropped_bytes: bytes.len() - usable,
        }
    }
}

impl std::fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SampleEncoding::U8 => "8-bit unsigned",
            SampleEncoding::S16 => "16-bit signed",
            SampleEncoding::S24 => "24-bit signed",
            SampleEncoding::S32 => "32-bit signed",
        };
        f.write_str(name)
    }
}

/// Immutable layout of a source, validated once when a session opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub channels: u16,
    pub frame_rate: u32,
    pub encoding: SampleEncoding,
    /// `None` for sources that cannot report their length.
    pub frame_count: Option<u64>,
}

impl StreamDescriptor {
    pub fn new(
        channels: u16,
        frame_rate: u32,
        bit_depth: u16,
        frame_count: Option<u64>,
    ) -> Result<Self> {
        if channels == 0 {
            return Err(ReplayError::InvalidStream(
                "channel count must be at least 1".to_string(),
            ));
        }
        if frame_rate == 0 {
            return Err(ReplayError::InvalidStream(
                "frame rate must be positive".to_string(),
            ));
        }
        let encoding = SampleEncoding::from_bit_depth(bit_depth)?;
        Ok(Self {
            channels,
            frame_rate,
            encoding,
            frame_count,
        })
    }

    /// Read and validate the layout reported by `source`.
    pub fn from_source(source: &dyn FrameSource) -> Result<Self> {
        Self::new(
            source.channel_count(),
            source.frame_rate(),
            source.bit_depth(),
            source.frame_count(),
        )
    }

    pub fn channel_count(&self) -> usize {
        self.channels as usize
    }

    pub fn frame_bytes(&self) -> usize {
        self.encoding.bytes_per_sample() * self.channel_count()
    }

    /// Playback time of one pass, when the frame count is known.
    pub fn duration(&self) -> Option<Duration> {
        self.frame_count
            .map(|frames| frames_to_duration(frames, self.frame_rate))
    }
}

/// Exact-ish conversion of a frame count at `rate_hz` to wall time (nanosecond floor).
pub fn frames_to_duration(frames: u64, rate_hz: u32) -> Duration {
    if rate_hz == 0 {
        return Duration::ZERO;
    }
    let nanos = (frames as u128 * 1_000_000_000) / rate_hz as u128;
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
