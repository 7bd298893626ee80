//! RIFF/WAVE frame source.
//!
//! Uses Symphonia to:
//! - probe the container and locate the PCM track
//! - pull packets, which for WAVE carry the raw interleaved sample bytes
//!
//! Packets are re-sliced into runs of whole frames; sample conversion happens in
//! [`format`](crate::format), not here.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use symphonia::core::codecs::{
    CODEC_TYPE_PCM_S16LE, CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32LE, CODEC_TYPE_PCM_U8,
    CodecParameters, CodecType,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{ReplayError, Result};
use crate::source::FrameSource;

/// Integer little-endian PCM file read through Symphonia's WAVE reader.
pub struct WavSource {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    track_id: u32,
    channels: u16,
    frame_rate: u32,
    bit_depth: u16,
    frame_count: Option<u64>,
    /// Bytes pulled from the last packet that did not fit the previous request.
    pending: Vec<u8>,
    eof: bool,
}

impl WavSource {
    /// Probe `path` and validate that it carries supported integer PCM.
    pub fn open(path: &Path) -> Result<Self> {
        let open_err = |reason: String| ReplayError::SourceOpen {
            source_name: path.display().to_string(),
            reason,
        };

        let file = File::open(path).map_err(|e| open_err(e.to_string()))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| match declared_pcm_bits(path) {
                Some(bits) if !matches!(bits, 8 | 16 | 24 | 32) => {
                    ReplayError::UnsupportedFormat(format!(
                        "bit depth {bits} (only little-endian integer PCM at 8, 16, 24 or 32 bits)"
                    ))
                }
                _ => open_err(e.to_string()),
            })?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| open_err("no default audio track".to_string()))?;
        let params = track.codec_params.clone();
        let track_id = track.id;

        let bit_depth = bit_depth_for_codec(&params)?;
        let channels = params
            .channels
            .ok_or_else(|| open_err("unknown channel layout".to_string()))?
            .count();
        let channels = u16::try_from(channels)
            .map_err(|_| open_err(format!("{channels} channels is out of range")))?;
        let frame_rate = params
            .sample_rate
            .ok_or_else(|| open_err("unknown sample rate".to_string()))?;

        tracing::info!(
            path = %path.display(),
            channels,
            rate_hz = frame_rate,
            bit_depth,
            frames = ?params.n_frames,
            "source opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            format,
            track_id,
            channels,
            frame_rate,
            bit_depth,
            frame_count: params.n_frames,
            pending: Vec::new(),
            eof: false,
        })
    }

    fn frame_bytes(&self) -> usize {
        (self.bit_depth as usize / 8) * self.channels as usize
    }

    /// Pull the next packet of this track into `pending`; sets `eof` at the end of data.
    fn fill_pending(&mut self) -> Result<()> {
        loop {
            match self.format.next_packet() {
                Ok(packet) => {
                    if packet.track_id() != self.track_id {
                        continue;
                    }
                    self.pending.extend_from_slice(packet.buf());
                    return Ok(());
                }
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    self.eof = true;
                    return Ok(());
                }
                Err(e) => {
                    return Err(ReplayError::SourceRead(format!(
                        "{}: {e}",
                        self.path.display()
                    )));
                }
            }
        }
    }
}

impl FrameSource for WavSource {
    fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    fn frame_rate(&self) -> u32 {
        self.frame_rate
    }

    fn channel_count(&self) -> u16 {
        self.channels
    }

    fn bit_depth(&self) -> u16 {
        self.bit_depth
    }

    fn read_frames(&mut self, frames: usize, buf: &mut Vec<u8>) -> Result<usize> {
        let want = frames.saturating_mul(self.frame_bytes());
        while self.pending.len() < want && !self.eof {
            self.fill_pending()?;
        }

        let take = want.min(self.pending.len());
        buf.extend(self.pending.drain(..take));
        Ok(take)
    }

    fn rewind(&mut self) -> Result<()> {
        self.format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: 0,
                    track_id: self.track_id,
                },
            )
            .map_err(|e| {
                ReplayError::SourceRead(format!("{}: rewind failed: {e}", self.path.display()))
            })?;
        self.pending.clear();
        self.eof = false;
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Bit depth for the codecs the engine can replay; everything else is rejected at open.
fn bit_depth_for_codec(params: &CodecParameters) -> Result<u16> {
    match codec_bit_depth(params.codec) {
        Some(bits) => Ok(bits),
        None => {
            let declared = params
                .bits_per_sample
                .or(params.bits_per_coded_sample)
                .map(|b| format!("{b}-bit "))
                .unwrap_or_default();
            Err(ReplayError::UnsupportedFormat(format!(
                "{declared}{} samples (only little-endian integer PCM at 8, 16, 24 or 32 bits)",
                codec_label(params.codec)
            )))
        }
    }
}

fn codec_bit_depth(codec: CodecType) -> Option<u16> {
    match codec {
        CODEC_TYPE_PCM_U8 => Some(8),
        CODEC_TYPE_PCM_S16LE => Some(16),
        CODEC_TYPE_PCM_S24LE => Some(24),
        CODEC_TYPE_PCM_S32LE => Some(32),
        _ => None,
    }
}

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// `bits_per_sample` of an integer PCM `fmt ` chunk, read straight from the RIFF header.
///
/// Used to name the depth when the container reader refuses the file.
fn declared_pcm_bits(path: &Path) -> Option<u16> {
    let mut r = BufReader::new(File::open(path).ok()?);
    let mut header = [0u8; 12];
    r.read_exact(&mut header).ok()?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return None;
    }

    // A handful of chunks (LIST, fact, ...) may precede `fmt `.
    for _ in 0..16 {
        let mut chunk = [0u8; 8];
        r.read_exact(&mut chunk).ok()?;
        let size = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        if &chunk[0..4] != b"fmt " {
            // Chunks are word aligned.
            r.seek(SeekFrom::Current(i64::from(size) + i64::from(size & 1)))
                .ok()?;
            continue;
        }
        if size < 16 {
            return None;
        }
        let mut fmt = [0u8; 16];
        r.read_exact(&mut fmt).ok()?;
        let tag = u16::from_le_bytes([fmt[0], fmt[1]]);
        let bits = u16::from_le_bytes([fmt[14], fmt[15]]);
        return matches!(tag, WAVE_FORMAT_PCM | WAVE_FORMAT_EXTENSIBLE).then_some(bits);
    }
    None
}

/// Best-effort codec label used in error messages.
fn codec_label(codec: CodecType) -> &'static str {
    use symphonia::core::codecs::*;
    match codec {
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "32-bit float",
        CODEC_TYPE_PCM_F64LE | CODEC_TYPE_PCM_F64BE => "64-bit float",
        CODEC_TYPE_PCM_S16BE | CODEC_TYPE_PCM_S24BE | CODEC_TYPE_PCM_S32BE => "big-endian PCM",
        CODEC_TYPE_PCM_S8 => "signed 8-bit PCM",
        CODEC_TYPE_PCM_ALAW | CODEC_TYPE_PCM_MULAW => "companded PCM",
        CODEC_TYPE_ADPCM_IMA_WAV | CODEC_TYPE_ADPCM_MS => "ADPCM",
        _ => "non-PCM",
    }
}
