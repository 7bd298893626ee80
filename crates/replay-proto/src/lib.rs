//! Wire protocol shared by the `pcm-replay` streamer and the receiver.
//!
//! Framed stream over a single byte pipe (TCP, stdout, file).
//! Frames allow:
//! - announcing the stream layout once (`StreamInfo`)
//! - carrying interleaved `f32` sample chunks
//! - marking loop boundaries and a clean end of stream
//!
//! Frame format:
//! - magic: 4 bytes "PCMR" (once, at connection start)
//! - version: u16 LE (once, at connection start)
//! - then repeated frames:
//!   - kind: u8
//!   - len: u32 LE
//!   - payload: [u8; len]

use std::io::{self, Read, Write};

mod info;

pub use info::{ChannelInfo, StreamInfo, CHANNEL_FORMAT_FLOAT32};

pub const MAGIC: [u8; 4] = *b"PCMR";
pub const VERSION: u16 = 1;

/// Upper bound for a single frame payload; larger headers are treated as corrupt.
pub const MAX_PAYLOAD_BYTES: u32 = 16 * 1024 * 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Stream layout and descriptive metadata (JSON payload).
    StreamInfo = 0x10,
    /// Interleaved `f32` LE samples, whole frames only.
    Samples = 0x11,
    /// A new pass over the source begins (loop playback).
    PassStart = 0x12,
    /// Sender finished the stream.
    End = 0x13,

    Error = 0x7F,
}

impl FrameKind {
    pub fn from_u8(b: u8) -> io::Result<Self> {
        let k = match b {
            0x10 => FrameKind::StreamInfo,
            0x11 => FrameKind::Samples,
            0x12 => FrameKind::PassStart,
            0x13 => FrameKind::End,
            0x7F => FrameKind::Error,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown frame kind {b:#x}"),
                ));
            }
        };
        Ok(k)
    }
}

/// Connection prelude: magic + version.
pub fn write_prelude(mut w: impl Write) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    Ok(())
}

/// Read and validate the connection prelude.
pub fn read_prelude(mut r: impl Read) -> io::Result<()> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad magic"));
    }

    let mut ver = [0u8; 2];
    r.read_exact(&mut ver)?;
    let version = u16::from_le_bytes(ver);
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported version {version}"),
        ));
    }

    Ok(())
}

/// Write a frame header + payload.
pub fn write_frame(mut w: impl Write, kind: FrameKind, payload: &[u8]) -> io::Result<()> {
    let frame = encode_frame(kind, payload)?;
    w.write_all(&frame)?;
    Ok(())
}

/// Encode a frame into a single buffer (header + payload).
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> io::Result<Vec<u8>> {
    let len: u32 = payload
        .len()
        .try_into()
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_BYTES)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "payload too large"))?;

    let mut out = Vec::with_capacity(1 + 4 + payload.len());
    out.push(kind as u8);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Read a frame header and return `(kind, len)`.
///
/// The caller should then read exactly `len` bytes of payload.
pub fn read_frame_header(mut r: impl Read) -> io::Result<(FrameKind, u32)> {
    let mut kindb = [0u8; 1];
    r.read_exact(&mut kindb)?;
    let kind = FrameKind::from_u8(kindb[0])?;

    let mut lenb = [0u8; 4];
    r.read_exact(&mut lenb)?;
    let len = u32::from_le_bytes(lenb);
    Ok((kind, len))
}

/// Read one whole frame, rejecting payloads above [`MAX_PAYLOAD_BYTES`].
pub fn read_frame(mut r: impl Read) -> io::Result<(FrameKind, Vec<u8>)> {
    let (kind, len) = read_frame_header(&mut r)?;
    if len > MAX_PAYLOAD_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame payload of {len} bytes exceeds limit"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok((kind, payload))
}

/// Encode a `SAMPLES` payload: interleaved `f32` LE.
pub fn encode_samples(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 4);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Decode a `SAMPLES` payload into `out`, checking it holds whole frames of `channels`.
pub fn decode_samples(payload: &[u8], channels: usize, out: &mut Vec<f32>) -> io::Result<usize> {
    let frame_bytes = channels.max(1) * 4;
    if payload.len() % frame_bytes != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "SAMPLES payload of {} bytes is not a whole number of {channels}-channel frames",
                payload.len()
            ),
        ));
    }
    out.extend(
        payload
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
    );
    Ok(payload.len() / frame_bytes)
}

/// Encode a `STREAM_INFO` payload (JSON).
pub fn encode_stream_info(info: &StreamInfo) -> io::Result<Vec<u8>> {
    serde_json::to_vec(info).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// Decode a `STREAM_INFO` payload.
pub fn decode_stream_info(payload: &[u8]) -> io::Result<StreamInfo> {
    serde_json::from_slice(payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn prelude_roundtrip_ok() {
        let mut buf = Vec::new();
        write_prelude(&mut buf).unwrap();
        let mut cur = Cursor::new(buf);
        read_prelude(&mut cur).unwrap();
    }

    #[test]
    fn prelude_rejects_bad_magic() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"ABRD");
        buf.extend_from_slice(&VERSION.to_le_bytes());
        let mut cur = Cursor::new(buf);
        let err = read_prelude(&mut cur).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn prelude_rejects_bad_version() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&(VERSION + 1).to_le_bytes());
        let mut cur = Cursor::new(buf);
        let err = read_prelude(&mut cur).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unknown_frame_kind_is_invalid_data() {
        let err = FrameKind::from_u8(0x55).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn write_frame_then_read_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, FrameKind::PassStart, &[]).unwrap();
        write_frame(&mut buf, FrameKind::Error, b"boom").unwrap();

        let mut cur = Cursor::new(buf);
        let (kind, payload) = read_frame(&mut cur).unwrap();
        assert_eq!(kind, FrameKind::PassStart);
        assert!(payload.is_empty());
        let (kind, payload) = read_frame(&mut cur).unwrap();
        assert_eq!(kind, FrameKind::Error);
        assert_eq!(payload, b"boom");
    }

    #[test]
    fn read_frame_rejects_oversized_header() {
        let mut buf = vec![FrameKind::Samples as u8];
        buf.extend_from_slice(&(MAX_PAYLOAD_BYTES + 1).to_le_bytes());
        let err = read_frame(Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn samples_keep_exact_bits() {
        let samples = [-1.0f32, 0.999_969_5, 0.0, -0.003_051_757_8];
        let payload = encode_samples(&samples);
        assert_eq!(payload.len(), 16);

        let mut out = Vec::new();
        let frames = decode_samples(&payload, 2, &mut out).unwrap();
        assert_eq!(frames, 2);
        for (a, b) in samples.iter().zip(&out) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn samples_reject_partial_frames() {
        let payload = encode_samples(&[0.5, 0.25, 0.125]);
        let mut out = Vec::new();
        let err = decode_samples(&payload, 2, &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(out.is_empty());
    }

    #[test]
    fn stream_info_payload_roundtrip() {
        let info = StreamInfo::new("audio", "audio", 2, 44_100, "pcm_file_a.wav");
        let payload = encode_stream_info(&info).unwrap();
        let decoded = decode_stream_info(&payload).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn stream_info_rejects_garbage() {
        let err = decode_stream_info(b"{not json").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
