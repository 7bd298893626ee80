//! Frame source adapters.
//!
//! A [`FrameSource`] hands out raw interleaved PCM in runs of whole frames. Container parsing
//! stays inside the adapter; the session only sees the layout accessors and byte runs.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{ReplayError, Result};

/// Seekable provider of raw PCM frames.
pub trait FrameSource: Send {
    /// Total frames per pass, when known.
    fn frame_count(&self) -> Option<u64>;

    /// Nominal frame rate in Hz.
    fn frame_rate(&self) -> u32;

    fn channel_count(&self) -> u16;

    /// Declared bits per sample (8, 16, 24 or 32 for supported sources).
    fn bit_depth(&self) -> u16;

    /// Append the bytes of up to `frames` frames to `buf` and return how many bytes were added.
    ///
    /// Fewer than `frames` frames are returned only when the end of the source was reached.
    fn read_frames(&mut self, frames: usize, buf: &mut Vec<u8>) -> Result<usize>;

    /// Reposition to the first frame.
    fn rewind(&mut self) -> Result<()>;

    /// Human-readable identifier (usually the path).
    fn describe(&self) -> String;
}

/// Externally declared layout for headerless PCM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawLayout {
    pub channels: u16,
    pub frame_rate: u32,
    pub bit_depth: u16,
}

impl RawLayout {
    /// Bytes per frame, rounding partial-byte depths up so odd layouts still read.
    fn frame_bytes(&self) -> usize {
        (self.bit_depth as usize).div_ceil(8) * self.channels as usize
    }
}

/// Headerless interleaved PCM read from any seekable reader.
pub struct RawPcmSource<R> {
    reader: R,
    layout: RawLayout,
    name: String,
    frame_count: Option<u64>,
}

impl<R: Read + Seek + Send> RawPcmSource<R> {
    /// Wrap `reader`; the frame count is derived from the reader length.
    pub fn new(mut reader: R, layout: RawLayout, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let len = reader
            .seek(SeekFrom::End(0))
            .and_then(|len| reader.seek(SeekFrom::Start(0)).map(|_| len))
            .map_err(|e| ReplayError::SourceOpen {
                source_name: name.clone(),
                reason: e.to_string(),
            })?;
        let frame_bytes = layout.frame_bytes();
        let frame_count = (frame_bytes > 0).then(|| len / frame_bytes as u64);
        Ok(Self {
            reader,
            layout,
            name,
            frame_count,
        })
    }
}

impl RawPcmSource<BufReader<File>> {
    /// Open a raw PCM file.
    pub fn open(path: &Path, layout: RawLayout) -> Result<Self> {
        let file = File::open(path).map_err(|e| ReplayError::SourceOpen {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::new(BufReader::new(file), layout, path.display().to_string())
    }
}

impl<R: Read + Seek + Send> FrameSource for RawPcmSource<R> {
    fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    fn frame_rate(&self) -> u32 {
        self.layout.frame_rate
    }

    fn channel_count(&self) -> u16 {
        self.layout.channels
    }

    fn bit_depth(&self) -> u16 {
        self.layout.bit_depth
    }

    fn read_frames(&mut self, frames: usize, buf: &mut Vec<u8>) -> Result<usize> {
        let want = frames.saturating_mul(self.layout.frame_bytes());
        let start = buf.len();
        buf.resize(start + want, 0);

        let mut filled = 0;
        while filled < want {
            match self.reader.read(&mut buf[start + filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    buf.truncate(start);
                    return Err(ReplayError::SourceRead(format!("{}: {e}", self.name)));
                }
            }
        }

        buf.truncate(start + filled);
        Ok(filled)
    }

    fn rewind(&mut self) -> Result<()> {
        self.reader
            .seek(SeekFrom::Start(0))
            .map(|_| ())
            .map_err(|e| ReplayError::SourceRead(format!("{}: rewind failed: {e}", self.name)))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
