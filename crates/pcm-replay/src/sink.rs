//! Frame sinks.
//!
//! A [`Sink`] receives stream metadata once, then one frame at a time. Pushes must not block:
//! a sink that cannot take a frame returns an error and the session fails rather than stall.
//!
//! Implementations:
//! - [`ChannelSink`]: bounded crossbeam channel, for hosts that consume frames in-process
//! - [`WireSink`]: framed byte stream (see `replay_proto`) over any `Write`
//!
//! Network writers carry a write timeout; a receiver that stops reading turns into
//! [`SinkError::Full`] once it expires.

use std::io::{BufWriter, Write};
use std::net::TcpStream;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use replay_proto::{FrameKind, StreamInfo};

use crate::config::OutputTarget;
use crate::error::SinkError;

/// Consumer of replayed frames.
pub trait Sink {
    /// Attach stream metadata. Called once, before the first frame.
    fn open(&mut self, info: &StreamInfo) -> Result<(), SinkError>;

    /// Accept one frame (`channel_count` samples).
    fn push_frame(&mut self, frame: &[f32]) -> Result<(), SinkError>;

    /// End of one emitted chunk.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// A new pass over the source starts (loop playback).
    fn begin_pass(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// The session failed; tell the consumer why before it is closed.
    fn abort(&mut self, _reason: &str) {}

    /// Release the consumer. Must be safe to call after an error.
    fn close(&mut self) {}
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn open(&mut self, info: &StreamInfo) -> Result<(), SinkError> {
        (**self).open(info)
    }

    fn push_frame(&mut self, frame: &[f32]) -> Result<(), SinkError> {
        (**self).push_frame(frame)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }

    fn begin_pass(&mut self) -> Result<(), SinkError> {
        (**self).begin_pass()
    }

    fn abort(&mut self, reason: &str) {
        (**self).abort(reason)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Messages delivered by [`ChannelSink`].
#[derive(Clone, Debug, PartialEq)]
pub enum SinkEvent {
    Opened(StreamInfo),
    Frame(Vec<f32>),
    PassStart,
    Closed,
}

/// Non-blocking sink over a bounded channel.
pub struct ChannelSink {
    tx: Sender<SinkEvent>,
    closed: bool,
}

impl ChannelSink {
    /// Create a sink and its receiving end holding at most `capacity` events.
    pub fn bounded(capacity: usize) -> (Self, Receiver<SinkEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        (Self { tx, closed: false }, rx)
    }

    fn send(&self, event: SinkEvent) -> Result<(), SinkError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Full,
            TrySendError::Disconnected(_) => SinkError::Disconnected,
        })
    }
}

impl Sink for ChannelSink {
    fn open(&mut self, info: &StreamInfo) -> Result<(), SinkError> {
        self.send(SinkEvent::Opened(info.clone()))
    }

    fn push_frame(&mut self, frame: &[f32]) -> Result<(), SinkError> {
        self.send(SinkEvent::Frame(frame.to_vec()))
    }

    fn begin_pass(&mut self) -> Result<(), SinkError> {
        self.send(SinkEvent::PassStart)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.send(SinkEvent::Closed);
        }
    }
}

/// Sink writing the framed wire protocol.
///
/// Frames pushed between two flushes travel in a single `SAMPLES` frame.
pub struct WireSink<W: Write> {
    writer: W,
    pending: Vec<f32>,
    opened: bool,
    closed: bool,
}

impl<W: Write> WireSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pending: Vec::new(),
            opened: false,
            closed: false,
        }
    }

    /// Recover the writer (tests inspect what was written).
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Sink for WireSink<W> {
    fn open(&mut self, info: &StreamInfo) -> Result<(), SinkError> {
        replay_proto::write_prelude(&mut self.writer)?;
        let payload = replay_proto::encode_stream_info(info)?;
        replay_proto::write_frame(&mut self.writer, FrameKind::StreamInfo, &payload)?;
        self.writer.flush()?;
        self.opened = true;
        Ok(())
    }

    fn push_frame(&mut self, frame: &[f32]) -> Result<(), SinkError> {
        self.pending.extend_from_slice(frame);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let payload = replay_proto::encode_samples(&self.pending);
        self.pending.clear();
        replay_proto::write_frame(&mut self.writer, FrameKind::Samples, &payload)?;
        self.writer.flush()?;
        Ok(())
    }

    fn begin_pass(&mut self) -> Result<(), SinkError> {
        replay_proto::write_frame(&mut self.writer, FrameKind::PassStart, &[])?;
        Ok(())
    }

    fn abort(&mut self, reason: &str) {
        if self.closed || !self.opened {
            return;
        }
        self.closed = true;
        self.pending.clear();
        let result =
            replay_proto::write_frame(&mut self.writer, FrameKind::Error, reason.as_bytes())
                .and_then(|_| self.writer.flush());
        if let Err(e) = result {
            tracing::warn!("sink abort: {e}");
        }
    }

    fn close(&mut self) {
        if self.closed || !self.opened {
            self.closed = true;
            return;
        }
        self.closed = true;
        let result = self
            .flush()
            .and_then(|_| Ok(replay_proto::write_frame(&mut self.writer, FrameKind::End, &[])?))
            .and_then(|_| Ok(self.writer.flush()?));
        if let Err(e) = result {
            tracing::warn!("sink close: {e}");
        }
    }
}

/// Shortest write timeout applied to network outputs.
pub const MIN_WRITE_TIMEOUT: Duration = Duration::from_millis(5);

/// Write timeout for a stream releasing one chunk every `chunk_duration`.
pub fn write_timeout(chunk_duration: Duration) -> Duration {
    chunk_duration.max(MIN_WRITE_TIMEOUT)
}

/// Connect or create the byte stream behind `target`.
///
/// TCP writes give up after `write_timeout`. Stdout and files have no timeout.
pub fn open_output(
    target: &OutputTarget,
    write_timeout: Duration,
) -> std::io::Result<WireSink<Box<dyn Write + Send>>> {
    let writer: Box<dyn Write + Send> = match target {
        OutputTarget::Stdout => Box::new(BufWriter::new(std::io::stdout())),
        OutputTarget::Tcp(addr) => {
            let stream = TcpStream::connect(addr.as_str())?;
            stream.set_nodelay(true)?;
            stream.set_write_timeout(Some(write_timeout.max(MIN_WRITE_TIMEOUT)))?;
            tracing::info!(peer = %addr, ?write_timeout, "connected to receiver");
            Box::new(BufWriter::new(stream))
        }
        OutputTarget::File(path) => Box::new(BufWriter::new(std::fs::File::create(path)?)),
    };
    Ok(WireSink::new(writer))
}
