//! Error types for the replay engine.

use thiserror::Error;

/// Failures reported by a [`Sink`](crate::sink::Sink) push.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The consumer buffer is full; pushing would block.
    #[error("sink buffer is full")]
    Full,

    /// The consumer went away.
    #[error("sink disconnected")]
    Disconnected,

    /// Writing to the underlying transport failed.
    #[error("sink I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl From<std::io::Error> for SinkError {
    /// A write that timed out or would block means the consumer stopped draining.
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => SinkError::Full,
            _ => SinkError::Io(e),
        }
    }
}

/// Main error type for a replay session.
#[derive(Error, Debug)]
pub enum ReplayError {
    /// Source file missing, unreadable or not a recognizable container.
    #[error("cannot open source {source_name}: {reason}")]
    SourceOpen { source_name: String, reason: String },

    /// Encoding outside u8/s16/s24/s32 little-endian PCM.
    #[error("unsupported PCM format: {0}")]
    UnsupportedFormat(String),

    /// Zero channels or zero frame rate.
    #[error("invalid stream: {0}")]
    InvalidStream(String),

    /// A read returned bytes not aligned to the frame size.
    #[error("truncated frame: dropped {dropped_bytes} bytes (frame is {frame_bytes} bytes)")]
    TruncatedFrame {
        dropped_bytes: usize,
        frame_bytes: usize,
    },

    /// Read or seek failed after the stream was opened.
    #[error("source read failed: {0}")]
    SourceRead(String),

    /// The sink refused a frame. Never retried.
    #[error("sink rejected frame: {0}")]
    SinkRejected(#[from] SinkError),

    /// Stop was requested externally.
    #[error("playback interrupted")]
    Interrupted,
}

impl ReplayError {
    /// Whether this error ends the session as `Failed` (as opposed to a clean stop or a warning).
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ReplayError::Interrupted | ReplayError::TruncatedFrame { .. }
        )
    }
}

/// Convenience Result type using [`ReplayError`].
pub type Result<T> = std::result::Result<T, ReplayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_and_truncation_are_not_fatal() {
        assert!(!ReplayError::Interrupted.is_fatal());
        assert!(
            !ReplayError::TruncatedFrame {
                dropped_bytes: 3,
                frame_bytes: 4
            }
            .is_fatal()
        );
        assert!(ReplayError::UnsupportedFormat("5-bit".into()).is_fatal());
        assert!(ReplayError::SinkRejected(SinkError::Full).is_fatal());
    }

    #[test]
    fn messages_name_the_problem() {
        let err = ReplayError::UnsupportedFormat("bit depth 5".into());
        assert_eq!(err.to_string(), "unsupported PCM format: bit depth 5");

        let err = ReplayError::SourceOpen {
            source_name: "missing.wav".into(),
            reason: "No such file".into(),
        };
        assert!(err.to_string().contains("missing.wav"));
    }

    #[test]
    fn stalled_writes_are_a_full_sink() {
        use std::io::{Error, ErrorKind};

        assert!(matches!(
            SinkError::from(Error::from(ErrorKind::TimedOut)),
            SinkError::Full
        ));
        assert!(matches!(
            SinkError::from(Error::from(ErrorKind::WouldBlock)),
            SinkError::Full
        ));
        assert!(matches!(
            SinkError::from(Error::from(ErrorKind::BrokenPipe)),
            SinkError::Io(_)
        ));
    }
}
