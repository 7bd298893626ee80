use std::fmt;
use std::path::PathBuf;

use replay_proto::StreamInfo;

use crate::error::{ReplayError, Result};
use crate::format::StreamDescriptor;

/// Session tuning parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Frames read, decoded and released per pacer authorization.
    pub chunk_frames: usize,
    /// Rewind and start a new pass at end of stream.
    pub loop_playback: bool,
    /// Largest backlog (in chunks) the pacer will catch up on; `None` is unbounded.
    pub max_catchup_chunks: Option<usize>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            chunk_frames: 256,
            loop_playback: false,
            max_catchup_chunks: None,
        }
    }
}

impl ReplayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_frames == 0 {
            return Err(ReplayError::InvalidStream(
                "chunk size must be at least 1 frame".to_string(),
            ));
        }
        if self.max_catchup_chunks == Some(0) {
            return Err(ReplayError::InvalidStream(
                "catch-up bound must be at least 1 chunk".to_string(),
            ));
        }
        Ok(())
    }

    /// [`validate`](Self::validate), plus a chunk that fits one `SAMPLES` payload of `descriptor`.
    pub fn validate_for(&self, descriptor: &StreamDescriptor) -> Result<()> {
        self.validate()?;
        let max = max_chunk_frames(descriptor.channel_count());
        if self.chunk_frames > max {
            return Err(ReplayError::InvalidStream(format!(
                "chunk of {} frames exceeds the {max}-frame limit for {} channels",
                self.chunk_frames, descriptor.channels
            )));
        }
        Ok(())
    }
}

/// Largest chunk whose `f32` samples fit in one wire payload.
pub fn max_chunk_frames(channels: usize) -> usize {
    replay_proto::MAX_PAYLOAD_BYTES as usize / (channels.max(1) * size_of::<f32>())
}

/// Descriptive name and category attached to the output stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamLabels {
    pub name: String,
    pub kind: String,
}

impl Default for StreamLabels {
    fn default() -> Self {
        Self {
            name: "audio".to_string(),
            kind: "audio".to_string(),
        }
    }
}

impl StreamLabels {
    /// Build the metadata sent to the sink for a validated stream.
    pub fn stream_info(&self, descriptor: &StreamDescriptor, source: &str) -> StreamInfo {
        StreamInfo::new(
            self.name.clone(),
            self.kind.clone(),
            descriptor.channels,
            descriptor.frame_rate,
            format!("pcm_file_{source}"),
        )
        .with_frame_count(descriptor.frame_count)
    }
}

/// Where the wire sink writes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    /// `host:port` of a listening receiver.
    Tcp(String),
    File(PathBuf),
}

impl OutputTarget {
    /// Parse `-`, `tcp://host:port`, or a file path.
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("output target is empty".to_string());
        }
        if s == "-" {
            return Ok(OutputTarget::Stdout);
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            if addr.rsplit_once(':').is_none_or(|(host, port)| {
                host.is_empty() || port.parse::<u16>().is_err()
            }) {
                return Err(format!("expected tcp://host:port, got {s}"));
            }
            return Ok(OutputTarget::Tcp(addr.to_string()));
        }
        Ok(OutputTarget::File(PathBuf::from(s)))
    }
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputTarget::Stdout => f.write_str("stdout"),
            OutputTarget::Tcp(addr) => write!(f, "tcp://{addr}"),
            OutputTarget::File(path) => write!(f, "{}", path.display()),
        }
    }
}
