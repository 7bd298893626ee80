use serde::{Deserialize, Serialize};

/// Sample format carried on the wire; sources are always normalized to `f32`.
pub const CHANNEL_FORMAT_FLOAT32: &str = "float32";

const MANUFACTURER: &str = "PCM Replay";

/// Per-channel descriptive metadata.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelInfo {
    pub label: String,
}

/// Out-of-band description of a replayed stream, sent once before any samples.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StreamInfo {
    /// Stream name, e.g. `audio`.
    pub name: String,
    /// Category label of the stream.
    #[serde(rename = "type")]
    pub kind: String,
    pub channel_count: u16,
    /// Nominal frame rate in Hz.
    pub nominal_srate: u32,
    pub channel_format: String,
    /// Stable identifier of the producing source.
    pub source_id: String,
    pub manufacturer: String,
    pub channels: Vec<ChannelInfo>,
    /// Total frames per pass, when the source knows it.
    #[serde(default)]
    pub frame_count: Option<u64>,
}

impl StreamInfo {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        channel_count: u16,
        nominal_srate: u32,
        source_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            channel_count,
            nominal_srate,
            channel_format: CHANNEL_FORMAT_FLOAT32.to_string(),
            source_id: source_id.into(),
            manufacturer: MANUFACTURER.to_string(),
            channels: Self::channel_labels(channel_count)
                .into_iter()
                .map(|label| ChannelInfo { label })
                .collect(),
            frame_count: None,
        }
    }

    pub fn with_frame_count(mut self, frame_count: Option<u64>) -> Self {
        self.frame_count = frame_count;
        self
    }

    /// Labels for `count` channels: `mono`, `left`/`right`, or `channel1..channelN`.
    pub fn channel_labels(count: u16) -> Vec<String> {
        match count {
            1 => vec!["mono".to_string()],
            2 => vec!["left".to_string(), "right".to_string()],
            n => (1..=n).map(|c| format!("channel{c}")).collect(),
        }
    }

    /// Interleaved samples per frame.
    pub fn frame_width(&self) -> usize {
        self.channel_count as usize
    }
}
