//! Real-time replay of integer PCM sources.
//!
//! A [`PlaybackSession`] reads frames from a [`FrameSource`], normalizes them to `f32` and
//! releases them to a [`Sink`] at the source's nominal rate, optionally looping.

pub mod clock;
pub mod config;
pub mod error;
pub mod format;
pub mod pacer;
pub mod session;
pub mod sink;
pub mod source;
pub mod wav;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{OutputTarget, ReplayConfig, StreamLabels};
pub use error::{ReplayError, Result, SinkError};
pub use format::{SampleEncoding, StreamDescriptor};
pub use session::{EndReason, PlaybackSession, SessionOptions, SessionReport, SessionState};
pub use sink::{ChannelSink, Sink, SinkEvent, WireSink};
pub use source::{FrameSource, RawLayout, RawPcmSource};
pub use wav::WavSource;
