use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5700;
pub const DEFAULT_BUFFER_SECONDS: f32 = 2.0;
pub const DEFAULT_LOW_BUFFER: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct ReceiverConfig {
    /// Address to listen on for replay streams.
    pub bind: SocketAddr,
    /// Output device substring; `None` uses the host default.
    pub device: Option<String>,
    /// Receive buffer target in seconds.
    pub buffer_seconds: f32,
    /// Buffered audio below which playback logs a low-buffer warning.
    pub low_buffer: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            device: None,
            buffer_seconds: DEFAULT_BUFFER_SECONDS,
            low_buffer: DEFAULT_LOW_BUFFER,
        }
    }
}

impl ReceiverConfig {
    /// `buffer_seconds`, or the default when it is not a positive finite number.
    pub fn effective_buffer_seconds(&self) -> f32 {
        if self.buffer_seconds.is_finite() && self.buffer_seconds > 0.0 {
            self.buffer_seconds
        } else {
            DEFAULT_BUFFER_SECONDS
        }
    }

    /// Queue capacity in frames for a stream at `rate_hz`.
    pub fn queue_frames(&self, rate_hz: u32) -> usize {
        let frames = (f64::from(rate_hz) * f64::from(self.effective_buffer_seconds())).ceil();
        (frames as usize).max(1)
    }

    /// Low-buffer threshold in frames, capped at half the queue.
    pub fn low_buffer_frames(&self, rate_hz: u32) -> usize {
        let frames = (f64::from(rate_hz) * self.low_buffer.as_secs_f64()).ceil() as usize;
        frames.min(self.queue_frames(rate_hz) / 2)
    }
}
