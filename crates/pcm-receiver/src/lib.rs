//! Receiving end of a PCM replay stream: TCP reader, bounded queue, CPAL output.

pub mod config;
pub mod device;
pub mod playback;
pub mod queue;
pub mod receive;

pub use config::ReceiverConfig;
pub use receive::run_receiver;
