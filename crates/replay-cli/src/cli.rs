use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pcm_replay::OutputTarget;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "pcm-replay", version = VERSION, about = "Replay PCM audio files in real time")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a file at its nominal rate to a receiver, file or stdout
    Stream(StreamArgs),

    /// Accept replay streams over TCP and play them on an output device
    Receive(ReceiveArgs),

    /// List output devices and exit
    ListDevices,
}

#[derive(clap::Args, Debug)]
pub struct StreamArgs {
    /// Path to a WAV file (or headerless PCM with --raw)
    pub path: PathBuf,

    /// Where to send the stream: `-` (stdout), `tcp://host:port`, or a file path
    #[arg(long, short, default_value = "-", value_parser = OutputTarget::parse)]
    pub output: OutputTarget,

    /// Stream name attached to the metadata
    #[arg(long, default_value = "audio")]
    pub name: String,

    /// Stream type label attached to the metadata
    #[arg(long = "type", default_value = "audio")]
    pub kind: String,

    /// Frames released per chunk (lower => smoother pacing, higher => less overhead)
    #[arg(long, default_value_t = 256)]
    pub chunk: usize,

    /// Restart from the first frame at end of file, until interrupted
    #[arg(long = "loop")]
    pub loop_playback: bool,

    /// Largest backlog, in chunks, released back-to-back after a stall (default: unbounded)
    #[arg(long)]
    pub max_catchup_chunks: Option<usize>,

    /// Treat the input as headerless interleaved little-endian PCM
    #[arg(long, requires_all = ["raw_rate", "raw_channels"])]
    pub raw: bool,

    /// Frame rate of raw input in Hz
    #[arg(long)]
    pub raw_rate: Option<u32>,

    /// Channel count of raw input
    #[arg(long)]
    pub raw_channels: Option<u16>,

    /// Bits per sample of raw input (8, 16, 24 or 32)
    #[arg(long, default_value_t = 16)]
    pub raw_bits: u16,
}

#[derive(clap::Args, Debug)]
pub struct ReceiveArgs {
    /// Listen address, e.g. 0.0.0.0:5700
    #[arg(long, default_value = "0.0.0.0:5700")]
    pub bind: SocketAddr,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Receive buffer target in seconds
    #[arg(long, default_value_t = 2.0)]
    pub buffer_seconds: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn stream_defaults() {
        let args = Args::try_parse_from(["pcm-replay", "stream", "take.wav"]).unwrap();
        let Command::Stream(s) = args.cmd else {
            panic!("expected stream command");
        };
        assert_eq!(s.path, PathBuf::from("take.wav"));
        assert_eq!(s.output, OutputTarget::Stdout);
        assert_eq!(s.name, "audio");
        assert_eq!(s.kind, "audio");
        assert_eq!(s.chunk, 256);
        assert!(!s.loop_playback);
        assert_eq!(s.max_catchup_chunks, None);
        assert!(!s.raw);
    }

    #[test]
    fn stream_options() {
        let args = Args::try_parse_from([
            "pcm-replay",
            "stream",
            "take.wav",
            "--output",
            "tcp://10.0.0.2:5700",
            "--type",
            "EEG",
            "--chunk",
            "64",
            "--loop",
            "--max-catchup-chunks",
            "8",
        ])
        .unwrap();
        let Command::Stream(s) = args.cmd else {
            panic!("expected stream command");
        };
        assert_eq!(s.output, OutputTarget::Tcp("10.0.0.2:5700".into()));
        assert_eq!(s.kind, "EEG");
        assert_eq!(s.chunk, 64);
        assert!(s.loop_playback);
        assert_eq!(s.max_catchup_chunks, Some(8));
    }

    #[test]
    fn raw_requires_layout() {
        assert!(Args::try_parse_from(["pcm-replay", "stream", "x.pcm", "--raw"]).is_err());
        let args = Args::try_parse_from([
            "pcm-replay",
            "stream",
            "x.pcm",
            "--raw",
            "--raw-rate",
            "8000",
            "--raw-channels",
            "1",
        ])
        .unwrap();
        let Command::Stream(s) = args.cmd else {
            panic!("expected stream command");
        };
        assert_eq!(s.raw_bits, 16);
        assert_eq!(s.raw_rate, Some(8_000));
    }

    #[test]
    fn bad_tcp_target_is_rejected() {
        assert!(
            Args::try_parse_from(["pcm-replay", "stream", "x.wav", "-o", "tcp://nohost"]).is_err()
        );
    }

    #[test]
    fn receive_defaults() {
        let args = Args::try_parse_from(["pcm-replay", "receive"]).unwrap();
        let Command::Receive(r) = args.cmd else {
            panic!("expected receive command");
        };
        assert_eq!(r.bind.port(), 5700);
        assert_eq!(r.device, None);
        assert_eq!(r.buffer_seconds, 2.0);
    }
}
