//! pcm-replay: stream integer PCM files in real time, or receive and play such streams.
//!
//! ## Modes
//! - `stream`: pace a WAV (or raw PCM) file at its nominal rate into a framed stream
//!   (stdout, a file, or a TCP receiver), optionally looping.
//! - `receive`: accept one stream at a time over TCP and play it on an output device.
//! - `list-devices`: print output devices.
//!
//! The first Ctrl-C asks the running command to stop cleanly; a second one exits immediately.

mod cli;
mod runtime;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    // Logs go to stderr: stdout may carry the stream itself.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pcm_replay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cancel = Arc::new(AtomicBool::new(false));
    install_ctrlc(cancel.clone());

    match &args.cmd {
        cli::Command::Stream(stream) => {
            let report = runtime::run_stream(stream, cancel)?;
            tracing::info!(
                end = ?report.end,
                frames = report.frames_emitted,
                passes = report.passes,
                "done"
            );
        }
        cli::Command::Receive(receive) => runtime::run_receive(receive, cancel)?,
        cli::Command::ListDevices => runtime::list_devices()?,
    }

    Ok(())
}

fn install_ctrlc(cancel: Arc<AtomicBool>) {
    let result = ctrlc::set_handler(move || {
        if cancel.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        tracing::info!("interrupt received; stopping (Ctrl-C again to force)");
    });
    if let Err(e) = result {
        tracing::warn!("failed to install Ctrl-C handler: {e}");
    }
}
