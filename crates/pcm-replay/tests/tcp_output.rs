use std::io::Cursor;
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use pcm_replay::sink::{self, open_output};
use pcm_replay::{
    ManualClock, MonotonicClock, OutputTarget, PlaybackSession, RawLayout, RawPcmSource,
    ReplayConfig, ReplayError, SessionOptions, SinkError,
};

/// Accepts one connection and holds it open without reading until the test is done.
fn silent_receiver() -> (String, mpsc::Sender<()>, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let handle = thread::spawn(move || {
        let (_stream, _) = listener.accept().unwrap();
        let _ = done_rx.recv();
    });
    (addr, done_tx, handle)
}

/// Mono u8 source large enough to overrun any loopback socket buffer.
fn big_source(frame_rate: u32) -> Box<RawPcmSource<Cursor<Vec<u8>>>> {
    let layout = RawLayout {
        channels: 1,
        frame_rate,
        bit_depth: 8,
    };
    let bytes = vec![0x80u8; 16 * 1024 * 1024];
    Box::new(RawPcmSource::new(Cursor::new(bytes), layout, "big").unwrap())
}

#[test]
fn receiver_that_stops_reading_rejects_the_stream() {
    let (addr, done, handle) = silent_receiver();
    let sink = open_output(&OutputTarget::Tcp(addr), sink::MIN_WRITE_TIMEOUT).unwrap();
    let config = ReplayConfig {
        chunk_frames: 16_384,
        ..ReplayConfig::default()
    };

    let started = Instant::now();
    // The manual clock never makes the session wait, so it writes as fast as the socket allows.
    let err = PlaybackSession::open(
        big_source(48_000),
        sink,
        config,
        ManualClock::new(),
        SessionOptions::default(),
    )
    .unwrap()
    .run()
    .unwrap_err();

    assert!(matches!(err, ReplayError::SinkRejected(SinkError::Full)), "{err}");
    assert!(started.elapsed() < Duration::from_secs(20));

    let _ = done.send(());
    handle.join().unwrap();
}

#[test]
fn stop_request_is_honored_while_the_receiver_stalls() {
    let (addr, done, handle) = silent_receiver();
    let sink = open_output(&OutputTarget::Tcp(addr), sink::MIN_WRITE_TIMEOUT).unwrap();
    let cancel = Arc::new(AtomicBool::new(false));
    let options = SessionOptions {
        cancel: Some(cancel.clone()),
        ..SessionOptions::default()
    };
    let config = ReplayConfig {
        chunk_frames: 4_096,
        ..ReplayConfig::default()
    };

    // Paced in real time at 4 MHz: 16 MiB of float payload per second fills the socket quickly.
    let session = PlaybackSession::open(
        big_source(4_000_000),
        sink,
        config,
        MonotonicClock::new(),
        options,
    )
    .unwrap();
    let worker = thread::spawn(move || session.run());

    thread::sleep(Duration::from_millis(500));
    let stop_at = Instant::now();
    cancel.store(true, std::sync::atomic::Ordering::SeqCst);
    let outcome = worker.join().unwrap();
    let waited = stop_at.elapsed();

    // Either the stop was seen between chunks or the stalled write gave up first.
    match outcome {
        Ok(report) => assert_eq!(report.end, pcm_replay::EndReason::Interrupted),
        Err(err) => assert!(matches!(err, ReplayError::SinkRejected(SinkError::Full)), "{err}"),
    }
    assert!(waited < Duration::from_secs(1), "took {waited:?}");

    let _ = done.send(());
    handle.join().unwrap();
}
