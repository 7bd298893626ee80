use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use hound::{SampleFormat, WavSpec, WavWriter};
use pcm_replay::{
    ChannelSink, EndReason, FrameSource, ManualClock, PlaybackSession, ReplayConfig, ReplayError,
    SessionOptions, SessionState, Sink, SinkError, SinkEvent, StreamLabels, WavSource, WireSink,
};
use replay_proto::{FrameKind, StreamInfo};
use tempfile::TempDir;

fn int_spec(channels: u16, rate: u32, bits: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: bits,
        sample_format: SampleFormat::Int,
    }
}

fn write_wav<S: hound::Sample + Copy>(
    dir: &TempDir,
    name: &str,
    spec: WavSpec,
    samples: &[S],
) -> PathBuf {
    let path = dir.path().join(name);
    let mut writer = WavWriter::create(&path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
    path
}

fn replay(path: &Path, chunk: usize) -> (Vec<SinkEvent>, pcm_replay::SessionReport) {
    let source = WavSource::open(path).unwrap();
    let (sink, rx) = ChannelSink::bounded(1 << 16);
    let config = ReplayConfig {
        chunk_frames: chunk,
        ..ReplayConfig::default()
    };
    let report = PlaybackSession::open(
        Box::new(source),
        sink,
        config,
        ManualClock::new(),
        SessionOptions::default(),
    )
    .unwrap()
    .run()
    .unwrap();
    (rx.try_iter().collect(), report)
}

fn frames(events: &[SinkEvent]) -> Vec<Vec<f32>> {
    events
        .iter()
        .filter_map(|e| match e {
            SinkEvent::Frame(f) => Some(f.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn s16_stereo_file_replays_every_frame() {
    let dir = TempDir::new().unwrap();
    let samples: Vec<i16> = (0..1_500i32)
        .flat_map(|i| [(i * 7) as i16, -((i * 7) as i16)])
        .collect();
    let path = write_wav(&dir, "s16.wav", int_spec(2, 44_100, 16), &samples);

    let source = WavSource::open(&path).unwrap();
    assert_eq!(source.frame_count(), Some(1_500));
    assert_eq!(source.channel_count(), 2);
    assert_eq!(source.bit_depth(), 16);
    drop(source);

    let (events, report) = replay(&path, 256);
    assert_eq!(report.state, SessionState::Stopped);
    assert_eq!(report.end, EndReason::EndOfStream);
    assert_eq!(report.frames_emitted, 1_500);

    match &events[0] {
        SinkEvent::Opened(info) => {
            assert_eq!(info.channel_count, 2);
            assert_eq!(info.nominal_srate, 44_100);
            assert_eq!(info.frame_count, Some(1_500));
            assert!(info.source_id.starts_with("pcm_file_"));
            assert!(info.source_id.ends_with("s16.wav"));
        }
        other => panic!("expected metadata first, got {other:?}"),
    }

    let got = frames(&events);
    assert_eq!(got.len(), 1_500);
    for (i, frame) in got.iter().enumerate() {
        let v = (i as i32 * 7) as i16;
        assert_eq!(frame, &vec![v as f32 / 32_768.0, -(v as f32) / 32_768.0]);
    }
}

#[test]
fn u8_mono_edges() {
    let dir = TempDir::new().unwrap();
    // Stored unsigned on disk: -128 -> 0, 0 -> 128, 127 -> 255.
    let path = write_wav(&dir, "u8.wav", int_spec(1, 8_000, 8), &[-128i8, 0, 127]);
    let (events, _) = replay(&path, 2);
    assert_eq!(
        frames(&events),
        vec![vec![-1.0], vec![0.0], vec![255.0 / 128.0 - 1.0]]
    );
}

#[test]
fn s24_stereo_edges() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(
        &dir,
        "s24.wav",
        int_spec(2, 48_000, 24),
        &[-8_388_608i32, 8_388_607, -1, 4_194_304],
    );
    let (events, report) = replay(&path, 1);
    assert_eq!(report.frames_emitted, 2);
    assert_eq!(
        frames(&events),
        vec![
            vec![-1.0, 8_388_607.0 / 8_388_608.0],
            vec![-1.0 / 8_388_608.0, 0.5],
        ]
    );
}

#[test]
fn s32_mono_edges() {
    let dir = TempDir::new().unwrap();
    let path = write_wav(&dir, "s32.wav", int_spec(1, 16_000, 32), &[i32::MIN, 0, 1 << 30]);
    let (events, _) = replay(&path, 4);
    assert_eq!(frames(&events), vec![vec![-1.0], vec![0.0], vec![0.5]]);
}

#[test]
fn float_wav_is_rejected_at_open() {
    let dir = TempDir::new().unwrap();
    let spec = WavSpec {
        channels: 1,
        sample_rate: 8_000,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let path = write_wav(&dir, "f32.wav", spec, &[0.25f32, -0.25]);
    let err = WavSource::open(&path).err().unwrap();
    assert!(matches!(err, ReplayError::UnsupportedFormat(_)));
}

/// Mono integer PCM WAV with an arbitrary declared depth, which hound refuses to write.
fn write_pcm_wav_header(dir: &TempDir, name: &str, bits: u16, data: &[u8]) -> PathBuf {
    let block_align = bits.div_ceil(8);
    let mut b = Vec::new();
    b.extend_from_slice(b"RIFF");
    b.extend_from_slice(&(36 + data.len() as u32).to_le_bytes());
    b.extend_from_slice(b"WAVE");
    b.extend_from_slice(b"fmt ");
    b.extend_from_slice(&16u32.to_le_bytes());
    b.extend_from_slice(&1u16.to_le_bytes());
    b.extend_from_slice(&1u16.to_le_bytes());
    b.extend_from_slice(&16_000u32.to_le_bytes());
    b.extend_from_slice(&(16_000 * u32::from(block_align)).to_le_bytes());
    b.extend_from_slice(&block_align.to_le_bytes());
    b.extend_from_slice(&bits.to_le_bytes());
    b.extend_from_slice(b"data");
    b.extend_from_slice(&(data.len() as u32).to_le_bytes());
    b.extend_from_slice(data);

    let path = dir.path().join(name);
    std::fs::write(&path, b).unwrap();
    path
}

#[test]
fn twelve_bit_wav_is_unsupported_at_open() {
    let dir = TempDir::new().unwrap();
    let path = write_pcm_wav_header(&dir, "s12.wav", 12, &[0x10, 0x00, 0xF0, 0xFF]);
    let err = WavSource::open(&path).err().unwrap();
    assert!(matches!(err, ReplayError::UnsupportedFormat(_)));
    assert!(err.to_string().contains("bit depth 12"));
}

#[test]
fn missing_file_is_reported() {
    let dir = TempDir::new().unwrap();
    let err = WavSource::open(&dir.path().join("nope.wav")).err().unwrap();
    assert!(matches!(err, ReplayError::SourceOpen { .. }));
}

/// Forwards to a channel and raises `cancel` once `limit` frames went through.
struct StopAfter {
    inner: ChannelSink,
    cancel: Arc<AtomicBool>,
    limit: usize,
    seen: usize,
}

impl Sink for StopAfter {
    fn open(&mut self, info: &StreamInfo) -> Result<(), SinkError> {
        self.inner.open(info)
    }

    fn push_frame(&mut self, frame: &[f32]) -> Result<(), SinkError> {
        self.seen += 1;
        if self.seen >= self.limit {
            self.cancel.store(true, Ordering::Relaxed);
        }
        self.inner.push_frame(frame)
    }

    fn begin_pass(&mut self) -> Result<(), SinkError> {
        self.inner.begin_pass()
    }

    fn close(&mut self) {
        self.inner.close()
    }
}

#[test]
fn looping_wav_restarts_bit_exact() {
    let dir = TempDir::new().unwrap();
    let samples: Vec<i16> = (1..=100i16).flat_map(|i| [i, i * 3]).collect();
    let path = write_wav(&dir, "loop.wav", int_spec(2, 22_050, 16), &samples);

    let cancel = Arc::new(AtomicBool::new(false));
    let (inner, rx) = ChannelSink::bounded(1 << 12);
    let sink = StopAfter {
        inner,
        cancel: cancel.clone(),
        limit: 250,
        seen: 0,
    };
    let config = ReplayConfig {
        chunk_frames: 32,
        loop_playback: true,
        max_catchup_chunks: None,
    };
    let options = SessionOptions {
        cancel: Some(cancel),
        ..SessionOptions::default()
    };
    let report = PlaybackSession::open(
        Box::new(WavSource::open(&path).unwrap()),
        sink,
        config,
        ManualClock::new(),
        options,
    )
    .unwrap()
    .run()
    .unwrap();

    assert_eq!(report.end, EndReason::Interrupted);
    assert_eq!(report.passes, 3);

    let events: Vec<SinkEvent> = rx.try_iter().collect();
    let pass_starts = events.iter().filter(|e| **e == SinkEvent::PassStart).count();
    assert_eq!(pass_starts, 2);

    // The chunk holding the 250th frame completes before the stop is seen.
    let got = frames(&events);
    assert!(got.len() >= 250);
    assert_eq!(got[100], got[0]);
    assert_eq!(got[200], got[0]);
    assert_eq!(got[199], got[99]);
    assert_eq!(got[0], vec![1.0 / 32_768.0, 3.0 / 32_768.0]);
}

/// `Write` handle over a buffer the test keeps after the session took the sink.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn wire_sink_stream_round_trip() {
    let dir = TempDir::new().unwrap();
    let samples: Vec<i16> = (0..10i16).flat_map(|i| [i * 100, -i * 100]).collect();
    let path = write_wav(&dir, "wire.wav", int_spec(2, 44_100, 16), &samples);

    let buf = SharedBuf::default();
    let options = SessionOptions {
        labels: StreamLabels {
            name: "take".into(),
            kind: "audio".into(),
        },
        ..SessionOptions::default()
    };
    let config = ReplayConfig {
        chunk_frames: 4,
        ..ReplayConfig::default()
    };
    PlaybackSession::open(
        Box::new(WavSource::open(&path).unwrap()),
        WireSink::new(buf.clone()),
        config,
        ManualClock::new(),
        options,
    )
    .unwrap()
    .run()
    .unwrap();

    let bytes = buf.0.lock().unwrap().clone();
    let mut cur = Cursor::new(bytes);
    replay_proto::read_prelude(&mut cur).unwrap();

    let (kind, payload) = replay_proto::read_frame(&mut cur).unwrap();
    assert_eq!(kind, FrameKind::StreamInfo);
    let info = replay_proto::decode_stream_info(&payload).unwrap();
    assert_eq!(info.name, "take");

    let mut decoded = Vec::new();
    let mut sample_frames = 0;
    loop {
        let (kind, payload) = replay_proto::read_frame(&mut cur).unwrap();
        match kind {
            FrameKind::Samples => {
                sample_frames += 1;
                replay_proto::decode_samples(&payload, 2, &mut decoded).unwrap();
            }
            FrameKind::End => break,
            other => panic!("unexpected frame {other:?}"),
        }
    }
    // 10 frames in chunks of 4: 4 + 4 + 2.
    assert_eq!(sample_frames, 3);
    assert_eq!(decoded.len(), 20);
    assert_eq!(decoded[2], 100.0 / 32_768.0);
    assert_eq!(decoded[3], -100.0 / 32_768.0);
}
