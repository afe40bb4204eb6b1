use crossbeam_channel::{unbounded, Receiver};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tpxflow_core::{RawBatch, ReferenceClock};
use tpxflow_io::{write_recording, FileSampler, UdpSampler};
use tpxflow_pipeline::{Message, Pipeline, PipelineConfig, SamplerConfig};
use tpxflow_tpx::packet::encode;
use tpxflow_tpx::{Decoder, PacketKind, Tpx3Packet};

fn raw_batches(rx: &Receiver<Message>) -> Vec<RawBatch> {
    rx.try_iter()
        .map(|m| match m {
            Message::RawBatch(raw) => raw,
            other => panic!("unexpected {} message", other.kind()),
        })
        .collect()
}

#[test]
fn test_replay_strips_clock_words_and_stamps_batches() {
    let clock_value = 0x1000_0000u64;
    let words = [
        encode::clock_low(clock_value),
        encode::clock_high(clock_value),
        encode::pixel(1, 2, 100, 0, 10),
        encode::trigger(90, 1),
        encode::pixel(3, 4, 120, 0, 10),
    ];
    let file = NamedTempFile::new().unwrap();
    write_recording(file.path(), 1_234, &words).unwrap();

    let clock = ReferenceClock::default();
    let mut sampler = FileSampler::open(file.path(), SamplerConfig::default(), clock.clone()).unwrap();
    assert_eq!(sampler.start_time_ns(), 1_234);
    assert_eq!(sampler.word_count(), 5);

    let (tx, rx) = unbounded();
    let stats = sampler.run(&tx).unwrap();
    assert_eq!(stats.clock_words, 2);
    assert_eq!(clock.snapshot(), clock_value);

    let batches = raw_batches(&rx);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].clock, clock_value);
    assert_eq!(batches[0].word_count(), 3);
    assert!(batches[0].words().all(|w| !matches!(
        Tpx3Packet::new(w).kind(),
        PacketKind::ClockLow | PacketKind::ClockHigh
    )));
}

#[test]
fn test_replay_flushes_when_clock_advances() {
    let first = 0x1000_0000u64;
    let second = first + 4_000_000; // 0.1 s later
    let words = [
        encode::clock_low(first),
        encode::clock_high(first),
        encode::pixel(1, 1, 10, 0, 5),
        encode::pixel(1, 2, 11, 0, 5),
        encode::clock_low(second),
        encode::clock_high(second),
        encode::pixel(1, 3, 12, 0, 5),
    ];
    let file = NamedTempFile::new().unwrap();
    write_recording(file.path(), 0, &words).unwrap();

    let config = SamplerConfig {
        flush_bytes: 1 << 20,
        clock_flush_interval_s: 0.05,
        ..SamplerConfig::default()
    };
    let mut sampler = FileSampler::open(file.path(), config, ReferenceClock::default()).unwrap();
    let (tx, rx) = unbounded();
    let stats = sampler.run(&tx).unwrap();

    let batches = raw_batches(&rx);
    assert_eq!(stats.batches, 2);
    assert_eq!(batches[0].clock, first);
    assert_eq!(batches[0].word_count(), 2);
    assert_eq!(batches[1].clock, second);
    assert_eq!(batches[1].word_count(), 1);
}

#[test]
fn test_replay_size_threshold() {
    let words: Vec<u64> = (0..10).map(|i| encode::pixel(i, 0, 100, 0, 1)).collect();
    let file = NamedTempFile::new().unwrap();
    write_recording(file.path(), 0, &words).unwrap();

    let config = SamplerConfig {
        flush_bytes: 32,
        ..SamplerConfig::default()
    };
    let mut sampler = FileSampler::open(file.path(), config, ReferenceClock::default()).unwrap();
    let (tx, rx) = unbounded();
    sampler.run(&tx).unwrap();

    let sizes: Vec<usize> = raw_batches(&rx).iter().map(RawBatch::word_count).collect();
    assert_eq!(sizes, vec![4, 4, 2]);
}

#[test]
fn test_replay_through_standard_pipeline_stamps_wall_clock() {
    let start_time_ns = 1_700_000_000_000_000_000u64;
    let words = [
        encode::pixel(5, 10, 100, 0, 40),
        encode::trigger(90, 1),
        encode::trigger(200, 1),
        encode::trigger(300, 1),
        encode::trigger(400, 1),
    ];
    let file = NamedTempFile::new().unwrap();
    write_recording(file.path(), start_time_ns, &words).unwrap();

    let mut sampler =
        FileSampler::open(file.path(), SamplerConfig::default(), ReferenceClock::default()).unwrap();
    let mut config = PipelineConfig::default();
    config.window = config.window.with_start_time_ns(sampler.start_time_ns());

    let mut pipeline = Pipeline::standard(&config).unwrap();
    pipeline.start().unwrap();
    let output = pipeline.output();
    let consumer = thread::spawn(move || {
        output
            .iter()
            .take_while(|m| !m.is_sentinel())
            .collect::<Vec<_>>()
    });

    sampler.run(&pipeline.input()).unwrap();
    pipeline.stop().unwrap();
    let messages = consumer.join().unwrap();

    let mut stamps = Vec::new();
    for message in messages {
        if let Message::CentroidBatch(out) = message {
            stamps.extend(out.timestamps.trigger_id.into_iter().zip(out.timestamps.wall_clock_ns));
        }
    }
    // Trigger 0 at 90 ticks of 25 ns.
    assert_eq!(stamps, vec![(0, start_time_ns + 2_250)]);
}

#[test]
fn test_udp_sampler_forwards_datagrams() {
    let config = SamplerConfig {
        flush_timeout_ms: 5,
        read_timeout_ms: 5,
        ..SamplerConfig::default()
    };
    let sampler = UdpSampler::bind("127.0.0.1:0", config, ReferenceClock::new(42)).unwrap();
    let addr = sampler.local_addr().unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = unbounded();
    let worker = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || sampler.run(&tx, &stop))
    };

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut sent = Vec::new();
    for i in 0..3u64 {
        let payload = RawBatch::from_words(&[encode::pixel(1, 1, i, 0, 1), encode::trigger(i, 1)], 0).bytes;
        client.send_to(&payload, addr).unwrap();
        sent.extend_from_slice(&payload);
    }

    let mut received = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while received.len() < sent.len() && Instant::now() < deadline {
        if let Ok(Message::RawBatch(raw)) = rx.recv_timeout(Duration::from_millis(50)) {
            assert_eq!(raw.clock, 42);
            received.extend_from_slice(&raw.bytes);
        }
    }

    stop.store(true, Ordering::Release);
    worker.join().unwrap().unwrap();
    received.extend(raw_batches(&rx).into_iter().flat_map(|b| b.bytes));
    assert_eq!(received, sent);
}

#[test]
fn test_udp_sampler_tracks_clock_across_rollover() {
    let period = 1u64 << 30;
    let early = period - 1_000;
    let late = period + 3_000_000; // 75 ms later
    let config = SamplerConfig {
        flush_timeout_ms: 5,
        read_timeout_ms: 5,
        clock_flush_interval_s: 0.05,
        ..SamplerConfig::default()
    };
    let clock = ReferenceClock::default();
    let sampler = UdpSampler::bind("127.0.0.1:0", config, clock.clone()).unwrap();
    let addr = sampler.local_addr().unwrap();

    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = unbounded();
    let worker = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || sampler.run(&tx, &stop))
    };

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    for (value, col) in [(early, 1), (late, 2)] {
        let words = [
            encode::clock_low(value),
            encode::clock_high(value),
            encode::pixel(col, col, value + 100, 0, 5),
        ];
        client
            .send_to(&RawBatch::from_words(&words, 0).bytes, addr)
            .unwrap();
    }

    let mut batches = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while batches.iter().map(RawBatch::word_count).sum::<usize>() < 2 && Instant::now() < deadline {
        if let Ok(Message::RawBatch(raw)) = rx.recv_timeout(Duration::from_millis(50)) {
            batches.push(raw);
        }
    }

    stop.store(true, Ordering::Release);
    let stats = worker.join().unwrap().unwrap();
    batches.extend(raw_batches(&rx));
    assert_eq!(stats.clock_words, 4);
    assert_eq!(clock.snapshot(), late);

    let batches: Vec<RawBatch> = batches.into_iter().filter(|b| b.word_count() > 0).collect();
    let clocks: Vec<u64> = batches.iter().map(|b| b.clock).collect();
    assert_eq!(clocks, vec![early, late]);

    let decoder = Decoder::default();
    let mut toa = Vec::new();
    for raw in &batches {
        assert!(raw.words().all(|w| !matches!(
            Tpx3Packet::new(w).kind(),
            PacketKind::ClockLow | PacketKind::ClockHigh
        )));
        toa.extend(decoder.decode(raw).0.pixels.toa);
    }
    assert_eq!(toa.len(), 2);
    assert!(toa[1] > toa[0]);
}
