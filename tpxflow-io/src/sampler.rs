//! Samplers: the boundary threads that turn a socket or a recorded file into
//! [`Message::RawBatch`] messages for a pipeline.
//!
//! Both samplers consume the stream's clock words and publish the stitched
//! value to the reference clock. Every batch carries the snapshot that was
//! current when it was flushed, so downstream decoders never touch shared
//! state.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use crate::{Error, Result};
use crossbeam_channel::Sender;
use log::{debug, info, warn};
use memmap2::Mmap;
use std::fs::File;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tpxflow_core::raw::WORD_SIZE;
use tpxflow_core::{RawBatch, ReferenceClock};
use tpxflow_pipeline::{Message, SamplerConfig};
use tpxflow_tpx::timing::COARSE_TICK_S;
use tpxflow_tpx::{PacketKind, ReplayClock, Tpx3Packet};

/// Size of the start-time header at the front of a recorded stream.
pub const FILE_HEADER_SIZE: usize = 8;

/// Counters reported when a sampler finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    /// Batches sent downstream.
    pub batches: u64,
    /// Payload bytes sent downstream.
    pub bytes: u64,
    /// Clock words consumed.
    pub clock_words: u64,
    /// Clock jumps corrected or ignored.
    pub clock_discontinuities: u64,
}

/// What to do with one word after clock routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Routed {
    /// Not a clock word; forward it.
    Data,
    /// Low half stored, nothing to publish yet.
    Held,
    /// Publish `value`, flushing the buffer first when `flush` is set.
    Publish { value: u64, flush: bool },
}

/// Stitches clock words into reference-clock values.
///
/// A value that moved more than `interval_ticks` past the last flush point
/// asks for a flush, so words already buffered keep the older clock.
#[derive(Debug)]
struct ClockRouter {
    replay: ReplayClock,
    anchor: Option<u64>,
    interval_ticks: u64,
    words: u64,
}

impl ClockRouter {
    fn new(config: &SamplerConfig) -> Self {
        Self {
            replay: ReplayClock::new(),
            anchor: None,
            interval_ticks: (config.clock_flush_interval_s.max(0.0) / COARSE_TICK_S) as u64,
            words: 0,
        }
    }

    fn route(&mut self, packet: Tpx3Packet) -> Routed {
        match packet.kind() {
            PacketKind::ClockLow => {
                self.words += 1;
                self.replay.set_low(packet.clock_low());
                Routed::Held
            }
            PacketKind::ClockHigh => {
                self.words += 1;
                let value = self.replay.set_high(packet.clock_high()).value();
                let interval = self.interval_ticks;
                let flush = !self
                    .anchor
                    .is_some_and(|a| value.saturating_sub(a) <= interval);
                if flush {
                    self.anchor = Some(value);
                }
                Routed::Publish { value, flush }
            }
            _ => Routed::Data,
        }
    }

    fn record(&self, stats: &mut SamplerStats) {
        stats.clock_words = self.words;
        stats.clock_discontinuities = self.replay.discontinuities();
    }
}

/// Buffers the complete words of `bytes`, routing clock words.
///
/// A trailing partial word is buffered as is. Returns an error only when a
/// requested flush fails.
fn ingest(
    bytes: &[u8],
    router: &mut ClockRouter,
    clock: &ReferenceClock,
    flush_bytes: usize,
    buffer: &mut Vec<u8>,
    output: &Sender<Message>,
    stats: &mut SamplerStats,
) -> Result<()> {
    let chunks = bytes.chunks_exact(WORD_SIZE);
    let tail = chunks.remainder();
    for chunk in chunks {
        let mut word = [0u8; WORD_SIZE];
        word.copy_from_slice(chunk);
        match router.route(Tpx3Packet::new(u64::from_le_bytes(word))) {
            Routed::Data => {
                buffer.extend_from_slice(chunk);
                if buffer.len() >= flush_bytes {
                    flush(buffer, clock.snapshot(), false, output, stats)?;
                }
            }
            Routed::Held => {}
            Routed::Publish { value, flush: true } => {
                flush(buffer, clock.snapshot(), false, output, stats)?;
                clock.publish(value);
            }
            Routed::Publish { value, flush: false } => clock.publish(value),
        }
    }
    buffer.extend_from_slice(tail);
    Ok(())
}

/// Sends the complete words of `buffer`, keeping a trailing partial word for
/// the next flush unless `finish` is set.
fn flush(
    buffer: &mut Vec<u8>,
    clock: u64,
    finish: bool,
    output: &Sender<Message>,
    stats: &mut SamplerStats,
) -> Result<()> {
    let end = if finish {
        buffer.len()
    } else {
        buffer.len() - buffer.len() % WORD_SIZE
    };
    if end == 0 {
        return Ok(());
    }
    let bytes: Vec<u8> = buffer.drain(..end).collect();
    stats.batches += 1;
    stats.bytes += bytes.len() as u64;
    output
        .send(Message::RawBatch(RawBatch::new(bytes, clock)))
        .map_err(|_| Error::Disconnected)
}

/// Live sampler reading datagrams from the camera's UDP stream.
pub struct UdpSampler {
    socket: UdpSocket,
    config: SamplerConfig,
    clock: ReferenceClock,
}

impl UdpSampler {
    /// Binds the socket and applies the read timeout.
    ///
    /// # Errors
    /// Returns an error if the address cannot be bound.
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        config: SamplerConfig,
        clock: ReferenceClock,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(config.read_timeout()))?;
        Ok(Self {
            socket,
            config,
            clock,
        })
    }

    /// Address the socket is bound to.
    ///
    /// # Errors
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receives until `stop` is set, then flushes what is left.
    ///
    /// Clock words are consumed and published to the reference clock. A
    /// batch is sent once the buffer exceeds `flush_bytes`, before a clock
    /// value that advanced past `clock_flush_interval_s` is published, or
    /// when the buffer is non-empty and `flush_timeout` has passed since the
    /// last flush.
    ///
    /// # Errors
    /// Returns an error on a socket failure or if the pipeline input closed.
    pub fn run(&self, output: &Sender<Message>, stop: &AtomicBool) -> Result<SamplerStats> {
        let mut datagram = vec![0u8; self.config.recv_buffer_bytes.max(WORD_SIZE)];
        let flush_bytes = self.config.flush_bytes.max(WORD_SIZE);
        let mut buffer = Vec::with_capacity(flush_bytes + datagram.len());
        let flush_timeout = self.config.flush_timeout();
        let mut router = ClockRouter::new(&self.config);
        let mut stats = SamplerStats::default();
        let mut last_flush = Instant::now();

        info!("listening on {:?}", self.socket.local_addr().ok());
        while !stop.load(Ordering::Acquire) {
            match self.socket.recv(&mut datagram) {
                Ok(n) => {
                    let batches = stats.batches;
                    ingest(
                        &datagram[..n],
                        &mut router,
                        &self.clock,
                        flush_bytes,
                        &mut buffer,
                        output,
                        &mut stats,
                    )?;
                    if stats.batches > batches {
                        last_flush = Instant::now();
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                Err(e) => return Err(e.into()),
            }

            if !buffer.is_empty() && last_flush.elapsed() >= flush_timeout {
                flush(&mut buffer, self.clock.snapshot(), false, output, &mut stats)?;
                last_flush = Instant::now();
            }
        }

        flush(&mut buffer, self.clock.snapshot(), true, output, &mut stats)?;
        router.record(&mut stats);
        info!(
            "sampler stopped: {} batches, {} bytes, {} clock words",
            stats.batches, stats.bytes, stats.clock_words
        );
        Ok(stats)
    }
}

/// Replays a recorded stream: an 8-byte little-endian start time (ns)
/// followed by raw words.
///
/// Clock words are consumed here and republished to the reference clock;
/// every other word is forwarded.
pub struct FileSampler {
    mmap: Mmap,
    config: SamplerConfig,
    clock: ReferenceClock,
    start_time_ns: u64,
}

impl FileSampler {
    /// Maps the file and reads its start-time header.
    ///
    /// # Errors
    /// Returns an error if the file cannot be mapped or is shorter than the
    /// header.
    pub fn open<P: AsRef<Path>>(
        path: P,
        config: SamplerConfig,
        clock: ReferenceClock,
    ) -> Result<Self> {
        let file = File::open(&path)?;
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };

        let mut header = [0u8; FILE_HEADER_SIZE];
        header.copy_from_slice(mmap.get(..FILE_HEADER_SIZE).ok_or_else(|| {
            Error::InvalidFormat(format!(
                "{}: missing {FILE_HEADER_SIZE}-byte start time header",
                path.as_ref().display()
            ))
        })?);
        let start_time_ns = u64::from_le_bytes(header);
        if (mmap.len() - FILE_HEADER_SIZE) % WORD_SIZE != 0 {
            warn!(
                "{}: trailing partial word will be ignored",
                path.as_ref().display()
            );
        }

        Ok(Self {
            mmap,
            config,
            clock,
            start_time_ns,
        })
    }

    /// Acquisition start time from the header, in ns.
    #[must_use]
    pub fn start_time_ns(&self) -> u64 {
        self.start_time_ns
    }

    /// Number of complete words after the header.
    #[must_use]
    pub fn word_count(&self) -> usize {
        (self.mmap.len() - FILE_HEADER_SIZE) / WORD_SIZE
    }

    /// Streams the whole file into `output`.
    ///
    /// A batch is flushed when the buffer reaches `flush_bytes`, and before
    /// the clock is republished once it has advanced by more than
    /// `clock_flush_interval_s` since the last such flush.
    ///
    /// # Errors
    /// Returns [`Error::Disconnected`] if the pipeline input closed.
    pub fn run(&mut self, output: &Sender<Message>) -> Result<SamplerStats> {
        let flush_bytes = self.config.flush_bytes.max(WORD_SIZE);
        let mut buffer = Vec::with_capacity(flush_bytes + WORD_SIZE);
        let mut router = ClockRouter::new(&self.config);
        let mut stats = SamplerStats::default();

        let body = &self.mmap[FILE_HEADER_SIZE..];
        let whole = body.len() - body.len() % WORD_SIZE;
        ingest(
            &body[..whole],
            &mut router,
            &self.clock,
            flush_bytes,
            &mut buffer,
            output,
            &mut stats,
        )?;

        flush(&mut buffer, self.clock.snapshot(), true, output, &mut stats)?;
        router.record(&mut stats);
        debug!(
            "replay done: {} batches, {} clock words, {} clock discontinuities",
            stats.batches, stats.clock_words, stats.clock_discontinuities
        );
        Ok(stats)
    }
}

/// Writes a recorded stream in the layout [`FileSampler`] reads.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub fn write_recording<P: AsRef<Path>>(path: P, start_time_ns: u64, words: &[u64]) -> Result<()> {
    let mut bytes = Vec::with_capacity(FILE_HEADER_SIZE + words.len() * WORD_SIZE);
    bytes.extend_from_slice(&start_time_ns.to_le_bytes());
    for word in words {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use tpxflow_tpx::packet::encode;

    fn batches(rx: &crossbeam_channel::Receiver<Message>) -> Vec<RawBatch> {
        rx.try_iter()
            .map(|m| match m {
                Message::RawBatch(raw) => raw,
                other => panic!("unexpected {} message", other.kind()),
            })
            .collect()
    }

    #[test]
    fn test_flush_keeps_partial_word() {
        let (tx, rx) = unbounded();
        let mut stats = SamplerStats::default();
        let mut buffer = vec![1u8; 11];

        flush(&mut buffer, 7, false, &tx, &mut stats).unwrap();
        assert_eq!(buffer.len(), 3);
        flush(&mut buffer, 7, true, &tx, &mut stats).unwrap();
        assert!(buffer.is_empty());

        let sent = batches(&rx);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].bytes.len(), 8);
        assert_eq!(sent[0].clock, 7);
        assert_eq!(stats.bytes, 11);
    }

    #[test]
    fn test_flush_reports_disconnect() {
        let (tx, rx) = unbounded();
        drop(rx);
        let mut buffer = vec![0u8; 8];
        let err = flush(&mut buffer, 0, false, &tx, &mut SamplerStats::default()).unwrap_err();
        assert!(matches!(err, Error::Disconnected));
    }

    #[test]
    fn test_router_flushes_only_past_interval() {
        let config = SamplerConfig {
            clock_flush_interval_s: 0.05,
            ..SamplerConfig::default()
        };
        let mut router = ClockRouter::new(&config);
        let step = |router: &mut ClockRouter, value: u64| {
            assert_eq!(
                router.route(Tpx3Packet::new(encode::clock_low(value))),
                Routed::Held
            );
            router.route(Tpx3Packet::new(encode::clock_high(value)))
        };

        let base = 0x1000_0000u64;
        assert_eq!(step(&mut router, base), Routed::Publish { value: base, flush: true });
        // 1000 ticks is 25 us, well inside the interval.
        assert_eq!(
            step(&mut router, base + 1_000),
            Routed::Publish { value: base + 1_000, flush: false }
        );
        assert_eq!(
            step(&mut router, base + 4_000_000),
            Routed::Publish { value: base + 4_000_000, flush: true }
        );
        assert_eq!(
            router.route(Tpx3Packet::new(encode::pixel(1, 1, 1, 0, 1))),
            Routed::Data
        );

        let mut stats = SamplerStats::default();
        router.record(&mut stats);
        assert_eq!(stats.clock_words, 6);
    }

    #[test]
    fn test_ingest_buffers_partial_tail() {
        let (tx, rx) = unbounded();
        let clock = ReferenceClock::default();
        let mut router = ClockRouter::new(&SamplerConfig::default());
        let mut buffer = Vec::new();
        let mut stats = SamplerStats::default();

        let mut bytes = RawBatch::from_words(&[encode::pixel(1, 1, 1, 0, 1)], 0).bytes;
        bytes.extend_from_slice(&[0xAA; 3]);
        ingest(&bytes, &mut router, &clock, 1 << 20, &mut buffer, &tx, &mut stats).unwrap();
        assert_eq!(buffer.len(), 11);
        assert!(batches(&rx).is_empty());
    }

    #[test]
    fn test_short_file_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), [0u8; 5]).unwrap();
        let result = FileSampler::open(file.path(), SamplerConfig::default(), ReferenceClock::default());
        assert!(matches!(result, Err(Error::InvalidFormat(_))));
    }
}
