//! Decoder and windower combined for a single stream.

use crate::clock::ReplayClock;
use crate::decoder::{DecodeStats, Decoder};
use crate::packet::{PacketKind, Tpx3Packet};
use crate::window::{EventWindower, WindowConfig, WindowStats};
use crate::DetectorConfig;
use tpxflow_core::{DecodedBatch, EventBatch, RawBatch};

/// Decodes raw batches and windows them into events.
///
/// With [`PacketProcessor::with_inline_clock`] the reference clock is taken
/// from clock words inside the stream instead of the batch snapshot, which
/// is how recorded files are replayed without a control link.
#[derive(Debug)]
pub struct PacketProcessor {
    decoder: Decoder,
    windower: EventWindower,
    inline_clock: Option<ReplayClock>,
    decode_stats: DecodeStats,
}

impl PacketProcessor {
    /// Creates a processor using batch clock snapshots.
    #[must_use]
    pub fn new(detector: DetectorConfig, window: WindowConfig) -> Self {
        Self {
            decoder: Decoder::new(detector),
            windower: EventWindower::new(window),
            inline_clock: None,
            decode_stats: DecodeStats::default(),
        }
    }

    /// Tracks the reference clock from inline clock words.
    #[must_use]
    pub fn with_inline_clock(mut self) -> Self {
        self.inline_clock = Some(ReplayClock::new());
        self
    }

    /// Mutable access to the windower, e.g. to set the start time.
    pub fn windower_mut(&mut self) -> &mut EventWindower {
        &mut self.windower
    }

    /// Accumulated decode counters.
    #[must_use]
    pub fn decode_stats(&self) -> DecodeStats {
        self.decode_stats
    }

    /// Windowing counters.
    #[must_use]
    pub fn window_stats(&self) -> WindowStats {
        self.windower.stats()
    }

    /// Decodes a raw batch without windowing it.
    pub fn decode(&mut self, batch: &RawBatch) -> DecodedBatch {
        let words: Vec<u64> = batch.words().collect();
        let (decoded, stats) = match self.inline_clock.as_mut() {
            Some(clock) => decode_with_inline_clock(&self.decoder, clock, &words),
            None => self.decoder.decode_words(&words, batch.clock),
        };
        self.decode_stats.merge(&stats);
        decoded
    }

    /// Decodes and windows one raw batch.
    pub fn process(&mut self, batch: &RawBatch) -> Option<EventBatch> {
        let decoded = self.decode(batch);
        self.windower.push(&decoded)
    }

    /// Windows an already decoded batch.
    pub fn process_decoded(&mut self, batch: &DecodedBatch) -> Option<EventBatch> {
        self.windower.push(batch)
    }

    /// Flushes the open interval at end of stream.
    pub fn finish(&mut self) -> Option<EventBatch> {
        self.windower.drain()
    }
}

/// Splits `words` at every clock update and decodes each run against the
/// clock in effect at that point.
fn decode_with_inline_clock(
    decoder: &Decoder,
    clock: &mut ReplayClock,
    words: &[u64],
) -> (DecodedBatch, DecodeStats) {
    let mut out = DecodedBatch::default();
    let mut stats = DecodeStats::default();
    let mut run_start = 0;

    for (idx, &raw) in words.iter().enumerate() {
        let packet = Tpx3Packet::new(raw);
        match packet.kind() {
            // Low halves stay in the run; the decoder counts them.
            PacketKind::ClockLow => clock.set_low(packet.clock_low()),
            PacketKind::ClockHigh => {
                decode_run(decoder, &words[run_start..idx], clock.current(), &mut out, &mut stats);
                clock.set_high(packet.clock_high());
                stats.clock_words += 1;
                run_start = idx + 1;
            }
            _ => {}
        }
    }
    decode_run(decoder, &words[run_start..], clock.current(), &mut out, &mut stats);

    out.clock = clock.current();
    (out, stats)
}

fn decode_run(
    decoder: &Decoder,
    run: &[u64],
    clock: u64,
    out: &mut DecodedBatch,
    stats: &mut DecodeStats,
) {
    if run.is_empty() {
        return;
    }
    let (decoded, run_stats) = decoder.decode_words(run, clock);
    out.pixels.append(&decoded.pixels);
    out.triggers.extend_from_slice(&decoded.triggers);
    stats.merge(&run_stats);
}
