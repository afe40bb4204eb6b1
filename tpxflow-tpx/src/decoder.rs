//! Pure decoding of raw word buffers.

use crate::packet::{PacketKind, Tpx3Packet};
use crate::timing::{correct_global_time, pixel_toa_seconds, tot_seconds, trigger_seconds};
use crate::DetectorConfig;
use rayon::prelude::*;
use tpxflow_core::{DecodedBatch, PixelBatch, PixelHit, RawBatch};

/// Word counts seen while decoding one buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Pixel words decoded.
    pub pixels: usize,
    /// Trigger words decoded.
    pub triggers: usize,
    /// Clock-half words skipped (handled by the control link or replay clock).
    pub clock_words: usize,
    /// Unrecognized words dropped.
    pub ignored: usize,
}

impl DecodeStats {
    /// Adds the counts of `other`.
    pub fn merge(&mut self, other: &DecodeStats) {
        self.pixels += other.pixels;
        self.triggers += other.triggers;
        self.clock_words += other.clock_words;
        self.ignored += other.ignored;
    }
}

/// Decodes pixel and trigger words against a reference clock snapshot.
///
/// Decoding holds no state: the same words and clock always give the same
/// output.
#[derive(Debug, Clone)]
pub struct Decoder {
    detector: DetectorConfig,
    parallel_threshold: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl Decoder {
    /// Creates a decoder for the given detector geometry.
    #[must_use]
    pub fn new(detector: DetectorConfig) -> Self {
        Self {
            detector,
            parallel_threshold: 1024 * 1024,
        }
    }

    /// Buffers with more words than `threshold` are decoded in parallel chunks.
    #[must_use]
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold.max(1);
        self
    }

    /// Detector geometry in use.
    #[must_use]
    pub fn detector(&self) -> &DetectorConfig {
        &self.detector
    }

    /// Decodes a raw batch using its attached clock snapshot.
    #[must_use]
    pub fn decode(&self, batch: &RawBatch) -> (DecodedBatch, DecodeStats) {
        let words: Vec<u64> = batch.words().collect();
        self.decode_words(&words, batch.clock)
    }

    /// Decodes a slice of words against `clock`.
    #[must_use]
    pub fn decode_words(&self, words: &[u64], clock: u64) -> (DecodedBatch, DecodeStats) {
        if words.len() <= self.parallel_threshold {
            return self.decode_sequential(words, clock);
        }

        let parts: Vec<(DecodedBatch, DecodeStats)> = words
            .par_chunks(self.parallel_threshold)
            .map(|chunk| self.decode_sequential(chunk, clock))
            .collect();

        let mut decoded = DecodedBatch {
            clock,
            ..DecodedBatch::default()
        };
        let mut stats = DecodeStats::default();
        for (part, part_stats) in parts {
            decoded.pixels.append(&part.pixels);
            decoded.triggers.extend_from_slice(&part.triggers);
            stats.merge(&part_stats);
        }
        (decoded, stats)
    }

    fn decode_sequential(&self, words: &[u64], clock: u64) -> (DecodedBatch, DecodeStats) {
        let mut pixels = PixelBatch::with_capacity(words.len());
        let mut triggers = Vec::new();
        let mut stats = DecodeStats::default();

        for &raw in words {
            let packet = Tpx3Packet::new(raw);
            match packet.kind() {
                PacketKind::Pixel => {
                    pixels.push(self.decode_pixel(packet, clock));
                    stats.pixels += 1;
                }
                PacketKind::Trigger => {
                    triggers.push(decode_trigger(packet, clock));
                    stats.triggers += 1;
                }
                PacketKind::ClockLow | PacketKind::ClockHigh => stats.clock_words += 1,
                PacketKind::Other => stats.ignored += 1,
            }
        }

        (
            DecodedBatch {
                pixels,
                triggers,
                clock,
            },
            stats,
        )
    }

    /// Decodes one pixel word.
    #[must_use]
    pub fn decode_pixel(&self, packet: Tpx3Packet, clock: u64) -> PixelHit {
        let fields = packet.pixel_fields();
        let corrected = correct_global_time(fields.coarse, clock);
        let (x, y) = self.detector.map_pixel(fields.col, fields.row);
        PixelHit::new(
            x,
            y,
            pixel_toa_seconds(corrected, fields.ftoa, fields.col),
            tot_seconds(fields.tot),
        )
    }
}

/// Decodes one trigger word into seconds.
#[must_use]
pub fn decode_trigger(packet: Tpx3Packet, clock: u64) -> f64 {
    let corrected = correct_global_time(packet.trigger_coarse(), clock);
    trigger_seconds(corrected, packet.trigger_fine())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::encode;
    use crate::timing::FINE_TICK_S;
    use approx::assert_relative_eq;

    #[test]
    fn test_decode_mixed_buffer() {
        let words = [
            encode::pixel(5, 10, 100, 0, 40),
            encode::trigger(90, 1),
            0x7000_0000_0000_0000,
            encode::clock_low(5),
            encode::clock_high(5),
            encode::pixel(6, 11, 120, 2, 10),
        ];
        let (decoded, stats) = Decoder::default().decode_words(&words, 0);

        assert_eq!(stats.pixels, 2);
        assert_eq!(stats.triggers, 1);
        assert_eq!(stats.clock_words, 2);
        assert_eq!(stats.ignored, 1);
        assert_eq!(decoded.pixels.x, vec![5, 6]);
        assert_eq!(decoded.pixels.y, vec![10, 11]);
        assert_eq!(decoded.triggers.len(), 1);
        assert_relative_eq!(decoded.triggers[0], 90.0 * 25e-9, max_relative = 1e-12);
    }

    #[test]
    fn test_pixel_time_units() {
        let words = [encode::pixel(5, 10, 100, 0, 40)];
        let (decoded, _) = Decoder::default().decode_words(&words, 0);
        let hit = decoded.pixels.get(0).unwrap();

        // phase slot for column 5 is 2
        let expected = ((100 << 12) + (2 << 8)) as f64 * FINE_TICK_S;
        assert_relative_eq!(hit.toa, expected, max_relative = 1e-12);
        assert_relative_eq!(hit.tot, 1e-6, max_relative = 1e-12);
    }

    #[test]
    fn test_decode_is_pure() {
        let words: Vec<u64> = (0..64)
            .map(|i| encode::pixel((i % 256) as u16, (i * 3 % 256) as u16, i * 1000, i % 16, i))
            .chain((0..8).map(|i| encode::trigger(i * 5000, i % 16)))
            .collect();
        let decoder = Decoder::default();
        let clock = 0x1234_5678;
        assert_eq!(decoder.decode_words(&words, clock), decoder.decode_words(&words, clock));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let words: Vec<u64> = (0..1000u64)
            .map(|i| {
                if i % 7 == 0 {
                    encode::trigger(i * 100, 3)
                } else {
                    encode::pixel((i % 256) as u16, (i % 200) as u16, i * 10, i % 16, i % 1024)
                }
            })
            .collect();
        let sequential = Decoder::default().decode_words(&words, 42);
        let parallel = Decoder::default()
            .with_parallel_threshold(64)
            .decode_words(&words, 42);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_raw_batch_clock_is_used() {
        let word = encode::pixel(0, 0, 5, 0, 1);
        let late = RawBatch::from_words(&[word], 3 * crate::timing::QUADRANT_PERIOD);
        let (decoded, _) = Decoder::default().decode(&late);
        // Rolled over relative to a reference in the last quadrant.
        assert!(decoded.pixels.toa[0] > 26.0);
    }
}
