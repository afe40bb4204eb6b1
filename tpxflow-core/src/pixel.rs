//! Decoded pixel and trigger data in Structure of Arrays (`SoA`) layout.
//!
//! `PixelBatch` stores hit columns in parallel vectors rather than an array
//! of structs, which keeps the windowing filters tight loops over `f64`.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A single decoded pixel hit.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PixelHit {
    /// Column after orientation and offset.
    pub x: u16,
    /// Row after orientation and offset.
    pub y: u16,
    /// Time of arrival in seconds, clock-corrected.
    pub toa: f64,
    /// Time over threshold in seconds.
    pub tot: f64,
}

impl PixelHit {
    /// Creates a new pixel hit.
    #[inline]
    #[must_use]
    pub fn new(x: u16, y: u16, toa: f64, tot: f64) -> Self {
        Self { x, y, toa, tot }
    }
}

/// A batch of pixel hits stored in `SoA` format.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PixelBatch {
    /// Columnar storage for X coordinates.
    pub x: Vec<u16>,
    /// Columnar storage for Y coordinates.
    pub y: Vec<u16>,
    /// Columnar storage for time of arrival (seconds).
    pub toa: Vec<f64>,
    /// Columnar storage for time over threshold (seconds).
    pub tot: Vec<f64>,
}

impl PixelBatch {
    /// Creates a new empty batch with specified capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            toa: Vec::with_capacity(capacity),
            tot: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of hits in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Clears all vectors in the batch.
    pub fn clear(&mut self) {
        self.x.clear();
        self.y.clear();
        self.toa.clear();
        self.tot.clear();
    }

    /// Appends all hits from another batch to this one.
    pub fn append(&mut self, other: &PixelBatch) {
        self.x.extend_from_slice(&other.x);
        self.y.extend_from_slice(&other.y);
        self.toa.extend_from_slice(&other.toa);
        self.tot.extend_from_slice(&other.tot);
    }

    /// Pushes a single hit into the batch.
    pub fn push(&mut self, hit: PixelHit) {
        self.x.push(hit.x);
        self.y.push(hit.y);
        self.toa.push(hit.toa);
        self.tot.push(hit.tot);
    }

    /// Returns the hit at `idx`, if any.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<PixelHit> {
        Some(PixelHit {
            x: *self.x.get(idx)?,
            y: *self.y.get(idx)?,
            toa: *self.toa.get(idx)?,
            tot: *self.tot.get(idx)?,
        })
    }

    /// Latest time of arrival in the batch.
    #[must_use]
    pub fn max_toa(&self) -> Option<f64> {
        self.toa.iter().copied().reduce(f64::max)
    }

    /// Drops every hit whose time of arrival is below `cutoff`.
    ///
    /// Returns the number of hits removed.
    pub fn discard_before(&mut self, cutoff: f64) -> usize {
        let before = self.len();
        self.retain(|toa| toa >= cutoff);
        before - self.len()
    }

    /// Drops the `count` earliest-arrived hits, or all of them if fewer.
    ///
    /// Returns the number of hits removed.
    pub fn discard_oldest(&mut self, count: usize) -> usize {
        let count = count.min(self.len());
        self.x.drain(..count);
        self.y.drain(..count);
        self.toa.drain(..count);
        self.tot.drain(..count);
        count
    }

    /// Moves every hit with time of arrival below `cutoff` into a new batch,
    /// keeping the rest in place. Relative order is preserved on both sides.
    pub fn split_before(&mut self, cutoff: f64) -> PixelBatch {
        let mut taken = PixelBatch::default();
        let mut kept = PixelBatch::with_capacity(self.len());
        for i in 0..self.len() {
            let hit = PixelHit::new(self.x[i], self.y[i], self.toa[i], self.tot[i]);
            if hit.toa < cutoff {
                taken.push(hit);
            } else {
                kept.push(hit);
            }
        }
        *self = kept;
        taken
    }

    fn retain(&mut self, mut keep: impl FnMut(f64) -> bool) {
        let mask: Vec<bool> = self.toa.iter().map(|&toa| keep(toa)).collect();
        let mut it = mask.iter();
        self.x.retain(|_| *it.next().unwrap_or(&false));
        let mut it = mask.iter();
        self.y.retain(|_| *it.next().unwrap_or(&false));
        let mut it = mask.iter();
        self.toa.retain(|_| *it.next().unwrap_or(&false));
        let mut it = mask.iter();
        self.tot.retain(|_| *it.next().unwrap_or(&false));
    }

    /// Checks that all columns have the same length.
    ///
    /// # Errors
    /// Returns [`Error::ColumnMismatch`] naming the first offending column.
    pub fn validate(&self) -> Result<()> {
        let expected = self.x.len();
        for (column, actual) in [
            ("y", self.y.len()),
            ("toa", self.toa.len()),
            ("tot", self.tot.len()),
        ] {
            if actual != expected {
                return Err(Error::ColumnMismatch {
                    column,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

impl FromIterator<PixelHit> for PixelBatch {
    fn from_iter<I: IntoIterator<Item = PixelHit>>(iter: I) -> Self {
        let mut batch = PixelBatch::default();
        for hit in iter {
            batch.push(hit);
        }
        batch
    }
}

/// Output of decoding one raw batch: pixels, trigger times and the clock
/// snapshot they were corrected against.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecodedBatch {
    /// Decoded pixel hits in arrival order.
    pub pixels: PixelBatch,
    /// Trigger times in seconds, in arrival order.
    pub triggers: Vec<f64>,
    /// Reference clock used for quadrant correction.
    pub clock: u64,
}

impl DecodedBatch {
    /// Returns true if neither pixels nor triggers were decoded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty() && self.triggers.is_empty()
    }
}
