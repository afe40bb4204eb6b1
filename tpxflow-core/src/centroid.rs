//! Cluster summaries produced by the centroid calculator.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Weighted summary of one spatio-temporal cluster of events.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Centroid {
    /// Trigger id of the hit with the largest time over threshold.
    pub shot: u64,
    /// ToT-weighted mean X (pixel).
    pub x: f64,
    /// ToT-weighted mean Y (pixel).
    pub y: f64,
    /// ToT-weighted mean time of flight (seconds).
    pub tof: f64,
    /// Mean time over threshold (seconds).
    pub tot_mean: f64,
    /// Peak time over threshold (seconds).
    pub tot_max: f64,
    /// Number of hits in the cluster.
    pub size: u32,
}

/// A batch of centroids in `SoA` format.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CentroidBatch {
    /// Trigger ids.
    pub shot: Vec<u64>,
    /// Weighted X.
    pub x: Vec<f64>,
    /// Weighted Y.
    pub y: Vec<f64>,
    /// Weighted time of flight.
    pub tof: Vec<f64>,
    /// Mean time over threshold.
    pub tot_mean: Vec<f64>,
    /// Peak time over threshold.
    pub tot_max: Vec<f64>,
    /// Cluster sizes.
    pub size: Vec<u32>,
}

impl CentroidBatch {
    /// Creates an empty batch with capacity for `capacity` centroids.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shot: Vec::with_capacity(capacity),
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            tof: Vec::with_capacity(capacity),
            tot_mean: Vec::with_capacity(capacity),
            tot_max: Vec::with_capacity(capacity),
            size: Vec::with_capacity(capacity),
        }
    }

    /// Number of centroids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shot.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shot.is_empty()
    }

    /// Pushes one centroid.
    pub fn push(&mut self, c: Centroid) {
        self.shot.push(c.shot);
        self.x.push(c.x);
        self.y.push(c.y);
        self.tof.push(c.tof);
        self.tot_mean.push(c.tot_mean);
        self.tot_max.push(c.tot_max);
        self.size.push(c.size);
    }

    /// Returns the centroid at `idx`, if any.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<Centroid> {
        Some(Centroid {
            shot: *self.shot.get(idx)?,
            x: *self.x.get(idx)?,
            y: *self.y.get(idx)?,
            tof: *self.tof.get(idx)?,
            tot_mean: *self.tot_mean.get(idx)?,
            tot_max: *self.tot_max.get(idx)?,
            size: *self.size.get(idx)?,
        })
    }

    /// Iterates over the centroids in storage order.
    pub fn iter(&self) -> impl Iterator<Item = Centroid> + '_ {
        (0..self.len()).filter_map(|idx| self.get(idx))
    }

    /// Appends all centroids from another batch.
    pub fn append(&mut self, other: &CentroidBatch) {
        self.shot.extend_from_slice(&other.shot);
        self.x.extend_from_slice(&other.x);
        self.y.extend_from_slice(&other.y);
        self.tof.extend_from_slice(&other.tof);
        self.tot_mean.extend_from_slice(&other.tot_mean);
        self.tot_max.extend_from_slice(&other.tot_max);
        self.size.extend_from_slice(&other.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid_batch_roundtrip() {
        let c = Centroid {
            shot: 7,
            x: 1.5,
            y: 2.5,
            tof: 1e-6,
            tot_mean: 50e-9,
            tot_max: 100e-9,
            size: 4,
        };
        let mut batch = CentroidBatch::with_capacity(1);
        batch.push(c);
        let copy = batch.clone();
        batch.append(&copy);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.get(1), Some(c));
        assert_eq!(batch.iter().count(), 2);
    }
}
