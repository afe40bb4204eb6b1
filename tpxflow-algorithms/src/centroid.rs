//! Centroid calculation over event batches.
//!
//! Events are sorted by trigger id, split into chunks that never separate
//! one trigger's points, clustered independently and reduced to
//! ToT-weighted summaries. Chunks run on a rayon pool and their results are
//! concatenated in chunk order.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use crate::dbscan::{Dbscan, DbscanConfig, DensityClustering, Point4, NOISE};
use crate::error::{Error, Result};
use log::debug;
use rayon::prelude::*;
use std::ops::Range;
use std::sync::Arc;
use tpxflow_core::{Centroid, CentroidBatch, Event, EventBatch};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Centroiding parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct CentroidConfig {
    /// Events with ToT below this many seconds are dropped (0 = disabled).
    pub tot_threshold: f64,
    /// Clustering radius in feature space.
    pub epsilon: f64,
    /// Minimum neighbourhood size for a core point.
    pub min_samples: usize,
    /// Factor applied to time of flight (seconds) before clustering.
    pub tof_scale: f64,
    /// Factor applied to the trigger id before clustering
    /// (default: `epsilon * 1000`).
    pub trigger_scale: Option<f64>,
    /// Upper bound on points per clustering call.
    pub chunk_size: usize,
    /// Threads for chunk processing (0 = rayon global pool).
    pub threads: usize,
}

impl Default for CentroidConfig {
    fn default() -> Self {
        Self {
            tot_threshold: 0.0,
            epsilon: 2.0,
            min_samples: 3,
            tof_scale: 1.5e7,
            trigger_scale: None,
            chunk_size: 6500,
            threads: 0,
        }
    }
}

impl CentroidConfig {
    /// Set the ToT floor in seconds.
    #[must_use]
    pub fn with_tot_threshold(mut self, seconds: f64) -> Self {
        self.tot_threshold = seconds;
        self
    }

    /// Set the clustering radius.
    #[must_use]
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Set the minimum neighbourhood size.
    #[must_use]
    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// Set the chunk size limit.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the chunk thread count.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Effective trigger id scale.
    #[must_use]
    pub fn trigger_scale(&self) -> f64 {
        self.trigger_scale.unwrap_or(self.epsilon * 1000.0)
    }

    /// Check parameter ranges.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] naming the bad parameter.
    pub fn validate(&self) -> Result<()> {
        if self.epsilon.is_nan() || self.epsilon <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if self.min_samples == 0 {
            return Err(Error::InvalidConfig("min_samples must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be at least 1".into()));
        }
        Ok(())
    }

    fn features(&self, event: &Event) -> Point4 {
        [
            event.trigger_id as f64 * self.trigger_scale(),
            f64::from(event.x),
            f64::from(event.y),
            event.tof * self.tof_scale,
        ]
    }
}

/// Splits sorted trigger ids into chunk ranges.
///
/// A new chunk starts at a trigger boundary whenever adding the next run of
/// equal ids would push a non-empty chunk past `limit`. A single run larger
/// than `limit` forms its own chunk.
#[must_use]
pub fn chunk_ranges(trigger_ids: &[u64], limit: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut chunk_start = 0;
    let mut run_start = 0;

    while run_start < trigger_ids.len() {
        let id = trigger_ids[run_start];
        let run_end = run_start + trigger_ids[run_start..].partition_point(|&t| t == id);

        if run_start > chunk_start && run_end - chunk_start > limit {
            ranges.push(chunk_start..run_start);
            chunk_start = run_start;
        }
        run_start = run_end;
    }
    if chunk_start < trigger_ids.len() {
        ranges.push(chunk_start..trigger_ids.len());
    }
    ranges
}

/// Reduces event batches to cluster centroids.
pub struct CentroidCalculator<C: DensityClustering = Dbscan> {
    config: CentroidConfig,
    clustering: C,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl CentroidCalculator<Dbscan> {
    /// Creates a calculator backed by DBSCAN.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the thread pool
    /// cannot be built.
    pub fn new(config: CentroidConfig) -> Result<Self> {
        let clustering = Dbscan::new(DbscanConfig {
            epsilon: config.epsilon,
            min_samples: config.min_samples,
        });
        Self::with_clustering(config, clustering)
    }
}

impl<C: DensityClustering> CentroidCalculator<C> {
    /// Creates a calculator with a custom clustering capability.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the thread pool
    /// cannot be built.
    pub fn with_clustering(config: CentroidConfig, clustering: C) -> Result<Self> {
        config.validate()?;
        let pool = if config.threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.threads)
                .thread_name(|i| format!("tpxflow-centroid-{i}"))
                .build()?;
            Some(Arc::new(pool))
        } else {
            None
        };
        Ok(Self {
            config,
            clustering,
            pool,
        })
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &CentroidConfig {
        &self.config
    }

    /// Computes the centroids of one event batch.
    ///
    /// # Errors
    /// Returns [`Error::LabelMismatch`] if the clustering capability breaks
    /// its contract.
    pub fn compute(&self, events: &EventBatch) -> Result<CentroidBatch> {
        let sorted = self.prepare(events);
        let ids: Vec<u64> = sorted.iter().map(|e| e.trigger_id).collect();
        let ranges = chunk_ranges(&ids, self.config.chunk_size);
        self.compute_chunks(&sorted, &ranges)
    }

    /// Computes centroids over explicit chunk ranges of already prepared
    /// events.
    ///
    /// # Errors
    /// Returns [`Error::LabelMismatch`] if the clustering capability breaks
    /// its contract.
    pub fn compute_chunks(&self, sorted: &[Event], ranges: &[Range<usize>]) -> Result<CentroidBatch> {
        let run = || {
            ranges
                .par_iter()
                .map(|range| self.cluster_chunk(&sorted[range.clone()]))
                .collect::<Result<Vec<_>>>()
        };
        let parts = match &self.pool {
            Some(pool) => pool.install(run)?,
            None => run()?,
        };

        let mut out = CentroidBatch::default();
        for part in &parts {
            out.append(part);
        }
        debug!(
            "{} events in {} chunks -> {} centroids",
            sorted.len(),
            ranges.len(),
            out.len()
        );
        Ok(out)
    }

    /// Applies the ToT floor and sorts by trigger id (stable).
    #[must_use]
    pub fn prepare(&self, events: &EventBatch) -> Vec<Event> {
        let floor = self.config.tot_threshold;
        let mut sorted: Vec<Event> = events
            .iter()
            .filter(|e| floor <= 0.0 || e.tot >= floor)
            .collect();
        sorted.sort_by_key(|e| e.trigger_id);
        sorted
    }

    fn cluster_chunk(&self, chunk: &[Event]) -> Result<CentroidBatch> {
        let features: Vec<Point4> = chunk.iter().map(|e| self.config.features(e)).collect();
        let labels = self.clustering.fit(&features);
        if labels.len() != chunk.len() {
            return Err(Error::LabelMismatch {
                points: chunk.len(),
                labels: labels.len(),
            });
        }
        Ok(summarize(chunk, &labels))
    }
}

#[derive(Default, Clone, Copy)]
struct Accumulator {
    count: u32,
    weight: f64,
    wx: f64,
    wy: f64,
    wtof: f64,
    sum_x: f64,
    sum_y: f64,
    sum_tof: f64,
    peak: Option<usize>,
}

/// Reduces labelled events to one centroid per non-noise label, in
/// ascending label order.
fn summarize(chunk: &[Event], labels: &[u32]) -> CentroidBatch {
    let mut order: Vec<u32> = labels.iter().copied().filter(|&l| l != NOISE).collect();
    order.sort_unstable();
    order.dedup();

    let mut acc = vec![Accumulator::default(); order.len()];
    for (idx, (event, &label)) in chunk.iter().zip(labels).enumerate() {
        if label == NOISE {
            continue;
        }
        let Ok(slot) = order.binary_search(&label) else {
            continue;
        };
        let a = &mut acc[slot];
        a.count += 1;
        a.weight += event.tot;
        a.wx += f64::from(event.x) * event.tot;
        a.wy += f64::from(event.y) * event.tot;
        a.wtof += event.tof * event.tot;
        a.sum_x += f64::from(event.x);
        a.sum_y += f64::from(event.y);
        a.sum_tof += event.tof;
        if a.peak.map_or(true, |p| event.tot > chunk[p].tot) {
            a.peak = Some(idx);
        }
    }

    let mut out = CentroidBatch::with_capacity(acc.len());
    for a in acc {
        let Some(peak) = a.peak else {
            continue;
        };
        let n = f64::from(a.count);
        let (x, y, tof) = if a.weight > 0.0 {
            (a.wx / a.weight, a.wy / a.weight, a.wtof / a.weight)
        } else {
            // All-zero ToT falls back to plain means.
            (a.sum_x / n, a.sum_y / n, a.sum_tof / n)
        };
        out.push(Centroid {
            shot: chunk[peak].trigger_id,
            x,
            y,
            tof,
            tot_mean: a.weight / n,
            tot_max: chunk[peak].tot,
            size: a.count,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cluster_events(trigger_id: u64, cx: u16, cy: u16, tof: f64) -> Vec<Event> {
        (0..5u16)
            .map(|i| {
                Event::new(
                    trigger_id,
                    cx + i % 2,
                    cy + i / 2,
                    tof + f64::from(i) * 1e-9,
                    f64::from(i + 1) * 25e-9,
                )
            })
            .collect()
    }

    #[test]
    fn test_chunk_ranges() {
        let ids = [0, 0, 1, 1, 1, 2, 3, 3];
        assert_eq!(chunk_ranges(&ids, 4), vec![0..2, 2..6, 6..8]);
        assert_eq!(chunk_ranges(&ids, 100), vec![0..8]);
        // A run longer than the limit stands alone.
        assert_eq!(chunk_ranges(&ids, 1), vec![0..2, 2..5, 5..6, 6..8]);
        assert!(chunk_ranges(&[], 10).is_empty());
    }

    #[test]
    fn test_weighted_statistics() {
        let events: EventBatch = cluster_events(7, 100, 200, 1e-6).into_iter().collect();
        let calculator = CentroidCalculator::new(CentroidConfig::default()).unwrap();
        let centroids = calculator.compute(&events).unwrap();

        assert_eq!(centroids.len(), 1);
        let c = centroids.get(0).unwrap();
        assert_eq!(c.shot, 7);
        assert_eq!(c.size, 5);

        // weights 1..=5 (x25 ns)
        let w: Vec<f64> = (1..=5).map(f64::from).collect();
        let xs = [100.0, 101.0, 100.0, 101.0, 100.0];
        let expected_x = xs.iter().zip(&w).map(|(x, w)| x * w).sum::<f64>() / 15.0;
        assert_relative_eq!(c.x, expected_x, max_relative = 1e-12);
        assert_relative_eq!(c.tot_max, 125e-9, max_relative = 1e-12);
        assert_relative_eq!(c.tot_mean, 75e-9, max_relative = 1e-12);
        assert!(c.tof > 1e-6 && c.tof < 1e-6 + 5e-9);
    }

    #[test]
    fn test_noise_never_surfaces() {
        let mut events = cluster_events(0, 10, 10, 1e-6);
        events.push(Event::new(0, 200, 200, 1e-6, 1e-6));
        events.push(Event::new(1, 50, 50, 2e-6, 1e-6));
        let batch: EventBatch = events.into_iter().collect();

        let centroids = CentroidCalculator::new(CentroidConfig::default())
            .unwrap()
            .compute(&batch)
            .unwrap();
        assert_eq!(centroids.len(), 1);
        assert_eq!(centroids.size, vec![5]);
    }

    #[test]
    fn test_tot_threshold_drops_before_clustering() {
        let batch: EventBatch = cluster_events(0, 10, 10, 1e-6).into_iter().collect();
        let config = CentroidConfig::default().with_tot_threshold(60e-9);
        let centroids = CentroidCalculator::new(config).unwrap().compute(&batch).unwrap();
        // Only the hits with ToT 75, 100 and 125 ns survive.
        assert_eq!(centroids.size, vec![3]);
    }

    #[test]
    fn test_triggers_never_merge() {
        let mut events = cluster_events(0, 10, 10, 1e-6);
        events.extend(cluster_events(1, 10, 10, 1e-6));
        let batch: EventBatch = events.into_iter().collect();
        let centroids = CentroidCalculator::new(CentroidConfig::default())
            .unwrap()
            .compute(&batch)
            .unwrap();
        assert_eq!(centroids.shot, vec![0, 1]);
    }

    #[test]
    fn test_invalid_config() {
        assert!(CentroidCalculator::new(CentroidConfig::default().with_epsilon(0.0)).is_err());
        assert!(CentroidCalculator::new(CentroidConfig::default().with_chunk_size(0)).is_err());
    }

    struct Broken;

    impl DensityClustering for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn fit(&self, _points: &[Point4]) -> Vec<u32> {
            vec![1]
        }
    }

    #[test]
    fn test_label_mismatch_reported() {
        let batch: EventBatch = cluster_events(0, 10, 10, 1e-6).into_iter().collect();
        let calculator =
            CentroidCalculator::with_clustering(CentroidConfig::default(), Broken).unwrap();
        assert!(matches!(
            calculator.compute(&batch),
            Err(Error::LabelMismatch { points: 5, labels: 1 })
        ));
    }
}
