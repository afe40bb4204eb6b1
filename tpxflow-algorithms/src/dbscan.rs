//! Density clustering over 4-D feature points.
#![allow(clippy::cast_possible_truncation)]

use std::collections::HashMap;

/// A feature point: scaled trigger id, x, y, scaled time of flight.
pub type Point4 = [f64; 4];

/// Label assigned to points that belong to no cluster.
pub const NOISE: u32 = 0;

/// A density clustering capability.
///
/// Given `n` points, returns `n` labels. [`NOISE`] marks noise; equal
/// non-zero labels mark one cluster. Label values mean nothing beyond
/// equality within one call.
pub trait DensityClustering: Send + Sync {
    /// Algorithm name.
    fn name(&self) -> &'static str;

    /// Labels every point.
    fn fit(&self, points: &[Point4]) -> Vec<u32>;
}

/// DBSCAN parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct DbscanConfig {
    /// Neighbourhood radius (Euclidean).
    pub epsilon: f64,
    /// Points within `epsilon`, the point itself included, needed for a core point.
    pub min_samples: usize,
}

impl Default for DbscanConfig {
    fn default() -> Self {
        Self {
            epsilon: 2.0,
            min_samples: 3,
        }
    }
}

/// Grid-accelerated DBSCAN.
///
/// Points are hashed into cells of side `epsilon`; a region query scans the
/// 3^4 surrounding cells and checks the exact distance.
#[derive(Clone, Debug, Default)]
pub struct Dbscan {
    config: DbscanConfig,
}

/// Reusable buffers for [`Dbscan::fit_with_state`].
#[derive(Debug, Default)]
pub struct DbscanState {
    cells: HashMap<[i64; 4], Vec<usize>>,
    visited: Vec<bool>,
    neighbors: Vec<usize>,
    seeds: Vec<usize>,
}

struct Grid<'a> {
    cells: &'a HashMap<[i64; 4], Vec<usize>>,
    epsilon: f64,
    eps_sq: f64,
}

impl Dbscan {
    /// Creates a clusterer.
    #[must_use]
    pub fn new(config: DbscanConfig) -> Self {
        Self { config }
    }

    /// Current parameters.
    #[must_use]
    pub fn config(&self) -> &DbscanConfig {
        &self.config
    }

    /// Labels `points`, reusing the buffers in `state`.
    pub fn fit_with_state(&self, points: &[Point4], state: &mut DbscanState) -> Vec<u32> {
        let n = points.len();
        let mut labels = vec![NOISE; n];
        if n == 0 {
            return labels;
        }

        let epsilon = self.config.epsilon;
        state.cells.clear();
        for (idx, point) in points.iter().enumerate() {
            state.cells.entry(cell_of(point, epsilon)).or_default().push(idx);
        }

        state.visited.clear();
        state.visited.resize(n, false);

        let grid = Grid {
            cells: &state.cells,
            epsilon,
            eps_sq: epsilon * epsilon,
        };
        let visited = &mut state.visited;
        let neighbors = &mut state.neighbors;
        let seeds = &mut state.seeds;

        let mut next_label = 1;
        for i in 0..n {
            if visited[i] {
                continue;
            }
            visited[i] = true;

            region_query(&grid, points, i, neighbors);
            if neighbors.len() < self.config.min_samples {
                continue;
            }

            labels[i] = next_label;
            seeds.clear();
            seeds.extend_from_slice(neighbors);
            self.expand_cluster(&grid, points, next_label, &mut labels, visited, seeds, neighbors);
            next_label += 1;
        }

        labels
    }

    #[allow(clippy::too_many_arguments)]
    fn expand_cluster(
        &self,
        grid: &Grid,
        points: &[Point4],
        label: u32,
        labels: &mut [u32],
        visited: &mut [bool],
        seeds: &mut Vec<usize>,
        neighbors: &mut Vec<usize>,
    ) {
        let mut i = 0;
        while i < seeds.len() {
            let current = seeds[i];
            i += 1;

            // Border points keep the first cluster that reached them.
            if labels[current] == NOISE {
                labels[current] = label;
            }
            if visited[current] {
                continue;
            }
            visited[current] = true;

            region_query(grid, points, current, neighbors);
            if neighbors.len() >= self.config.min_samples {
                seeds.extend_from_slice(neighbors);
            }
        }
    }
}

impl DensityClustering for Dbscan {
    fn name(&self) -> &'static str {
        "DBSCAN"
    }

    fn fit(&self, points: &[Point4]) -> Vec<u32> {
        let mut state = DbscanState::default();
        self.fit_with_state(points, &mut state)
    }
}

fn cell_of(point: &Point4, epsilon: f64) -> [i64; 4] {
    point.map(|v| (v / epsilon).floor() as i64)
}

/// Collects every point within `epsilon` of `points[idx]`, itself included.
fn region_query(grid: &Grid, points: &[Point4], idx: usize, neighbors: &mut Vec<usize>) {
    neighbors.clear();
    let origin = points[idx];
    let base = cell_of(&origin, grid.epsilon);

    for offset in 0..81 {
        let mut cell = base;
        let mut rest = offset;
        for axis in &mut cell {
            *axis += rest % 3 - 1;
            rest /= 3;
        }
        let Some(members) = grid.cells.get(&cell) else {
            continue;
        };
        for &j in members {
            let dist_sq: f64 = origin
                .iter()
                .zip(&points[j])
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            if dist_sq <= grid.eps_sq {
                neighbors.push(j);
            }
        }
    }
    neighbors.sort_unstable();
}
