//! tpxflow-algorithms: density clustering and centroid calculation.
//!
//! - [`Dbscan`] - grid-accelerated DBSCAN over 4-D feature points
//! - [`CentroidCalculator`] - trigger-aligned chunking, chunk-parallel
//!   clustering and ToT-weighted cluster summaries
//!
#![warn(missing_docs)]

mod centroid;
mod dbscan;
mod error;

pub use centroid::{chunk_ranges, CentroidCalculator, CentroidConfig};
pub use dbscan::{Dbscan, DbscanConfig, DbscanState, DensityClustering, Point4, NOISE};
pub use error::{Error, Result};
