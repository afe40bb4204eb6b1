//! tpxflow-io: boundary I/O for tpxflow.
//!
//! Samplers feed raw words from a UDP socket or a memory-mapped recording
//! into a pipeline; with the `hdf5` feature, [`Hdf5Sink`] persists its
//! output.
//!

mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod sampler;

pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use hdf5::{Hdf5Sink, SinkCounts, SinkOptions};
pub use sampler::{write_recording, FileSampler, SamplerStats, UdpSampler, FILE_HEADER_SIZE};
