//! tpxflow-core: Shared data model for Timepix3 stream processing.
//!
//! This crate holds the batch types that flow between the decoder, the
//! event windower, the centroid calculator and the persistence sink, plus
//! the reference-clock handle shared with the control link.
//!

pub mod centroid;
pub mod clock;
pub mod error;
pub mod event;
pub mod pixel;
pub mod raw;

pub use centroid::{Centroid, CentroidBatch};
pub use clock::ReferenceClock;
pub use error::{Error, Result};
pub use event::{Event, EventBatch, TriggerTimestamps};
pub use pixel::{DecodedBatch, PixelBatch, PixelHit};
pub use raw::RawBatch;
