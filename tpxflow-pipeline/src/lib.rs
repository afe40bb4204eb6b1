//! tpxflow-pipeline: staged, multi-worker stream processing.
//!
//! A [`Pipeline`] is an ordered list of [`Stage`]s. Each stage runs a pool
//! of worker threads pulling [`Message`]s from one bounded channel and
//! pushing results into the next. Shutdown is driven by a single
//! [`Message::Sentinel`] that every worker re-emits after observing it.
//!
//! The standard acquisition pipeline is:
//!
//! 1. **window** (one worker): decode raw batches and bucket pixels into
//!    time-of-flight events, flushing the open interval on shutdown
//! 2. **centroid** (N workers): cluster events and emit centroids

mod config;
mod error;
mod message;
mod pipeline;
mod processors;
mod stage;

pub use config::{PipelineConfig, SamplerConfig};
pub use error::{PipelineError, Result};
pub use message::{Centroided, Message};
pub use pipeline::{Pipeline, PipelineReport};
pub use processors::{
    CentroidProcessor, DecodeProcessor, PassThrough, StageProcessor, WindowProcessor,
};
pub use stage::{ProcessorFactory, Stage, StageReport, WorkerExit, WorkerReport};
