//! Stage processing capabilities.

use crate::error::Result;
use crate::message::{Centroided, Message};
use log::{debug, info};
use tpxflow_algorithms::{CentroidCalculator, CentroidConfig};
use tpxflow_tpx::{Decoder, DetectorConfig, PacketProcessor, WindowConfig};

/// Work done by one stage worker.
///
/// Each worker owns its own instance, so implementations may keep mutable
/// state without locking.
pub trait StageProcessor: Send {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Handles one message, producing at most one message downstream.
    ///
    /// # Errors
    /// An error ends the calling worker; sibling workers keep running.
    fn process(&mut self, message: Message) -> Result<Option<Message>>;

    /// Called once when the worker observes the end-of-stream sentinel.
    fn on_shutdown(&mut self) -> Option<Message> {
        None
    }
}

/// Forwards every message unchanged.
#[derive(Debug, Default)]
pub struct PassThrough;

impl StageProcessor for PassThrough {
    fn name(&self) -> &'static str {
        "pass-through"
    }

    fn process(&mut self, message: Message) -> Result<Option<Message>> {
        Ok(Some(message))
    }
}

/// Decodes raw batches. Holds no cross-batch state, so it may be sharded.
#[derive(Debug, Default)]
pub struct DecodeProcessor {
    decoder: Decoder,
}

impl DecodeProcessor {
    /// Creates a decode processor for the given geometry.
    #[must_use]
    pub fn new(detector: DetectorConfig) -> Self {
        Self {
            decoder: Decoder::new(detector),
        }
    }
}

impl StageProcessor for DecodeProcessor {
    fn name(&self) -> &'static str {
        "decode"
    }

    fn process(&mut self, message: Message) -> Result<Option<Message>> {
        match message {
            Message::RawBatch(raw) => {
                let (decoded, stats) = self.decoder.decode(&raw);
                if stats.ignored > 0 {
                    debug!("ignored {} unrecognized words", stats.ignored);
                }
                Ok(Some(Message::DecodedBatch(decoded)))
            }
            other => Ok(Some(other)),
        }
    }
}

/// Decodes (if needed) and windows batches into events.
///
/// Owns the windower's cross-batch buffers; run it with a single worker.
#[derive(Debug)]
pub struct WindowProcessor {
    inner: PacketProcessor,
}

impl WindowProcessor {
    /// Creates a window processor.
    #[must_use]
    pub fn new(detector: DetectorConfig, window: WindowConfig) -> Self {
        Self {
            inner: PacketProcessor::new(detector, window),
        }
    }

    /// Tracks the reference clock from inline clock words (file replay).
    #[must_use]
    pub fn with_inline_clock(mut self) -> Self {
        self.inner = self.inner.with_inline_clock();
        self
    }
}

impl StageProcessor for WindowProcessor {
    fn name(&self) -> &'static str {
        "window"
    }

    fn process(&mut self, message: Message) -> Result<Option<Message>> {
        let events = match message {
            Message::RawBatch(raw) => self.inner.process(&raw),
            Message::DecodedBatch(decoded) => {
                decoded
                    .pixels
                    .validate()
                    .map_err(tpxflow_tpx::Error::from)?;
                self.inner.process_decoded(&decoded)
            }
            other => return Ok(Some(other)),
        };
        Ok(events.map(Message::EventBatch))
    }

    fn on_shutdown(&mut self) -> Option<Message> {
        let events = self.inner.finish();
        let decode = self.inner.decode_stats();
        let window = self.inner.window_stats();
        info!(
            "window stage done: {} pixels, {} triggers, {} ignored words, {} events, \
             {} out of window, {} before first trigger, {} overflowed, {} ordering faults",
            decode.pixels,
            decode.triggers,
            decode.ignored,
            window.events,
            window.out_of_window,
            window.before_first_trigger,
            window.overflowed,
            window.ordering_faults
        );
        events.map(Message::EventBatch)
    }
}

/// Reduces event batches to centroids. Stateless per batch, so it may be
/// sharded across workers.
pub struct CentroidProcessor {
    calculator: CentroidCalculator,
    forward_events: bool,
}

impl CentroidProcessor {
    /// Creates a centroid processor.
    ///
    /// # Errors
    /// Returns an error if the centroid configuration is invalid.
    pub fn new(config: CentroidConfig) -> Result<Self> {
        Ok(Self {
            calculator: CentroidCalculator::new(config)?,
            forward_events: false,
        })
    }

    /// Attach the source events to each output message.
    #[must_use]
    pub fn with_forward_events(mut self, forward: bool) -> Self {
        self.forward_events = forward;
        self
    }
}

impl StageProcessor for CentroidProcessor {
    fn name(&self) -> &'static str {
        "centroid"
    }

    fn process(&mut self, message: Message) -> Result<Option<Message>> {
        match message {
            Message::EventBatch(events) => {
                let centroids = self.calculator.compute(&events)?;
                let timestamps = events.timestamps.clone();
                Ok(Some(Message::CentroidBatch(Centroided {
                    centroids,
                    timestamps,
                    events: self.forward_events.then_some(events),
                })))
            }
            other => Ok(Some(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use tpxflow_core::{DecodedBatch, Event, EventBatch, PixelBatch, PixelHit, RawBatch};
    use tpxflow_tpx::packet::encode;

    #[test]
    fn test_decode_processor() {
        let raw = RawBatch::from_words(&[encode::pixel(1, 2, 3, 0, 4), encode::trigger(5, 1)], 0);
        let out = DecodeProcessor::default()
            .process(Message::RawBatch(raw))
            .unwrap();
        let Some(Message::DecodedBatch(decoded)) = out else {
            panic!("expected decoded batch");
        };
        assert_eq!(decoded.pixels.len(), 1);
        assert_eq!(decoded.triggers.len(), 1);
    }

    #[test]
    fn test_window_processor_flushes_on_shutdown() {
        let mut processor = WindowProcessor::new(DetectorConfig::default(), WindowConfig::default());
        let raw = RawBatch::from_words(&[encode::trigger(10, 1), encode::pixel(1, 1, 20, 0, 4)], 0);
        assert!(processor.process(Message::RawBatch(raw)).unwrap().is_none());

        let Some(Message::EventBatch(events)) = processor.on_shutdown() else {
            panic!("expected drained events");
        };
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_window_processor_rejects_ragged_batch() {
        let mut pixels = PixelBatch::default();
        pixels.push(PixelHit::new(1, 1, 2e-6, 25e-9));
        pixels.tot.clear();
        let decoded = DecodedBatch {
            pixels,
            triggers: vec![1e-6],
            clock: 0,
        };

        let mut processor = WindowProcessor::new(DetectorConfig::default(), WindowConfig::default());
        let err = processor
            .process(Message::DecodedBatch(decoded))
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Tpx(tpxflow_tpx::Error::CoreError(
                tpxflow_core::Error::ColumnMismatch { column: "tot", .. }
            ))
        ));
    }

    #[test]
    fn test_centroid_processor_forwards_events() {
        let events: EventBatch = (0..4u16)
            .map(|i| Event::new(0, 10 + i % 2, 10 + i / 2, 1e-6, 25e-9))
            .collect();
        let mut processor = CentroidProcessor::new(CentroidConfig::default())
            .unwrap()
            .with_forward_events(true);
        let Some(Message::CentroidBatch(out)) =
            processor.process(Message::EventBatch(events.clone())).unwrap()
        else {
            panic!("expected centroids");
        };
        assert_eq!(out.centroids.len(), 1);
        assert_eq!(out.events, Some(events));
    }

    #[test]
    fn test_unrelated_messages_pass() {
        let mut processor = CentroidProcessor::new(CentroidConfig::default()).unwrap();
        let raw = Message::RawBatch(RawBatch::default());
        assert_eq!(processor.process(raw.clone()).unwrap(), Some(raw));
    }
}
