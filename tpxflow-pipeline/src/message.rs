//! Messages exchanged between stages.

use tpxflow_core::{CentroidBatch, DecodedBatch, EventBatch, RawBatch, TriggerTimestamps};

/// Output of a centroid stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Centroided {
    /// Cluster summaries.
    pub centroids: CentroidBatch,
    /// Stamps of the triggers the source events referred to.
    pub timestamps: TriggerTimestamps,
    /// Source events, when the stage forwards them.
    pub events: Option<EventBatch>,
}

/// A unit of work travelling through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Raw words with their reference clock snapshot.
    RawBatch(RawBatch),
    /// Decoded pixels and triggers.
    DecodedBatch(DecodedBatch),
    /// Time-of-flight events.
    EventBatch(EventBatch),
    /// Centroids, optionally with their source events.
    CentroidBatch(Centroided),
    /// End of stream.
    Sentinel,
}

impl Message {
    /// Short name of the variant, for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RawBatch(_) => "raw",
            Message::DecodedBatch(_) => "decoded",
            Message::EventBatch(_) => "events",
            Message::CentroidBatch(_) => "centroids",
            Message::Sentinel => "sentinel",
        }
    }

    /// True for the end-of-stream marker.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Message::Sentinel)
    }

    /// Number of records carried (words, pixels, events or centroids).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Message::RawBatch(raw) => raw.word_count(),
            Message::DecodedBatch(decoded) => decoded.pixels.len() + decoded.triggers.len(),
            Message::EventBatch(events) => events.len(),
            Message::CentroidBatch(out) => out.centroids.len(),
            Message::Sentinel => 0,
        }
    }

    /// True if no records are carried.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_len() {
        let raw = Message::RawBatch(RawBatch::from_words(&[1, 2, 3], 0));
        assert_eq!(raw.kind(), "raw");
        assert_eq!(raw.len(), 3);
        assert!(!raw.is_sentinel());

        assert!(Message::Sentinel.is_sentinel());
        assert!(Message::Sentinel.is_empty());
        assert_eq!(Message::EventBatch(EventBatch::default()).kind(), "events");
    }
}
