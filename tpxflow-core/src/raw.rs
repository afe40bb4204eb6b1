//! Raw word batches as produced by the samplers.

/// Size of one wire-format word in bytes.
pub const WORD_SIZE: usize = 8;

/// A buffer of little-endian 64-bit words plus the reference-clock snapshot
/// that covers all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBatch {
    /// Raw bytes, a whole number of words in practice.
    pub bytes: Vec<u8>,
    /// Reference clock (25 ns ticks) valid for the whole buffer.
    pub clock: u64,
}

impl RawBatch {
    /// Creates a batch from raw bytes and a clock snapshot.
    #[must_use]
    pub fn new(bytes: Vec<u8>, clock: u64) -> Self {
        Self { bytes, clock }
    }

    /// Creates a batch from already assembled words.
    #[must_use]
    pub fn from_words(words: &[u64], clock: u64) -> Self {
        let mut bytes = Vec::with_capacity(words.len() * WORD_SIZE);
        for word in words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        Self { bytes, clock }
    }

    /// Number of complete words in the buffer.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.bytes.len() / WORD_SIZE
    }

    /// Iterates over the complete words; a trailing partial word is ignored.
    pub fn words(&self) -> impl Iterator<Item = u64> + '_ {
        self.bytes.chunks_exact(WORD_SIZE).map(|chunk| {
            let mut word = [0u8; WORD_SIZE];
            word.copy_from_slice(chunk);
            u64::from_le_bytes(word)
        })
    }

    /// Returns true if the buffer holds no complete word.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.word_count() == 0
    }
}
