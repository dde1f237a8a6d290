//! Shared, immutable PCM blocks

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Immutable chunk of PCM bytes.
///
/// Clones and slices share the same storage, so a block can sit in a queue,
/// be handed to the canceller, and be forwarded downstream without copying.
#[derive(Clone)]
pub struct AudioBlock {
    data: Arc<[u8]>,
    offset: usize,
    len: usize,
}

impl AudioBlock {
    /// Wrap owned bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        Self {
            data: Arc::from(bytes),
            offset: 0,
            len,
        }
    }

    /// Zero-filled block (silence for signed and float formats)
    pub fn silence(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    /// Build a block from signed 16-bit samples
    pub fn from_i16(samples: &[i16]) -> Self {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        Self::new(bytes)
    }

    /// Number of bytes in the block
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the block holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// View the bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.len]
    }

    /// Sub-range sharing the same storage.
    ///
    /// The range is clamped to the block length.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.len);
        let start = range.start.min(end);
        Self {
            data: self.data.clone(),
            offset: self.offset + start,
            len: end - start,
        }
    }

    /// Decode as signed 16-bit little endian samples
    pub fn to_i16(&self) -> Vec<i16> {
        self.as_bytes()
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    /// Whether two blocks share storage
    pub fn shares_storage(&self, other: &AudioBlock) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for AudioBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioBlock")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

impl PartialEq for AudioBlock {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for AudioBlock {}

impl From<Vec<u8>> for AudioBlock {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}
