//! Shared payload handle.
//!
//! A `Payload` is a read-only view of fetched content bytes. Clones share
//! the same backing storage (via [`bytes::Bytes`]), so every live snapshot
//! of a finished fetch reads the same buffer, and the storage is freed
//! exactly once when the last handle drops. A double free is
//! unrepresentable in this design; there is no manual release call.

use bytes::Bytes;

/// Read-only handle to fetched content bytes.
///
/// Cloning is cheap and shares storage. The backing buffer is released
/// when the final clone is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    bytes: Bytes,
}

impl Payload {
    /// Create a payload owning the given bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { bytes: data.into() }
    }

    /// Length of the payload in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrow the payload bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether two handles view the same backing storage.
    ///
    /// Content equality is not enough here: the coalescing tests need to
    /// prove that two callers got the *same* buffer, not two equal copies.
    pub fn shares_storage(&self, other: &Self) -> bool {
        self.len() == other.len() && self.bytes.as_ref().as_ptr() == other.bytes.as_ref().as_ptr()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<&'static [u8]> for Payload {
    fn from(data: &'static [u8]) -> Self {
        Self::new(data)
    }
}
