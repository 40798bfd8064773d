//! Owned byte buffers for frame and metadata contents.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Sensitive bytes that are overwritten with zeros once no longer needed.
///
/// Zeroized explicitly through [`SecureBuffer::zero`] and again on drop, so
/// early returns and cancellation never leave the contents behind.
#[derive(Default, Zeroize, ZeroizeOnDrop)]
pub struct SecureBuffer(Vec<u8>);

impl SecureBuffer {
    /// Take ownership of `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Copy `bytes` into a new buffer.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Borrow the contents. Empty after [`SecureBuffer::zero`].
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Number of bytes held.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the buffer is empty (or has been zeroed).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overwrite the contents with zeros and release them.
    pub fn zero(&mut self) {
        self.0.zeroize();
    }
}

impl From<Vec<u8>> for SecureBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for SecureBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecureBuffer([{} bytes])", self.0.len())
    }
}
