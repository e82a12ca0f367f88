use std::fmt;

use crate::error::{ErrorKind, Result};

/// Byte sequence whose length is checked against `MAX` when it is built.
///
/// Every variable-length wire field goes through this type, so the encoder
/// can write length prefixes without re-checking and the decoder never hands
/// out a field longer than its prefix could describe.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BoundedBytes<const MAX: usize>(Vec<u8>);

impl<const MAX: usize> BoundedBytes<MAX> {
    pub const CAPACITY: usize = MAX;

    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() > MAX {
            return Err(ErrorKind::PayloadTooLarge {
                len: bytes.len(),
                max: MAX,
            });
        }
        Ok(Self(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::new(bytes.to_vec())
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    /// Moves the bytes into a container with at least the same capacity.
    pub fn widen<const WIDER: usize>(self) -> BoundedBytes<WIDER> {
        const { assert!(MAX <= WIDER) };
        BoundedBytes(self.0)
    }
}

impl<const MAX: usize> AsRef<[u8]> for BoundedBytes<MAX> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const MAX: usize> TryFrom<Vec<u8>> for BoundedBytes<MAX> {
    type Error = ErrorKind;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        Self::new(bytes)
    }
}

impl<const MAX: usize> fmt::Debug for BoundedBytes<MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundedBytes<{}>({})", MAX, hex::encode(&self.0))
    }
}
