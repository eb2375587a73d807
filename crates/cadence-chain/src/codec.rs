//! Big-endian field reader and the packed version/height field.

use crate::error::{Error, Result};

const HEIGHT_BITS: u32 = 48;
const HEIGHT_MASK: u64 = (1 << HEIGHT_BITS) - 1;

/// Pack a 16-bit blockchain version and a 48-bit height into one value.
pub fn pack_version_and_height(version: u16, height: u64) -> u64 {
    ((version as u64) << HEIGHT_BITS) | (height & HEIGHT_MASK)
}

/// Inverse of [`pack_version_and_height`].
pub fn unpack_version_and_height(packed: u64) -> (u16, u64) {
    ((packed >> HEIGHT_BITS) as u16, packed & HEIGHT_MASK)
}

/// Cursor over an input buffer. Every read is bounds-checked.
#[derive(Debug)]
pub struct Reader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Fail unless the whole input was consumed.
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8]> {
        if self.remaining() < needed {
            return Err(Error::Truncated {
                needed,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + needed];
        self.position += needed;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array()?))
    }

    /// Read exactly `N` bytes into an array.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read `len` bytes into a vector.
    pub fn vec(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.take(len)?.to_vec())
    }
}
