//! Flash image model.
//!
//! The flasher consumes any [`FlashImage`]: a sparse mapping from address to
//! byte. File formats are parsed elsewhere and fed into a [`SparseImage`].

use {
    crate::error::{Error, Result},
    std::collections::BTreeMap,
};

/// Value reported for unpopulated addresses (erased flash).
pub const DEFAULT_FILL: u8 = 0xFF;

/// Sparse address-to-byte view of a firmware image.
pub trait FlashImage {
    /// Highest populated address, or `None` for an empty image.
    fn max_address(&self) -> Option<u32>;

    /// Bytes of `start..=end`, gaps filled. Empty when `start > end`.
    fn bytes_in_range(&self, start: u32, end: u32) -> Vec<u8>;

    /// Maximal runs of populated addresses as inclusive `(start, end)` pairs,
    /// ascending.
    fn populated_segments(&self) -> Vec<(u32, u32)>;
}

/// In-memory [`FlashImage`] backed by an ordered map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseImage {
    data: BTreeMap<u32, u8>,
    fill: u8,
}

impl Default for SparseImage {
    fn default() -> Self {
        Self::new()
    }
}

impl SparseImage {
    /// Create an empty image filled with 0xFF.
    pub fn new() -> Self {
        Self::with_fill(DEFAULT_FILL)
    }

    /// Create an empty image with a custom gap fill.
    pub fn with_fill(fill: u8) -> Self {
        Self {
            data: BTreeMap::new(),
            fill,
        }
    }

    /// Create an image holding `data` at `base`.
    pub fn from_bytes(base: u32, data: &[u8]) -> Result<Self> {
        let mut image = Self::new();
        image.add_data(base, data)?;
        Ok(image)
    }

    /// Place `data` starting at `addr`. Later data wins on overlap.
    ///
    /// Fails without touching the image if the data would run past the end
    /// of the 32-bit address space.
    pub fn add_data(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let overflow = || Error::AddressOverflow {
            addr,
            len: data.len(),
        };
        if let Some(last) = data.len().checked_sub(1) {
            u32::try_from(last)
                .ok()
                .and_then(|last| addr.checked_add(last))
                .ok_or_else(overflow)?;
        }
        for (byte_addr, &byte) in (addr..=u32::MAX).zip(data) {
            self.data.insert(byte_addr, byte);
        }
        Ok(())
    }

    /// Set a single byte.
    pub fn set(&mut self, addr: u32, byte: u8) {
        self.data
            .insert(addr, byte);
    }

    /// Get a populated byte.
    pub fn get(&self, addr: u32) -> Option<u8> {
        self.data
            .get(&addr)
            .copied()
    }

    /// Lowest populated address.
    pub fn min_address(&self) -> Option<u32> {
        self.data
            .keys()
            .next()
            .copied()
    }

    /// Number of populated bytes.
    pub fn len(&self) -> usize {
        self.data
            .len()
    }

    /// Check if nothing is populated.
    pub fn is_empty(&self) -> bool {
        self.data
            .is_empty()
    }

    /// Gap fill value.
    pub fn fill(&self) -> u8 {
        self.fill
    }
}

impl FlashImage for SparseImage {
    fn max_address(&self) -> Option<u32> {
        self.data
            .keys()
            .next_back()
            .copied()
    }

    fn bytes_in_range(&self, start: u32, end: u32) -> Vec<u8> {
        if start > end {
            return Vec::new();
        }
        (start..=end)
            .map(|addr| {
                self.get(addr)
                    .unwrap_or(self.fill)
            })
            .collect()
    }

    fn populated_segments(&self) -> Vec<(u32, u32)> {
        let mut segments: Vec<(u32, u32)> = Vec::new();
        for &addr in self
            .data
            .keys()
        {
            match segments.last_mut() {
                Some((_, end)) if *end + 1 == addr => *end = addr,
                _ => segments.push((addr, addr)),
            }
        }
        segments
    }
}

impl<I: FlashImage + ?Sized> FlashImage for &I {
    fn max_address(&self) -> Option<u32> {
        (**self).max_address()
    }

    fn bytes_in_range(&self, start: u32, end: u32) -> Vec<u8> {
        (**self).bytes_in_range(start, end)
    }

    fn populated_segments(&self) -> Vec<(u32, u32)> {
        (**self).populated_segments()
    }
}
