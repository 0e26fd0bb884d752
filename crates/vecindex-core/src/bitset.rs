//! Per-row exclusion mask applied during nearest-neighbor search.
//!
//! Bit `i` lives in byte `i / 8` at position `i % 8`. A set bit means row `i`
//! must not appear in query results.

/// Owned exclusion bitset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitset {
    bytes: Vec<u8>,
    len: usize,
}

impl Bitset {
    /// All-clear bitset covering `len` rows.
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len.div_ceil(8)],
            len,
        }
    }

    /// Wrap an existing byte buffer covering `len` rows.
    ///
    /// Returns `None` if the buffer is too short.
    pub fn from_bytes(bytes: Vec<u8>, len: usize) -> Option<Self> {
        if bytes.len() * 8 < len {
            return None;
        }
        Some(Self { bytes, len })
    }

    #[inline]
    pub fn set(&mut self, i: usize) {
        assert!(i < self.len, "bit {} out of range for bitset of {}", i, self.len);
        self.bytes[i >> 3] |= 1 << (i & 7);
    }

    #[inline]
    pub fn clear(&mut self, i: usize) {
        assert!(i < self.len, "bit {} out of range for bitset of {}", i, self.len);
        self.bytes[i >> 3] &= !(1 << (i & 7));
    }

    #[inline]
    pub fn test(&self, i: usize) -> bool {
        self.view().test(i)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn count_ones(&self) -> usize {
        self.view().count_ones()
    }

    /// Borrowed view passed to a query.
    #[inline]
    pub fn view(&self) -> BitsetView<'_> {
        BitsetView {
            bytes: &self.bytes,
            len: self.len,
        }
    }
}

/// Borrowed exclusion mask, supplied fresh to every query.
#[derive(Debug, Clone, Copy)]
pub struct BitsetView<'a> {
    bytes: &'a [u8],
    len: usize,
}

impl<'a> BitsetView<'a> {
    /// View over caller bytes covering `len` rows.
    ///
    /// Returns `None` if the buffer is too short.
    pub fn new(bytes: &'a [u8], len: usize) -> Option<Self> {
        if bytes.len() * 8 < len {
            return None;
        }
        Some(Self { bytes, len })
    }

    /// True when row `i` is excluded. Rows past the end are never excluded.
    #[inline]
    pub fn test(&self, i: usize) -> bool {
        i < self.len && self.bytes[i >> 3] & (1 << (i & 7)) != 0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of excluded rows.
    pub fn count_ones(&self) -> usize {
        (0..self.len).filter(|&i| self.test(i)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_test() {
        let mut bs = Bitset::new(20);
        assert_eq!(bs.bytes.len(), 3);
        bs.set(0);
        bs.set(9);
        bs.set(19);
        assert!(bs.test(0) && bs.test(9) && bs.test(19));
        assert!(!bs.test(1));
        assert_eq!(bs.count_ones(), 3);
        bs.clear(9);
        assert!(!bs.test(9));
    }

    #[test]
    fn test_bit_layout_matches_bytes() {
        let mut bs = Bitset::new(16);
        bs.set(10);
        assert_eq!(bs.bytes[1], 0b0000_0100);
    }

    #[test]
    fn test_out_of_range_view_is_clear() {
        let bs = Bitset::from_bytes(vec![0xFF], 4).unwrap();
        assert!(bs.test(3));
        assert!(!bs.test(4));
        assert!(!bs.view().test(100));
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert!(Bitset::from_bytes(vec![0u8; 1], 9).is_none());
        assert!(BitsetView::new(&[0u8; 2], 16).is_some());
        assert!(BitsetView::new(&[0u8; 2], 17).is_none());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_set_out_of_range_panics() {
        Bitset::new(4).set(4);
    }
}
