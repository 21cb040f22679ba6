use core::ops::Range;

/// A fixed-length bitmap.
#[derive(Clone, Debug)]
pub struct Bitmap {
    num_bits: usize,
    map: Box<[u64]>,
}

impl Bitmap {
    /// Constructs a new bitmap of `num_bits` bits, all clear.
    pub fn new(num_bits: usize) -> Bitmap {
        assert!(num_bits > 0);

        Bitmap {
            num_bits,
            map: vec![0; Self::num_blocks(num_bits)].into_boxed_slice(),
        }
    }

    #[inline]
    pub const fn num_blocks(num_bits: usize) -> usize {
        num_bits.div_ceil(u64::BITS as usize)
    }

    /// Returns a tuple of the index of the `u64` containing `bit` and a mask
    /// which extracts it.
    #[inline]
    const fn index_and_mask(bit: usize) -> (usize, u64) {
        (
            bit / u64::BITS as usize,
            1 << (bit as u64 % u64::BITS as u64),
        )
    }

    /// Yields the index of each `u64` overlapping `range` and the mask of the
    /// bits of `range` within it.
    fn blocks_in(num_bits: usize, range: Range<usize>) -> impl Iterator<Item = (usize, u64)> {
        assert!(range.start <= range.end && range.end <= num_bits);

        let bits = u64::BITS as usize;
        let Range { start, end } = range;

        (start / bits..end.div_ceil(bits)).map(move |block| {
            let lo = start.max(block * bits) - block * bits;
            let hi = end.min((block + 1) * bits) - block * bits;

            let mask = match hi - lo {
                64 => u64::MAX,
                width => ((1_u64 << width) - 1) << lo,
            };

            (block, mask)
        })
    }

    /// Gets the value of the indexed bit.
    #[inline]
    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.num_bits);

        let (block_idx, mask) = Self::index_and_mask(index);
        self.map[block_idx] & mask != 0
    }

    /// Sets the value of the indexed bit.
    #[inline]
    pub fn set(&mut self, index: usize, value: bool) {
        assert!(index < self.num_bits);

        let (block_idx, mask) = Self::index_and_mask(index);
        let block = &mut self.map[block_idx];
        *block = match value {
            true => *block | mask,
            false => *block & !mask,
        };
    }

    /// Sets every bit in `range` to `value`.
    pub fn set_range(&mut self, range: Range<usize>, value: bool) {
        for (block_idx, mask) in Self::blocks_in(self.num_bits, range) {
            let block = &mut self.map[block_idx];
            *block = match value {
                true => *block | mask,
                false => *block & !mask,
            };
        }
    }

    /// Returns `true` if any bit in `range` is set.
    pub fn any_in(&self, range: Range<usize>) -> bool {
        Self::blocks_in(self.num_bits, range)
            .any(|(block_idx, mask)| self.map[block_idx] & mask != 0)
    }

    /// Returns the number of set bits.
    #[cfg(test)]
    pub fn count_ones(&self) -> usize {
        self.map.iter().map(|b| b.count_ones() as usize).sum()
    }
}
