//! A growable array of buckets that never moves a bucket once allocated.
//!
//! The first chunk holds the initial `2^base_bits` buckets. Every later chunk
//! is as large as all the chunks before it combined, so chunk `k` holds
//! buckets `2^(base_bits + k - 1) .. 2^(base_bits + k)`. Doubling a table's
//! capacity therefore allocates exactly one new chunk, and references into
//! existing chunks stay valid while other threads keep using them.

use crate::common::concurrent::constants::MAX_CAPACITY_BITS;

use once_cell::sync::OnceCell;

pub(crate) struct BucketTable<B> {
    base_bits: u32,
    chunks: Box<[OnceCell<Box<[B]>>]>,
}

impl<B: Default> BucketTable<B> {
    pub(crate) fn new(base_bits: u32) -> Self {
        debug_assert!(base_bits <= MAX_CAPACITY_BITS);

        let chunks: Box<[_]> = (0..=(MAX_CAPACITY_BITS - base_bits))
            .map(|_| OnceCell::new())
            .collect();
        let _ = chunks[0].set(new_buckets(1 << base_bits));

        Self { base_bits, chunks }
    }

    /// Returns the bucket at `index`.
    ///
    /// # Panics
    ///
    /// Panics if the chunk holding `index` has not been allocated.
    pub(crate) fn bucket(&self, index: usize) -> &B {
        match self.get(index) {
            Some(bucket) => bucket,
            None => panic!("bucket {index:#x} is not allocated"),
        }
    }

    pub(crate) fn get(&self, index: usize) -> Option<&B> {
        let (chunk, offset) = self.locate(index);
        self.chunks.get(chunk)?.get()?.get(offset)
    }

    /// Allocates buckets `capacity .. 2 * capacity`, where `capacity` is the
    /// current number of buckets.
    pub(crate) fn extend(&self, capacity: usize) {
        debug_assert!(capacity.is_power_of_two());
        let (chunk, offset) = self.locate(capacity);
        debug_assert_eq!(offset, 0);

        if let Some(cell) = self.chunks.get(chunk) {
            cell.get_or_init(|| new_buckets(capacity));
        }
    }

    /// Drops every chunk but the first and clears the buckets in it.
    pub(crate) fn reset<F>(&mut self, mut clear: F)
    where
        F: FnMut(&mut B),
    {
        let mut chunks = self.chunks.iter_mut();
        if let Some(first) = chunks.next().and_then(OnceCell::get_mut) {
            first.iter_mut().for_each(&mut clear);
        }
        for chunk in chunks {
            chunk.take();
        }
    }

    fn locate(&self, index: usize) -> (usize, usize) {
        if index < 1 << self.base_bits {
            return (0, index);
        }
        let log2 = usize::BITS - 1 - index.leading_zeros();
        ((log2 - self.base_bits + 1) as usize, index - (1 << log2))
    }
}

fn new_buckets<B: Default>(len: usize) -> Box<[B]> {
    (0..len).map(|_| B::default()).collect()
}

#[cfg(test)]
mod tests {
    use super::BucketTable;

    #[test]
    fn locate_maps_into_geometric_chunks() {
        let table = BucketTable::<u8>::new(4);

        assert_eq!(table.locate(0), (0, 0));
        assert_eq!(table.locate(15), (0, 15));
        assert_eq!(table.locate(16), (1, 0));
        assert_eq!(table.locate(31), (1, 15));
        assert_eq!(table.locate(32), (2, 0));
        assert_eq!(table.locate(63), (2, 31));
        assert_eq!(table.locate(64), (3, 0));
        assert_eq!(table.locate((1 << 30) - 1), (26, (1 << 29) - 1));
    }

    #[test]
    fn extend_allocates_the_next_chunk() {
        let table = BucketTable::<u8>::new(4);

        assert!(table.get(15).is_some());
        assert!(table.get(16).is_none());

        table.extend(16);
        assert!(table.get(16).is_some());
        assert!(table.get(31).is_some());
        assert!(table.get(32).is_none());

        // Idempotent.
        table.extend(16);
        table.extend(32);
        assert!(table.get(63).is_some());
    }

    #[test]
    fn reset_keeps_the_first_chunk() {
        let mut table = BucketTable::<u8>::new(4);
        table.extend(16);

        table.reset(|b| *b = 0);
        assert!(table.get(15).is_some());
        assert!(table.get(16).is_none());
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn missing_bucket_panics() {
        let table = BucketTable::<u8>::new(4);
        let _ = table.bucket(16);
    }
}
