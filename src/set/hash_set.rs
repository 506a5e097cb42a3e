use super::{cursor::Position, Cursor, Iter, SetBuilder};
use crate::{
    cht::{
        hash,
        shard::{Shard, ShardStats},
    },
    common::{
        builder_utils::Config,
        concurrent::constants::{DEFAULT_CAPACITY_BITS, DEFAULT_PARTITION_BITS},
        error::VerifyError,
    },
    Element,
};

use std::{borrow::Borrow, fmt};

/// A sharded hash set of integers or byte strings.
///
/// Elements are spread over `2^partition_bits` shards. Each shard is a
/// separately resizable hash table that starts with `2^capacity_bits` buckets
/// and doubles its bucket count, one bucket at a time, whenever it holds more
/// than 2.8 elements per bucket.
///
/// A set is created either in single-threaded mode or in concurrent mode.
/// Both modes expose the same `&self` API, but only a concurrent set takes the
/// locks that make it safe to share between threads. A single-threaded set
/// takes no locks at all. Each of its shards belongs to the first thread that
/// writes to it, until the next [`clear`](#method.clear), and writing to it
/// from any other thread panics.
///
/// [`contains`](#method.contains) never blocks, except in the short window
/// where a concurrent resize is moving the bucket it looks at.
///
/// # Examples
///
/// ```rust
/// use fastset::IntSet;
///
/// let set = IntSet::<i64>::new(false);
///
/// assert!(set.add(&10));
/// assert!(set.add(&20));
/// assert!(!set.add(&10));
///
/// assert!(set.contains(&20));
/// assert!(set.remove(&20));
/// assert!(!set.contains(&20));
/// assert_eq!(set.len(), 1);
/// ```
///
/// Sharing a concurrent set between threads:
///
/// ```rust
/// use fastset::IntSet;
///
/// use std::{sync::Arc, thread};
///
/// let set = Arc::new(IntSet::<u64>::new(true));
///
/// let threads: Vec<_> = (0..4u64)
///     .map(|t| {
///         let set = Arc::clone(&set);
///         thread::spawn(move || {
///             for i in 0..1000 {
///                 set.add(&(t * 1000 + i));
///             }
///         })
///     })
///     .collect();
///
/// for t in threads {
///     t.join().unwrap();
/// }
///
/// assert_eq!(set.len(), 4000);
/// ```
pub struct HashSet<E: Element + ?Sized> {
    shards: Box<[Shard<E::Bucket>]>,
    shard_mask: u32,
    config: Config,
}

/// A set of fixed-width integers.
pub type IntSet<T = i64> = HashSet<T>;

/// A set of byte strings.
///
/// A single byte string may be at most 65,512 bytes long.
pub type BytesSet = HashSet<[u8]>;

impl<E: Element + ?Sized> fmt::Debug for HashSet<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<E: Element + ?Sized> HashSet<E> {
    /// Creates a set with 16 shards of 4096 buckets each.
    pub fn new(concurrent: bool) -> Self {
        Self::with_bits(concurrent, DEFAULT_PARTITION_BITS, DEFAULT_CAPACITY_BITS)
    }

    /// Creates a set with `2^partition_bits` shards of `2^capacity_bits`
    /// initial buckets each.
    ///
    /// `partition_bits` above 8 is treated as 8. `capacity_bits` outside
    /// `4..=30` falls back to 12.
    pub fn with_bits(concurrent: bool, partition_bits: u32, capacity_bits: u32) -> Self {
        Self::with_config(Config::new(concurrent, partition_bits, capacity_bits))
    }

    /// Returns a [`SetBuilder`][builder-struct] for this kind of set.
    ///
    /// [builder-struct]: ./struct.SetBuilder.html
    pub fn builder() -> SetBuilder<Self> {
        SetBuilder::default()
    }

    pub(crate) fn with_config(config: Config) -> Self {
        let num_shards = 1usize << config.partition_bits;
        let shards = (0..num_shards).map(|i| Shard::new(i, config)).collect();

        Self {
            shards,
            shard_mask: (num_shards - 1) as u32,
            config,
        }
    }

    /// Returns `true` if this set was created in concurrent mode.
    pub fn is_concurrent(&self) -> bool {
        self.config.concurrent
    }

    /// Inserts `elem`. Returns `true` if it was not already present.
    ///
    /// # Panics
    ///
    /// Panics if `elem` is a byte string longer than 65,512 bytes.
    pub fn add(&self, elem: &E) -> bool {
        let code = elem.fingerprint();
        self.shard_for(code).add(elem, code)
    }

    /// Inserts `elem` unless `exclude` contains it. Returns `true` if `elem`
    /// was inserted.
    pub fn add_exclusive(&self, elem: &E, exclude: Option<&Self>) -> bool {
        let code = elem.fingerprint();
        if let Some(exclude) = exclude {
            if exclude.shard_for(code).find(elem, code).is_some() {
                return false;
            }
        }
        self.shard_for(code).add(elem, code)
    }

    /// Inserts every element of `other`. Returns the number of elements that
    /// were not already present.
    ///
    /// When both sets have the same number of shards, shards are copied
    /// pairwise. `other` must not be modified while this runs.
    pub fn add_all(&self, other: &Self) -> usize {
        if self.shards.len() == other.shards.len() {
            self.shards
                .iter()
                .zip(other.shards.iter())
                .map(|(dst, src)| dst.add_all(src))
                .sum()
        } else {
            let mut added = 0;
            for shard in other.shards.iter() {
                for bucket in 0.. {
                    let Some(len) = shard.bucket_len(bucket) else {
                        break;
                    };
                    for item in 0..len {
                        if let Some(elem) = shard.item(bucket, item) {
                            if self.add(Borrow::<E>::borrow(&elem)) {
                                added += 1;
                            }
                        }
                    }
                }
            }
            added
        }
    }

    /// Inserts every element yielded by `iter`. Returns the number of elements
    /// that were not already present.
    pub fn add_all_iter<I>(&self, iter: I) -> usize
    where
        I: IntoIterator,
        I::Item: Borrow<E>,
    {
        iter.into_iter()
            .filter(|elem| self.add(Borrow::<E>::borrow(elem)))
            .count()
    }

    pub fn contains(&self, elem: &E) -> bool {
        let code = elem.fingerprint();
        self.shard_for(code).find(elem, code).is_some()
    }

    /// Removes `elem`. Returns `true` if it was present.
    pub fn remove(&self, elem: &E) -> bool {
        let code = elem.fingerprint();
        self.shard_for(code).remove(elem, code)
    }

    /// Returns the number of elements.
    ///
    /// Writers update the per-shard counts after releasing their bucket locks,
    /// so while other threads are writing this is an approximation.
    pub fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Returns the total number of buckets over all shards.
    pub fn capacity(&self) -> usize {
        self.shards.iter().map(Shard::capacity).sum()
    }

    /// Removes every element and shrinks every shard back to its initial
    /// bucket count.
    ///
    /// This also lets a single-threaded set move on to another thread.
    pub fn clear(&mut self) {
        for shard in self.shards.iter_mut() {
            shard.disown();
        }
        if self.config.stats_on_clear {
            self.dump_stats();
        }
        for shard in self.shards.iter_mut() {
            shard.clear();
        }
    }

    /// Returns a cursor positioned at `elem`, or an invalid cursor if the set
    /// does not contain it.
    pub fn find(&self, elem: &E) -> Cursor<'_, E> {
        let code = elem.fingerprint();
        let shard = self.shard_index(code);
        let position = self.shards[shard]
            .find(elem, code)
            .map(|(bucket, item)| Position {
                shard,
                bucket,
                item,
            });
        Cursor::new(self, position)
    }

    /// Returns a cursor positioned at the first element.
    pub fn cursor(&self) -> Cursor<'_, E> {
        Cursor::begin(self)
    }

    /// Returns an iterator over copies of the elements, shard by shard.
    pub fn iter(&self) -> Iter<'_, E> {
        Iter::new(self.cursor())
    }

    /// Removes up to `count` elements starting at `cursor`, and returns how
    /// many were removed.
    ///
    /// Removing an element moves the last element of its bucket into its
    /// place, so the cursor stays where it is unless that left it past the
    /// end of the bucket. On return the cursor is positioned at the first
    /// element that was not visited.
    ///
    /// This must not run concurrently with other writers.
    ///
    /// # Panics
    ///
    /// Panics if `cursor` was created by another set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use fastset::IntSet;
    ///
    /// let set = IntSet::<i64>::with_bits(false, 0, 4);
    /// set.add_all_iter(0..10);
    ///
    /// let mut cursor = set.cursor();
    /// assert_eq!(set.erase(&mut cursor, 4), 4);
    /// assert_eq!(set.len(), 6);
    ///
    /// assert_eq!(set.erase(&mut cursor, 100), 6);
    /// assert!(set.is_empty());
    /// assert!(!cursor.is_valid());
    /// ```
    pub fn erase(&self, cursor: &mut Cursor<'_, E>, count: usize) -> usize {
        assert!(
            cursor.belongs_to(self),
            "cannot erase through a cursor of another set"
        );

        let mut erased = 0;
        for _ in 0..count {
            if cursor.is_end() {
                break;
            }
            match cursor.current() {
                Some(elem) if self.remove(Borrow::<E>::borrow(&elem)) => {
                    erased += 1;
                    if !cursor.is_valid() {
                        cursor.advance();
                    }
                }
                _ => cursor.advance(),
            }
        }
        erased
    }

    /// Checks that every element sits in the bucket its fingerprint maps to
    /// and that every shard's count matches its contents. Returns the number
    /// of elements.
    ///
    /// The result is only meaningful while no other thread modifies the set.
    pub fn verify(&self) -> Result<usize, VerifyError> {
        self.shards.iter().map(Shard::verify).sum()
    }

    /// Returns bucket occupancy statistics for every shard.
    pub fn stats(&self) -> Vec<ShardStats> {
        self.shards.iter().map(Shard::stats).collect()
    }

    /// Logs the statistics of every shard at the `info` level.
    pub fn dump_stats(&self) {
        for stats in self.stats() {
            log::info!("{stats}");
        }
    }

    pub(crate) fn shard(&self, index: usize) -> Option<&Shard<E::Bucket>> {
        self.shards.get(index)
    }

    fn shard_index(&self, code: u32) -> usize {
        (hash::shard_hash(code) & self.shard_mask) as usize
    }

    fn shard_for(&self, code: u32) -> &Shard<E::Bucket> {
        &self.shards[self.shard_index(code)]
    }
}

impl<'a, E: Element + ?Sized> IntoIterator for &'a HashSet<E> {
    type Item = E::Owned;
    type IntoIter = Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{BytesSet, IntSet};
    use crate::{common::error::VerifyError, Element};

    use std::{collections::BTreeSet, thread};

    #[test]
    fn basic_scenario() {
        let set = IntSet::<i64>::with_bits(false, 2, 4);
        assert_eq!(set.shard_count(), 4);
        assert_eq!(set.capacity(), 64);

        assert!(set.add(&10));
        assert!(set.add(&20));
        assert!(set.add(&30));
        assert!(!set.add(&20));
        assert_eq!(set.len(), 3);

        assert!(set.contains(&10));
        assert!(!set.contains(&40));

        assert!(set.remove(&20));
        assert!(!set.remove(&20));
        assert!(!set.contains(&20));

        let elements: BTreeSet<_> = set.iter().collect();
        assert_eq!(elements, [10, 30].into_iter().collect());
    }

    #[test]
    fn construction_parameters_are_clamped() {
        let set = IntSet::<u32>::with_bits(false, 12, 4);
        assert_eq!(set.shard_count(), 256);
        assert_eq!(set.capacity(), 256 * 16);

        let set = IntSet::<u32>::with_bits(false, 0, 40);
        assert_eq!(set.capacity(), 4096);

        let set = BytesSet::with_bits(true, 0, 2);
        assert_eq!(set.shard_count(), 1);
        assert_eq!(set.capacity(), 4096);
        assert!(set.is_concurrent());
    }

    #[test]
    fn add_exclusive() {
        let exclude = IntSet::<i64>::new(false);
        exclude.add(&1);

        let set = IntSet::<i64>::new(false);
        assert!(!set.add_exclusive(&1, Some(&exclude)));
        assert!(set.add_exclusive(&2, Some(&exclude)));
        assert!(!set.add_exclusive(&2, Some(&exclude)));
        assert!(set.add_exclusive(&1, None));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn add_all_with_matching_and_mismatched_shards() {
        let src = BytesSet::with_bits(false, 3, 4);
        let words: Vec<Vec<u8>> = (0..500).map(|i| format!("w{i}").into_bytes()).collect();
        assert_eq!(src.add_all_iter(words.iter().map(Vec::as_slice)), 500);

        let same = BytesSet::with_bits(false, 3, 6);
        same.add(b"w0");
        assert_eq!(same.add_all(&src), 499);
        assert_eq!(same.len(), 500);

        let other = BytesSet::with_bits(false, 1, 4);
        other.add(b"w1");
        other.add(b"extra");
        assert_eq!(other.add_all(&src), 499);
        assert_eq!(other.len(), 501);

        for w in &words {
            assert!(same.contains(w));
            assert!(other.contains(w));
        }
    }

    #[test]
    fn find_returns_a_cursor_at_the_element() {
        let set = IntSet::<i64>::with_bits(false, 1, 4);
        set.add_all_iter([5, 6, 7]);

        let cursor = set.find(&6);
        assert!(cursor.is_valid());
        assert_eq!(cursor.get(), 6);

        let missing = set.find(&8);
        assert!(!missing.is_valid());
        assert_eq!(missing.get(), 0);
    }

    #[test]
    fn erase_within_one_bucket() {
        // One shard, 16 buckets, three elements in bucket 0.
        let colliding: Vec<i64> = (0..)
            .filter(|v: &i64| v.fingerprint() & 0xf == 0)
            .take(3)
            .collect();

        let set = IntSet::<i64>::with_bits(false, 0, 4);
        assert_eq!(set.add_all_iter(&colliding), 3);

        let mut cursor = set.cursor();
        assert_eq!(cursor.get(), colliding[0]);
        cursor.advance();
        assert_eq!(cursor.get(), colliding[1]);

        // The last element fills the erased slot, so the cursor stays put.
        assert_eq!(set.erase(&mut cursor, 2), 2);
        assert!(!cursor.is_valid());
        assert_eq!(set.len(), 1);
        assert!(set.contains(&colliding[0]));

        let mut cursor = set.cursor();
        assert_eq!(set.erase(&mut cursor, 2), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn erase_two_of_four_in_one_bucket() {
        let colliding: Vec<i64> = (0..)
            .filter(|v: &i64| v.fingerprint() & 0xf == 0)
            .take(4)
            .collect();
        let (a, b, c, d) = (colliding[0], colliding[1], colliding[2], colliding[3]);

        let set = IntSet::<i64>::with_bits(false, 0, 4);
        assert_eq!(set.add_all_iter(&colliding), 4);

        // Erasing B pulls D into its slot, erasing D pulls C in after it.
        let mut cursor = set.find(&b);
        assert_eq!(cursor.get(), b);
        assert_eq!(set.erase(&mut cursor, 2), 2);

        assert_eq!(set.len(), 2);
        assert!(cursor.is_valid());
        assert_eq!(cursor.get(), c);
        assert!(set.contains(&a) && set.contains(&c));
        assert!(!set.contains(&b) && !set.contains(&d));
    }

    #[test]
    #[should_panic(expected = "another set")]
    fn erase_rejects_foreign_cursors() {
        let a = IntSet::<i64>::new(false);
        let b = IntSet::<i64>::new(false);
        a.add(&1);
        b.add(&1);

        let mut cursor = a.cursor();
        b.erase(&mut cursor, 1);
    }

    #[test]
    fn clear_and_reuse() {
        let mut set = IntSet::<u64>::builder()
            .partition_bits(1)
            .capacity_bits(4)
            .stats_on_clear(true)
            .build();

        assert_eq!(set.add_all_iter(0..1000u64), 1000);
        let grown = set.capacity();
        assert!(grown > 32);

        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.capacity(), 32);
        assert!(!set.contains(&1));

        assert_eq!(set.add_all_iter(0..1000u64), 1000);
        assert_eq!(set.capacity(), grown);
    }

    #[test]
    fn verify_and_stats() {
        let set = IntSet::<i32>::with_bits(false, 2, 4);
        set.add_all_iter(-500..500);

        assert_eq!(set.verify(), Ok(1000));
        let stats = set.stats();
        assert_eq!(stats.len(), 4);
        assert_eq!(stats.iter().map(|s| s.len).sum::<usize>(), 1000);
        set.dump_stats();

        let empty = IntSet::<i32>::new(false);
        assert_eq!(empty.verify(), Ok(0));
        let _: Result<usize, VerifyError> = empty.verify();
    }

    #[test]
    fn single_threaded_set_changes_threads_through_clear() {
        let mut set = IntSet::<i64>::with_bits(false, 0, 4);
        assert_eq!(set.add_all_iter(0..100), 100);

        let shared = &set;
        let written = thread::scope(|s| s.spawn(|| shared.add_all_iter(100..1000)).join());
        assert!(written.is_err());

        set.clear();
        let set = thread::spawn(move || {
            assert_eq!(set.add_all_iter(0..1000), 1000);
            set
        })
        .join()
        .expect("the cleared set was free to move");
        assert_eq!(set.verify(), Ok(1000));
    }

    #[test]
    fn debug_lists_elements() {
        let set = IntSet::<i64>::with_bits(false, 0, 4);
        set.add(&42);
        assert_eq!(format!("{set:?}"), "{42}");
    }

    mod ints {
        crate::write_test_cases_for_me!(i64, |i: i32| i64::from(i) * 7919);
    }

    mod bytes {
        crate::write_test_cases_for_me!([u8], |i: i32| format!("element-{i}").into_bytes());
    }
}
