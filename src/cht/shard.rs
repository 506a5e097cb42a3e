//! A single shard: a bucket table that doubles itself one bucket at a time.
//!
//! While a shard is stable, an item with fingerprint `code` lives in bucket
//! `code & mask`. Once the item count passes `capacity * 2.8`, the thread
//! whose insertion crossed the threshold allocates buckets `capacity ..
//! 2 * capacity` and splits the old buckets in index order: every item of
//! bucket `i` whose fingerprint has bit `capacity` set moves to bucket
//! `i + capacity`. The shard's status records how far the split has gone, so
//! that other threads keep finding and inserting items in the right bucket
//! while it runs.
//!
//! Writers lock the bucket they mutate, the resizer locks both halves of the
//! pair it splits, and readers never lock, with one exception. A reader whose
//! item maps to the bucket being split right now takes that bucket's lock so
//! that it does not observe a half-moved bucket. A reader that misses while
//! the status changed under it retries.

use super::{
    arena::{Arena, ArenaStats},
    bucket::Bucket,
    table::BucketTable,
};
use crate::common::{
    builder_utils::Config,
    concurrent::{
        constants::{LOAD_FACTOR, MAX_CAPACITY_BITS},
        spin_lock::SpinLockGuard,
    },
    error::VerifyError,
};

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
};

use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::Mutex;

const SPLITTING_FLAG: u32 = 1 << 31;

/// The published resize progress of a shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Status {
    Stable { mask: u32 },
    /// Buckets `0 ..= rehashed` have been split with `mask + 1` as the split
    /// bit. `rehashed` is `-1` before the first bucket is done.
    Splitting { mask: u32, rehashed: i32 },
}

impl Status {
    fn mask(self) -> u32 {
        match self {
            Self::Stable { mask } | Self::Splitting { mask, .. } => mask,
        }
    }

    /// The first bucket that has not been split yet.
    fn frontier(self) -> i64 {
        match self {
            Self::Stable { .. } => 0,
            Self::Splitting { rehashed, .. } => rehashed as i64 + 1,
        }
    }

    /// Returns the index of the bucket `code` belongs in.
    pub(crate) fn home(self, code: u32) -> usize {
        match self {
            Self::Stable { mask } => (code & mask) as usize,
            Self::Splitting { mask, rehashed } => {
                let low = code & mask;
                if (low as i64) <= rehashed as i64 && code & (mask + 1) != 0 {
                    (low + mask + 1) as usize
                } else {
                    low as usize
                }
            }
        }
    }

    /// Returns the number of buckets in use.
    fn buckets(self) -> usize {
        match self {
            Self::Stable { mask } => mask as usize + 1,
            Self::Splitting { mask, .. } => (mask as usize + 1) * 2,
        }
    }

    fn pack(self) -> u64 {
        match self {
            Self::Stable { mask } => mask as u64,
            Self::Splitting { mask, rehashed } => {
                (mask | SPLITTING_FLAG) as u64 | (rehashed as u32 as u64) << 32
            }
        }
    }

    fn unpack(word: u64) -> Self {
        let low = word as u32;
        if low & SPLITTING_FLAG == 0 {
            Self::Stable { mask: low }
        } else {
            Self::Splitting {
                mask: low & !SPLITTING_FLAG,
                rehashed: (word >> 32) as u32 as i32,
            }
        }
    }
}

/// Returns `true` if an item with fingerprint `code` may have moved between
/// two observations of the status.
fn may_have_moved(before: Status, after: Status, code: u32) -> bool {
    if before.mask() != after.mask() {
        return true;
    }
    let low = (code & before.mask()) as i64;
    before.frontier() <= low && low <= after.frontier()
}

struct StatusWord(AtomicU64);

impl StatusWord {
    fn new(status: Status) -> Self {
        Self(AtomicU64::new(status.pack()))
    }

    fn load(&self) -> Status {
        Status::unpack(self.0.load(Ordering::Acquire))
    }

    fn store(&self, status: Status) {
        self.0.store(status.pack(), Ordering::Release);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum ResizeState {
    Idle = 0,
    Starting = 1,
    Splitting = 2,
}

/// Bucket occupancy of a single shard.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShardStats {
    pub shard: usize,
    /// Buckets currently in use.
    pub buckets: usize,
    /// Items counted by walking every bucket.
    pub len: usize,
    pub max_bucket_len: usize,
    pub max_bucket_index: usize,
    /// Buckets holding zero, one, two and three items.
    pub histogram: [usize; 4],
    pub mean: f64,
    pub std_dev: f64,
    pub arena: ArenaStats,
}

impl fmt::Display for ShardStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shard {} buckets={} len={} max={}({}) avg={:.3} std={:.3} hist={:?} chunks={} classes={}",
            self.shard,
            self.buckets,
            self.len,
            self.max_bucket_len,
            self.max_bucket_index,
            self.mean,
            self.std_dev,
            self.histogram,
            self.arena.chunks,
            self.arena.size_classes,
        )
    }
}

pub(crate) struct Shard<B> {
    index: usize,
    config: Config,
    table: BucketTable<B>,
    status: StatusWord,
    resize: AtomicU8,
    resize_lock: Mutex<()>,
    len: CachePadded<AtomicUsize>,
    next_resize_at: AtomicUsize,
    verifying: AtomicBool,
    arena: Arc<Arena>,
}

impl<B: Bucket> Shard<B> {
    pub(crate) fn new(index: usize, config: Config) -> Self {
        let capacity = 1usize << config.capacity_bits;

        Self {
            index,
            config,
            table: BucketTable::new(config.capacity_bits),
            status: StatusWord::new(Status::Stable {
                mask: (capacity - 1) as u32,
            }),
            resize: AtomicU8::new(ResizeState::Idle as u8),
            resize_lock: Mutex::new(()),
            len: CachePadded::new(AtomicUsize::new(0)),
            next_resize_at: AtomicUsize::new(resize_threshold(capacity)),
            verifying: AtomicBool::new(false),
            arena: Arc::new(Arena::new(config.concurrent)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Returns the number of buckets, counting the upper half of a table that
    /// is being split.
    pub(crate) fn capacity(&self) -> usize {
        self.status.load().buckets()
    }

    /// Returns the number of items in bucket `index`, or `None` past the last
    /// bucket in use.
    pub(crate) fn bucket_len(&self, index: usize) -> Option<usize> {
        let _guard = self.config.concurrent.then(crossbeam_epoch::pin);
        self.bucket_in_use(index).map(B::len)
    }

    pub(crate) fn item(&self, bucket: usize, item: usize) -> Option<B::Owned> {
        let _guard = self.config.concurrent.then(crossbeam_epoch::pin);
        self.bucket_in_use(bucket)?.item(item).map(|(elem, _)| elem)
    }

    /// Inserts `elem`. Returns `true` if it was not present.
    pub(crate) fn add(&self, elem: &B::Elem, code: u32) -> bool {
        self.wait_for_verification();

        let added = {
            let (home, _guard) = self.lock_home(code);
            self.table.bucket(home).add(&self.arena, elem, code)
        };

        if added {
            self.len.fetch_add(1, Ordering::Relaxed);
            self.try_resize();
        }
        added
    }

    /// Removes `elem`. Returns `true` if it was present.
    pub(crate) fn remove(&self, elem: &B::Elem, code: u32) -> bool {
        let removed = {
            let (home, _guard) = self.lock_home(code);
            self.table.bucket(home).remove(&self.arena, elem, code)
        };

        if removed {
            self.len.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Returns the bucket index and the position inside the bucket of `elem`.
    ///
    /// Takes no lock, except that a concurrent lookup waits on the lock of the
    /// bucket a resize is splitting right now.
    pub(crate) fn find(&self, elem: &B::Elem, code: u32) -> Option<(usize, usize)> {
        let _guard = self.config.concurrent.then(crossbeam_epoch::pin);

        let mut status = self.status.load();
        loop {
            if let found @ Some(_) = self.locate(status, elem, code) {
                return found;
            }

            let current = self.status.load();
            if current == status || !may_have_moved(status, current, code) {
                return None;
            }
            status = current;
        }
    }

    /// Inserts every item of `other`. Returns the number of items that were
    /// not present.
    pub(crate) fn add_all(&self, other: &Self) -> usize {
        let _guard = other.config.concurrent.then(crossbeam_epoch::pin);

        let mut added = 0;
        for index in 0..other.capacity() {
            if let Some(bucket) = other.table.get(index) {
                bucket.for_each(|elem, code| {
                    if self.add(elem, code) {
                        added += 1;
                    }
                });
            }
        }
        added
    }

    /// Lets another thread write to a single-threaded shard.
    pub(crate) fn disown(&mut self) {
        self.arena.disown();
    }

    pub(crate) fn clear(&mut self) {
        self.table.reset(B::clear);
        self.arena.clear();

        let capacity = 1usize << self.config.capacity_bits;
        self.status.store(Status::Stable {
            mask: (capacity - 1) as u32,
        });
        *self.len.get_mut() = 0;
        *self.next_resize_at.get_mut() = resize_threshold(capacity);
        *self.resize.get_mut() = ResizeState::Idle as u8;
    }

    /// Checks that every item sits in the bucket its fingerprint maps to and
    /// that the recorded size matches. Returns the number of items found.
    ///
    /// The result is only meaningful while no other thread mutates the shard.
    pub(crate) fn verify(&self) -> Result<usize, VerifyError> {
        let counted = self.verify_placement()?;
        let recorded = self.len();
        if counted != recorded {
            return Err(VerifyError::CountMismatch {
                shard: self.index,
                recorded,
                counted,
            });
        }
        Ok(counted)
    }

    pub(crate) fn stats(&self) -> ShardStats {
        let _guard = self.config.concurrent.then(crossbeam_epoch::pin);

        let mut stats = ShardStats {
            shard: self.index,
            buckets: self.capacity(),
            arena: self.arena.stats(),
            ..Default::default()
        };

        let mut square = 0usize;
        for index in 0..stats.buckets {
            let Some(bucket) = self.table.get(index) else {
                break;
            };
            let len = bucket.len();
            stats.len += len;
            square += len * len;

            if len > stats.max_bucket_len {
                stats.max_bucket_len = len;
                stats.max_bucket_index = index;
            }
            if let Some(slot) = stats.histogram.get_mut(len) {
                *slot += 1;
            }
        }

        if stats.buckets > 0 {
            let n = stats.buckets as f64;
            stats.mean = stats.len as f64 / n;
            stats.std_dev = (square as f64 / n - stats.mean * stats.mean).max(0.0).sqrt();
        }
        stats
    }
}

// Resizing.
impl<B: Bucket> Shard<B> {
    fn try_resize(&self) {
        if !self.should_resize() {
            return;
        }

        let capacity = {
            let _lock = self.config.concurrent.then(|| self.resize_lock.lock());
            if !self.should_resize() {
                return;
            }
            self.resize
                .store(ResizeState::Starting as u8, Ordering::Release);
            self.status.load().buckets()
        };

        self.table.extend(capacity);
        self.resize
            .store(ResizeState::Splitting as u8, Ordering::Release);

        let mask = (capacity - 1) as u32;
        self.status.store(Status::Splitting { mask, rehashed: -1 });

        let mut duplicates = 0;
        for i in 0..capacity {
            let low = self.table.bucket(i);
            let high = self.table.bucket(i + capacity);
            let _low_guard = self.config.concurrent.then(|| low.lock());
            let _high_guard = self.config.concurrent.then(|| high.lock());

            duplicates += low.split(high, capacity as u32, &self.arena);

            // Published before the locks are released, so that a writer
            // waiting on either bucket sees the new home of its item.
            self.status.store(Status::Splitting {
                mask,
                rehashed: i as i32,
            });
        }

        if duplicates > 0 {
            self.len.fetch_sub(duplicates, Ordering::Relaxed);
        }

        let doubled = capacity * 2;
        {
            let _lock = self.config.concurrent.then(|| self.resize_lock.lock());
            self.status.store(Status::Stable {
                mask: (doubled - 1) as u32,
            });
            self.next_resize_at
                .store(resize_threshold(doubled), Ordering::Relaxed);
            if self.config.verify_after_resize {
                self.verifying.store(true, Ordering::Release);
            }
            self.resize.store(ResizeState::Idle as u8, Ordering::Release);
        }

        log::debug!(
            "shard {} resized from {} to {} buckets ({} items)",
            self.index,
            capacity,
            doubled,
            self.len()
        );

        if self.config.verify_after_resize {
            if let Err(e) = self.verify_placement() {
                log::error!("inconsistent shard after resize: {e}");
            }
            self.verifying.store(false, Ordering::Release);
        }
    }

    fn should_resize(&self) -> bool {
        self.resize.load(Ordering::Acquire) == ResizeState::Idle as u8
            && !self.verifying.load(Ordering::Acquire)
            && self.len() > self.next_resize_at.load(Ordering::Relaxed)
    }

    fn wait_for_verification(&self) {
        if !self.config.concurrent {
            return;
        }
        let backoff = Backoff::new();
        while self.verifying.load(Ordering::Acquire) {
            backoff.snooze();
        }
    }
}

// Internals.
impl<B: Bucket> Shard<B> {
    /// Locks the bucket `code` belongs in, retrying if a split moves that
    /// bucket while this thread waits for its lock.
    fn lock_home(&self, code: u32) -> (usize, Option<SpinLockGuard<'_>>) {
        loop {
            let home = self.status.load().home(code);
            if !self.config.concurrent {
                return (home, None);
            }

            let guard = self.table.bucket(home).lock();
            if self.status.load().home(code) == home {
                return (home, Some(guard));
            }
        }
    }

    fn locate(&self, status: Status, elem: &B::Elem, code: u32) -> Option<(usize, usize)> {
        let (mask, rehashed) = match status {
            Status::Stable { .. } => return self.locate_in(status.home(code), elem, code),
            Status::Splitting { mask, rehashed } => (mask, rehashed as i64),
        };

        let low = (code & mask) as usize;
        if low as i64 <= rehashed {
            return self.locate_in(status.home(code), elem, code);
        }

        // The bucket may be mid-split. Hold its lock so that every item is
        // either still in it or already in its upper half.
        let _guard = (self.config.concurrent && low as i64 == rehashed + 1)
            .then(|| self.table.bucket(low).lock());

        self.locate_in(low, elem, code).or_else(|| {
            if code & (mask + 1) != 0 {
                self.locate_in(low + mask as usize + 1, elem, code)
            } else {
                None
            }
        })
    }

    fn bucket_in_use(&self, index: usize) -> Option<&B> {
        if index < self.capacity() {
            self.table.get(index)
        } else {
            None
        }
    }

    fn locate_in(&self, index: usize, elem: &B::Elem, code: u32) -> Option<(usize, usize)> {
        self.table
            .get(index)?
            .find(elem, code)
            .map(|item| (index, item))
    }

    fn verify_placement(&self) -> Result<usize, VerifyError> {
        let _guard = self.config.concurrent.then(crossbeam_epoch::pin);

        let status = self.status.load();
        let mut counted = 0;
        let mut misplaced = None;

        for index in 0..status.buckets() {
            let Some(bucket) = self.table.get(index) else {
                break;
            };
            bucket.for_each(|_, code| {
                counted += 1;
                let expected = status.home(code);
                if expected != index && misplaced.is_none() {
                    misplaced = Some(VerifyError::Misplaced {
                        shard: self.index,
                        bucket: index,
                        expected,
                        fingerprint: code,
                        mask: status.mask(),
                    });
                }
            });
        }

        match misplaced {
            Some(e) => Err(e),
            None => Ok(counted),
        }
    }
}

fn resize_threshold(capacity: usize) -> usize {
    if capacity >= 1 << MAX_CAPACITY_BITS {
        usize::MAX
    } else {
        (capacity as f64 * LOAD_FACTOR) as usize
    }
}
