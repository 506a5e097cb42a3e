//! Bucket layouts.
//!
//! A bucket holds every item of a shard whose fingerprint, masked by the
//! shard's current mask, equals the bucket's index. Mutations happen under the
//! bucket's spin lock (in concurrent mode) while lookups read the bucket
//! without locking. Every field a lookup touches is therefore an atomic, and a
//! lookup never trusts a length or an offset it has not bounds-checked.

use super::arena::Arena;
use crate::common::concurrent::spin_lock::SpinLockGuard;

use std::sync::Arc;

pub(crate) mod inline;
pub(crate) mod packed;

pub use inline::InlineBucket;
pub use packed::PackedBucket;

pub trait Bucket: Default + Send + Sync + 'static {
    /// The borrowed form of an item, used for lookups and insertions.
    type Elem: ?Sized;
    /// The owned form of an item, returned by cursors.
    type Owned;

    /// Returns the number of items in this bucket.
    fn len(&self) -> usize;

    /// Returns the position of `elem` in this bucket.
    fn find(&self, elem: &Self::Elem, code: u32) -> Option<usize>;

    /// Appends `elem` unless it is already present. Returns `true` if it was
    /// appended.
    ///
    /// The caller must hold this bucket's lock in concurrent mode.
    fn add(&self, arena: &Arc<Arena>, elem: &Self::Elem, code: u32) -> bool;

    /// Removes `elem`, moving the last item into its slot. Returns `true` if
    /// it was present.
    ///
    /// The caller must hold this bucket's lock in concurrent mode.
    fn remove(&self, arena: &Arc<Arena>, elem: &Self::Elem, code: u32) -> bool;

    /// Moves every item whose fingerprint has `split_bit` set into `target`
    /// and compacts the rest. Returns the number of moved items that `target`
    /// already held.
    ///
    /// The caller must hold the locks of both buckets in concurrent mode.
    fn split(&self, target: &Self, split_bit: u32, arena: &Arc<Arena>) -> usize;

    /// Returns a copy of the item at `index` along with its fingerprint.
    fn item(&self, index: usize) -> Option<(Self::Owned, u32)>;

    /// Calls `f` with every item and its fingerprint, in position order.
    fn for_each<F>(&self, f: F)
    where
        F: FnMut(&Self::Elem, u32);

    fn lock(&self) -> SpinLockGuard<'_>;

    /// Forgets every item. Any overflow memory must be reclaimed by clearing
    /// the arena.
    fn clear(&mut self);
}
