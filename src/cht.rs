//! Incrementally resizing hash tables with per-bucket locks.
//!
//! The tables in this module are, at their core, chained hash tables whose
//! chains are small arrays. Each bucket stores a handful of items inline and
//! spills the rest into a buffer carved out of the shard's arena. An item is
//! stored next to its 31-bit fingerprint, and the low bits of the fingerprint
//! select the bucket.
//!
//! The key insight into making the table resizable without stopping the world
//! is that doubling a table whose size is a power of two only ever moves an
//! item from bucket `i` to bucket `i + capacity`, depending on a single bit of
//! its fingerprint. A resize can therefore proceed one bucket pair at a time,
//! and a single counter, the index of the last bucket that has been split, is
//! enough to tell every other thread where an item lives. That counter and the
//! mask are published together in one atomic word.
//!
//! Writers lock the bucket they modify. Readers do not lock. Instead, every
//! field a reader looks at is an atomic, and buffers that a writer replaces
//! are handed back to the arena only after every pinned reader has moved on
//! (see `crossbeam_epoch`). Bucket storage itself is allocated in chunks that
//! are never moved or freed while the table is in use, so a reference to a
//! bucket stays valid across resizes.
//!
//! The split protocol follows the linear hashing family of algorithms
//! described by Witold Litwin in [Linear hashing: A new tool for file and
//! table addressing][litwin], applied to a table that always doubles as a
//! whole.
//!
//! [litwin]: https://dl.acm.org/doi/10.5555/1286887.1286983

pub(crate) mod arena;
pub(crate) mod bucket;
pub(crate) mod hash;
pub(crate) mod shard;
pub(crate) mod table;

#[cfg(test)]
#[macro_use]
pub(crate) mod test_util;
