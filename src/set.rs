//! Provides a sharded hash set for integers and byte strings.
//!
//! A [`HashSet`] is split into a fixed number of shards. Every shard is an
//! independent hash table with its own buckets, its own buffer arena and its
//! own resize state, so that a resize never stops the world: it only touches
//! one shard, one bucket at a time.

mod builder;
mod cursor;
mod hash_set;

pub use builder::SetBuilder;
pub use cursor::{Cursor, Iter};
pub use hash_set::{BytesSet, HashSet, IntSet};
