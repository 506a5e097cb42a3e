/// Items stored directly inside a bucket before an overflow buffer is needed.
pub(crate) const INLINE_ITEMS: usize = 4;

pub(crate) const MIN_CAPACITY_BITS: u32 = 4; // 16 buckets per shard
pub(crate) const DEFAULT_CAPACITY_BITS: u32 = 12;
pub(crate) const MAX_CAPACITY_BITS: u32 = 30; // 1G buckets per shard

pub(crate) const DEFAULT_PARTITION_BITS: u32 = 4;
pub(crate) const MAX_PARTITION_BITS: u32 = 8; // 256 shards

/// A shard starts to resize once its element count exceeds
/// `capacity * LOAD_FACTOR`.
pub(crate) const LOAD_FACTOR: f64 = 2.8;

// 4 MiB
pub(crate) const ARENA_CHUNK_WORDS: usize = 1 << 19;

/// The largest buffer the arena hands out, in bytes.
pub(crate) const ARENA_MAX_ALLOC_SIZE: usize = 1 << 16;

/// Once a size class holds more than this many just-released buffers, the
/// older half becomes eligible for reuse.
pub(crate) const ARENA_HOT_LIST_LIMIT: usize = 1024;

pub(crate) const PACKED_INITIAL_BUFFER_SIZE: usize = 64;

pub(crate) const SPIN_SLEEP_MICROS: u64 = 10;
