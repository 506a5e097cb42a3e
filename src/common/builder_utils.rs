use super::concurrent::constants::{
    DEFAULT_CAPACITY_BITS, DEFAULT_PARTITION_BITS, MAX_CAPACITY_BITS, MAX_PARTITION_BITS,
    MIN_CAPACITY_BITS,
};

/// Construction-time settings shared by a set and all of its shards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Config {
    pub(crate) concurrent: bool,
    pub(crate) partition_bits: u32,
    pub(crate) capacity_bits: u32,
    pub(crate) verify_after_resize: bool,
    pub(crate) stats_on_clear: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrent: false,
            partition_bits: DEFAULT_PARTITION_BITS,
            capacity_bits: DEFAULT_CAPACITY_BITS,
            verify_after_resize: false,
            stats_on_clear: false,
        }
    }
}

impl Config {
    pub(crate) fn new(concurrent: bool, partition_bits: u32, capacity_bits: u32) -> Self {
        Self {
            concurrent,
            partition_bits: clamp_partition_bits(partition_bits),
            capacity_bits: clamp_capacity_bits(capacity_bits),
            ..Self::default()
        }
    }
}

/// More than 256 shards is never useful, so larger values are capped.
pub(crate) fn clamp_partition_bits(bits: u32) -> u32 {
    bits.min(MAX_PARTITION_BITS)
}

/// Out-of-range initial capacities fall back to the default rather than to
/// the nearest bound.
pub(crate) fn clamp_capacity_bits(bits: u32) -> u32 {
    if (MIN_CAPACITY_BITS..=MAX_CAPACITY_BITS).contains(&bits) {
        bits
    } else {
        DEFAULT_CAPACITY_BITS
    }
}
