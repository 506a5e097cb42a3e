use super::HashSet;
use crate::{
    common::builder_utils::{clamp_capacity_bits, clamp_partition_bits, Config},
    Element,
};

use std::{fmt, marker::PhantomData};

/// Builds a [`HashSet`][hash-set] with various configuration knobs.
///
/// [hash-set]: ./struct.HashSet.html
///
/// # Examples
///
/// ```rust
/// use fastset::{BytesSet, SetBuilder};
///
/// let set: BytesSet = SetBuilder::new()
///     // Safe to share between threads.
///     .concurrent(true)
///     // 2^6 = 64 shards.
///     .partition_bits(6)
///     // 2^10 = 1024 initial buckets per shard.
///     .capacity_bits(10)
///     .build();
///
/// assert!(set.add(b"hello"));
/// assert!(set.contains(b"hello"));
/// assert_eq!(set.shard_count(), 64);
/// ```
///
pub struct SetBuilder<C> {
    config: Config,
    set_type: PhantomData<C>,
}

impl<C> fmt::Debug for SetBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetBuilder")
            .field("concurrent", &self.config.concurrent)
            .field("partition_bits", &self.config.partition_bits)
            .field("capacity_bits", &self.config.capacity_bits)
            .field("verify_after_resize", &self.config.verify_after_resize)
            .field("stats_on_clear", &self.config.stats_on_clear)
            .finish()
    }
}

impl<E: Element + ?Sized> Default for SetBuilder<HashSet<E>> {
    fn default() -> Self {
        Self {
            config: Config::default(),
            set_type: PhantomData,
        }
    }
}

impl<E: Element + ?Sized> SetBuilder<HashSet<E>> {
    /// Constructs a new `SetBuilder` with the defaults: single-threaded, 16
    /// shards and 4096 initial buckets per shard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether the set may be shared between threads.
    pub fn concurrent(self, concurrent: bool) -> Self {
        Self {
            config: Config {
                concurrent,
                ..self.config
            },
            ..self
        }
    }

    /// Sets the number of shards to `2^bits`. Values above 8 are treated
    /// as 8.
    pub fn partition_bits(self, bits: u32) -> Self {
        Self {
            config: Config {
                partition_bits: clamp_partition_bits(bits),
                ..self.config
            },
            ..self
        }
    }

    /// Sets the initial number of buckets per shard to `2^bits`. Values outside
    /// `4..=30` fall back to the default of 12.
    pub fn capacity_bits(self, bits: u32) -> Self {
        Self {
            config: Config {
                capacity_bits: clamp_capacity_bits(bits),
                ..self.config
            },
            ..self
        }
    }

    /// Makes every resize check the consistency of its shard afterwards and
    /// log an error if it finds a misplaced element. Writers to that shard wait
    /// for the check to finish.
    pub fn verify_after_resize(self, enabled: bool) -> Self {
        Self {
            config: Config {
                verify_after_resize: enabled,
                ..self.config
            },
            ..self
        }
    }

    /// Makes [`HashSet::clear`] log bucket occupancy statistics before it
    /// removes the elements.
    pub fn stats_on_clear(self, enabled: bool) -> Self {
        Self {
            config: Config {
                stats_on_clear: enabled,
                ..self.config
            },
            ..self
        }
    }

    /// Builds a `HashSet<E>`.
    pub fn build(self) -> HashSet<E> {
        HashSet::with_config(self.config)
    }
}
