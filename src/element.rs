use crate::cht::{
    bucket::{Bucket, InlineBucket, PackedBucket},
    hash,
};

use std::{borrow::Borrow, fmt::Debug};

/// A type that can be stored in a [`HashSet`][hash-set].
///
/// Implemented for `i32`, `u32`, `i64`, `u64` and `[u8]`. Integers are stored
/// inline in their buckets; byte strings are packed into per-bucket buffers.
/// This trait is sealed and cannot be implemented outside this crate.
///
/// [hash-set]: ./struct.HashSet.html
pub trait Element: sealed::Sealed {
    #[doc(hidden)]
    type Bucket: Bucket<Elem = Self, Owned = Self::Owned>;

    /// The owned form returned by cursors and iterators.
    type Owned: Borrow<Self> + Default + Clone + Debug + Send + Sync + 'static;

    /// Returns the 31-bit fingerprint used to place this element.
    fn fingerprint(&self) -> u32;
}

mod sealed {
    pub trait Sealed {}
}

macro_rules! impl_element_for_ints {
    ($($t:ty => $fingerprint:expr),* $(,)?) => {
        $(
            impl sealed::Sealed for $t {}

            impl Element for $t {
                type Bucket = InlineBucket<$t>;
                type Owned = $t;

                #[inline]
                fn fingerprint(&self) -> u32 {
                    ($fingerprint)(*self)
                }
            }
        )*
    };
}

impl_element_for_ints!(
    i64 => |v: i64| hash::fingerprint_u64(v as u64),
    u64 => hash::fingerprint_u64,
    i32 => |v: i32| hash::fingerprint_u32(v as u32),
    u32 => hash::fingerprint_u32,
);

impl sealed::Sealed for [u8] {}

impl Element for [u8] {
    type Bucket = PackedBucket;
    type Owned = Vec<u8>;

    #[inline]
    fn fingerprint(&self) -> u32 {
        hash::fingerprint_bytes(self)
    }
}
