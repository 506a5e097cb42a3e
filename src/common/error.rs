/// The error type returned by [`HashSet::verify`][verify].
///
/// Verification walks every shard of a set and checks that each item sits in
/// the bucket its fingerprint maps to, and that the live count each shard keeps
/// matches the items actually stored.
///
/// [verify]: ./struct.HashSet.html#method.verify
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// An item's fingerprint, masked by the shard's current mask, does not match
    /// the index of the bucket holding it.
    #[error(
        "shard {shard}: fingerprint {fingerprint:#x} is stored in bucket {bucket:#x} \
    but maps to bucket {expected:#x} under mask {mask:#x}"
    )]
    Misplaced {
        shard: usize,
        bucket: usize,
        expected: usize,
        fingerprint: u32,
        mask: u32,
    },

    /// The number of items found in a shard differs from its recorded count.
    #[error("shard {shard}: recorded size is {recorded} but {counted} items were found")]
    CountMismatch {
        shard: usize,
        recorded: usize,
        counted: usize,
    },
}
