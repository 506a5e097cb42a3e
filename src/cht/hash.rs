//! Fingerprint functions.
//!
//! A fingerprint is a 31-bit hash (the top bit is always clear). Its low bits
//! pick the bucket inside a shard, and the bit just above the current mask
//! decides where an item goes when its bucket is split. A second, 15-bit fold
//! of the fingerprint picks the shard.

const FINGERPRINT_MASK: u32 = 0x7fff_ffff;
const SHARD_HASH_MASK: u32 = 0x7fff;

#[inline]
pub(crate) fn mix32(mut v: u32) -> u32 {
    v = v.wrapping_add(v << 13);
    v ^= v >> 7;
    v = v.wrapping_add(v << 3);
    v ^= v >> 17;
    v = v.wrapping_add(v << 5);
    v & FINGERPRINT_MASK
}

#[inline]
pub(crate) fn fingerprint_u64(v: u64) -> u32 {
    mix32((v >> 32) as u32 ^ v as u32)
}

#[inline]
pub(crate) fn fingerprint_u32(v: u32) -> u32 {
    mix32(v)
}

/// Hashes a byte string four bytes at a time, then folds in the trailing
/// bytes of the last eight-byte word.
pub(crate) fn fingerprint_bytes(data: &[u8]) -> u32 {
    let mut h = data.len() as u32;

    for word in data.chunks_exact(4) {
        h ^= u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        h = h.wrapping_add(h << 5);
    }

    let tail = data[data.len() & !7..]
        .iter()
        .fold(0u32, |t, &b| (t << 8) | b as u32);

    mix32(h ^ tail)
}

/// The secondary hash used to select a shard.
#[inline]
pub(crate) fn shard_hash(fingerprint: u32) -> u32 {
    let mut v = fingerprint.wrapping_add(fingerprint << 13);
    v ^= v >> 7;
    ((v >> 16) ^ v) & SHARD_HASH_MASK
}
