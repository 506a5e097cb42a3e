use super::Bucket;
use crate::{
    cht::arena::{words_at, Arena, Block},
    common::concurrent::{
        constants::{ARENA_MAX_ALLOC_SIZE, PACKED_INITIAL_BUFFER_SIZE},
        spin_lock::{SpinLock, SpinLockGuard},
    },
};

use std::{
    ptr::{self, NonNull},
    sync::{
        atomic::{AtomicPtr, AtomicU64, Ordering},
        Arc,
    },
};

use smallvec::SmallVec;

const WORD: usize = 8;

// Header, state and one metadata word.
const RESERVED_WORDS: usize = 3;

/// The longest byte string a bucket can hold.
pub(crate) const MAX_ELEMENT_LEN: usize = ARENA_MAX_ALLOC_SIZE - RESERVED_WORDS * WORD;

type Bytes = SmallVec<[u8; 64]>;

/// A bucket of byte strings packed into a single arena buffer.
///
/// ```text
/// word 0      length header (arena)
/// word 1      item count | used payload words << 32
/// word 2..    one metadata word per item:
///             fingerprint | byte length << 32 | payload offset << 48
/// ...         free
/// tail        payloads, zero-padded to whole words
/// ```
///
/// Payload offsets count words back from the end of the buffer, so the
/// metadata grows up and the payloads grow down. A full buffer is copied as
/// it is into one twice its size, where every offset still holds. Removal
/// moves the last metadata word into the freed slot and leaves a hole in the
/// payload area, which is squeezed out the next time the buffer fills up or
/// splits.
pub struct PackedBucket {
    lock: SpinLock,
    buffer: AtomicPtr<AtomicU64>,
}

impl Default for PackedBucket {
    fn default() -> Self {
        Self {
            lock: SpinLock::new(),
            buffer: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

impl PackedBucket {
    fn buffer(&self) -> Option<Buffer<'_>> {
        let ptr = NonNull::new(self.buffer.load(Ordering::Acquire))?;
        // SAFETY: See `InlineBucket::overflow`.
        Some(Buffer {
            words: unsafe { words_at(ptr) },
        })
    }

    /// Returns a new buffer holding every item of the current one, with
    /// room for `extra` more words of payload and metadata.
    fn grow(&self, arena: &Arena, extra: usize) -> Block {
        let Some(buffer) = self.buffer() else {
            let block = arena.allocate(buffer_words(2 + extra, 0) * WORD);
            // SAFETY: The block was just allocated from a live arena.
            unsafe { Buffer::of(&block) }.set_state(0, 0);
            return block;
        };

        let (count, used) = buffer.state();
        let len = buffer.words.len();
        let compacted = 2 + count + buffer.live_words() + extra;
        let grown = buffer_words(2 + count + used + extra, len);
        let (size, compact) = if compacted <= len {
            (len, true)
        } else if grown * WORD <= ARENA_MAX_ALLOC_SIZE {
            (grown, false)
        } else {
            (buffer_words(compacted, 0), true)
        };

        let block = arena.allocate(size * WORD);
        // SAFETY: The block was just allocated from a live arena.
        let fresh = unsafe { Buffer::of(&block) };
        if compact {
            buffer.compact_into(&fresh, |_| true);
        } else {
            buffer.copy_into(&fresh);
        }
        block
    }

    /// Publishes `block` as the buffer and retires the one it replaces.
    fn install(&self, arena: &Arc<Arena>, block: Block) {
        let old = self.buffer.swap(block.as_ptr(), Ordering::AcqRel);
        if let Some(old) = NonNull::new(old) {
            // SAFETY: The old buffer was allocated since the last clear.
            arena.retire(unsafe { arena.block_at(old) });
        }
    }
}

impl Bucket for PackedBucket {
    type Elem = [u8];
    type Owned = Vec<u8>;

    fn len(&self) -> usize {
        self.buffer().map_or(0, |b| b.state().0)
    }

    fn find(&self, elem: &[u8], code: u32) -> Option<usize> {
        let buffer = self.buffer()?;
        let (count, _) = buffer.state();
        (0..count).find(|&i| {
            buffer
                .meta(i)
                .map_or(false, |meta| meta.code == code && buffer.matches(meta, elem))
        })
    }

    fn add(&self, arena: &Arc<Arena>, elem: &[u8], code: u32) -> bool {
        assert!(
            elem.len() <= MAX_ELEMENT_LEN,
            "a byte string of {} bytes is longer than the {MAX_ELEMENT_LEN} bytes a bucket can hold",
            elem.len()
        );

        if self.find(elem, code).is_some() {
            return false;
        }

        if let Some(buffer) = self.buffer() {
            if buffer.append(elem, code) {
                return true;
            }
        }

        let block = self.grow(arena, 1 + payload_words(elem.len()));
        // SAFETY: The block was just allocated from a live arena.
        let appended = unsafe { Buffer::of(&block) }.append(elem, code);
        debug_assert!(appended);
        self.install(arena, block);
        true
    }

    fn remove(&self, _arena: &Arc<Arena>, elem: &[u8], code: u32) -> bool {
        let Some(index) = self.find(elem, code) else {
            return false;
        };
        let Some(buffer) = self.buffer() else {
            return false;
        };

        let (count, used) = buffer.state();
        let last = count - 1;
        if index != last {
            let moved = buffer.meta_word(last).load(Ordering::Acquire);
            buffer.meta_word(index).store(moved, Ordering::Release);
        }
        buffer.set_state(last, used);
        true
    }

    fn split(&self, target: &Self, split_bit: u32, arena: &Arc<Arena>) -> usize {
        let Some(buffer) = self.buffer() else {
            return 0;
        };

        let mut moved = 0;
        let mut duplicates = 0;
        for meta in buffer.metas().filter(|meta| meta.code & split_bit != 0) {
            moved += 1;
            if let Some(data) = buffer.read(meta) {
                if !target.add(arena, &data, meta.code) {
                    duplicates += 1;
                }
            }
        }

        if moved > 0 {
            let block = arena.allocate(buffer.words.len() * WORD);
            // SAFETY: The block was just allocated from a live arena.
            let fresh = unsafe { Buffer::of(&block) };
            buffer.compact_into(&fresh, |code| code & split_bit == 0);
            self.install(arena, block);
        }
        duplicates
    }

    fn item(&self, index: usize) -> Option<(Vec<u8>, u32)> {
        let buffer = self.buffer()?;
        if index >= buffer.state().0 {
            return None;
        }
        let meta = buffer.meta(index)?;
        buffer.read(meta).map(|data| (data.into_vec(), meta.code))
    }

    fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&[u8], u32),
    {
        if let Some(buffer) = self.buffer() {
            for meta in buffer.metas() {
                if let Some(data) = buffer.read(meta) {
                    f(&data, meta.code);
                }
            }
        }
    }

    fn lock(&self) -> SpinLockGuard<'_> {
        self.lock.lock()
    }

    fn clear(&mut self) {
        *self.buffer.get_mut() = ptr::null_mut();
    }
}

#[derive(Clone, Copy, Debug)]
struct Meta {
    code: u32,
    len: usize,
    offset: usize,
}

impl Meta {
    fn pack(self) -> u64 {
        self.code as u64 | (self.len as u64) << 32 | (self.offset as u64) << 48
    }
}

/// A view of a bucket buffer. Reads are bounds-checked so that a reader
/// racing with a writer sees a miss, never a panic.
struct Buffer<'a> {
    words: &'a [AtomicU64],
}

impl<'a> Buffer<'a> {
    /// # Safety
    ///
    /// The arena that allocated `block` must not have been cleared or dropped.
    unsafe fn of(block: &Block) -> Self {
        Self {
            words: block.words(),
        }
    }

    fn state(&self) -> (usize, usize) {
        let state = self.words[1].load(Ordering::Acquire);
        ((state & 0xffff_ffff) as usize, (state >> 32) as usize)
    }

    fn set_state(&self, count: usize, used: usize) {
        self.words[1].store(count as u64 | (used as u64) << 32, Ordering::Release);
    }

    fn meta_word(&self, index: usize) -> &AtomicU64 {
        &self.words[2 + index]
    }

    fn meta(&self, index: usize) -> Option<Meta> {
        let word = self.words.get(2 + index)?.load(Ordering::Acquire);
        Some(Meta {
            code: word as u32,
            len: (word >> 32) as u16 as usize,
            offset: (word >> 48) as usize,
        })
    }

    fn payload(&self, meta: Meta) -> Option<&[AtomicU64]> {
        let start = self.words.len().checked_sub(meta.offset)?;
        self.words.get(start..start + payload_words(meta.len))
    }

    fn matches(&self, meta: Meta, data: &[u8]) -> bool {
        if meta.len != data.len() {
            return false;
        }
        let Some(payload) = self.payload(meta) else {
            return false;
        };
        data.chunks(WORD)
            .zip(payload)
            .all(|(chunk, word)| pack(chunk) == word.load(Ordering::Acquire))
    }

    fn read(&self, meta: Meta) -> Option<Bytes> {
        let payload = self.payload(meta)?;
        let mut data = Bytes::with_capacity(payload.len() * WORD);
        for word in payload {
            data.extend_from_slice(&word.load(Ordering::Acquire).to_le_bytes());
        }
        data.truncate(meta.len);
        Some(data)
    }

    fn metas(&self) -> impl Iterator<Item = Meta> + '_ {
        let (count, _) = self.state();
        (0..count).filter_map(move |i| self.meta(i))
    }

    /// Payload words still referenced by an item.
    fn live_words(&self) -> usize {
        self.metas().map(|meta| payload_words(meta.len)).sum()
    }

    /// Copies the metadata and the payload area into `fresh` word for word.
    /// Offsets count from the end, so they stay valid in a larger buffer.
    fn copy_into(&self, fresh: &Buffer<'_>) {
        let (count, used) = self.state();
        for (src, dst) in self.words[2..2 + count].iter().zip(&fresh.words[2..]) {
            dst.store(src.load(Ordering::Acquire), Ordering::Relaxed);
        }
        let tail = self.words.len() - used;
        let fresh_tail = fresh.words.len() - used;
        for (src, dst) in self.words[tail..].iter().zip(&fresh.words[fresh_tail..]) {
            dst.store(src.load(Ordering::Acquire), Ordering::Relaxed);
        }
        fresh.set_state(count, used);
    }

    /// Copies the items whose fingerprint passes `keep` into `fresh`, with
    /// their payloads packed against the end of the buffer.
    fn compact_into(&self, fresh: &Buffer<'_>, keep: impl Fn(u32) -> bool) {
        let mut kept = 0;
        let mut used = 0;
        for meta in self.metas().filter(|meta| keep(meta.code)) {
            let Some(payload) = self.payload(meta) else {
                continue;
            };
            used += payload.len();
            let start = fresh.words.len() - used;
            for (src, dst) in payload.iter().zip(&fresh.words[start..]) {
                dst.store(src.load(Ordering::Acquire), Ordering::Relaxed);
            }
            let moved = Meta {
                offset: used,
                ..meta
            };
            fresh.meta_word(kept).store(moved.pack(), Ordering::Relaxed);
            kept += 1;
        }
        fresh.set_state(kept, used);
    }

    /// Appends an item if there is room for it, publishing it last.
    fn append(&self, data: &[u8], code: u32) -> bool {
        let (count, used) = self.state();
        let words = payload_words(data.len());
        if 2 + count + 1 + used + words > self.words.len() {
            return false;
        }

        let offset = used + words;
        let start = self.words.len() - offset;
        for (chunk, word) in data.chunks(WORD).zip(&self.words[start..]) {
            word.store(pack(chunk), Ordering::Release);
        }

        let meta = Meta {
            code,
            len: data.len(),
            offset,
        };
        self.meta_word(count).store(meta.pack(), Ordering::Release);
        self.set_state(count + 1, offset);
        true
    }
}

fn payload_words(len: usize) -> usize {
    (len + WORD - 1) / WORD
}

/// Size in words of a buffer for `needed` words that replaces one of
/// `current` words.
fn buffer_words(needed: usize, current: usize) -> usize {
    (needed * WORD)
        .next_power_of_two()
        .max(current * 2 * WORD)
        .max(PACKED_INITIAL_BUFFER_SIZE)
        / WORD
}

fn pack(chunk: &[u8]) -> u64 {
    let mut bytes = [0u8; WORD];
    bytes[..chunk.len()].copy_from_slice(chunk);
    u64::from_le_bytes(bytes)
}
