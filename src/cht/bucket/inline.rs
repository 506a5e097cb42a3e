use super::Bucket;
use crate::{
    cht::arena::{words_at, Arena},
    common::concurrent::{
        constants::INLINE_ITEMS,
        spin_lock::{SpinLock, SpinLockGuard},
    },
};

use std::{
    fmt::Debug,
    marker::PhantomData,
    ptr::{self, NonNull},
    sync::{
        atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering},
        Arc,
    },
};

const FIRST_OVERFLOW_WORDS: usize = 8;

/// A fixed-width integer that can be stored in a 64-bit word.
pub trait Word: Copy + Default + Eq + Debug + Send + Sync + 'static {
    fn to_bits(self) -> u64;
    fn from_bits(bits: u64) -> Self;
}

macro_rules! impl_word {
    ($($t:ty => $via:ty),* $(,)?) => {
        $(
            impl Word for $t {
                #[inline]
                fn to_bits(self) -> u64 {
                    self as $via as u64
                }

                #[inline]
                fn from_bits(bits: u64) -> Self {
                    bits as $via as $t
                }
            }
        )*
    };
}

impl_word!(i64 => u64, u64 => u64, i32 => u32, u32 => u32);

/// A bucket of integers.
///
/// The first few items live inline next to their fingerprints. The rest go to
/// an overflow buffer from the arena: a length header, then the values, then
/// the fingerprints packed two to a word. The buffer doubles when it fills up
/// and the old one is retired to the arena.
pub struct InlineBucket<T> {
    lock: SpinLock,
    len: AtomicU32,
    values: [AtomicU64; INLINE_ITEMS],
    codes: [AtomicU32; INLINE_ITEMS],
    overflow: AtomicPtr<AtomicU64>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for InlineBucket<T> {
    fn default() -> Self {
        Self {
            lock: SpinLock::new(),
            len: AtomicU32::new(0),
            values: Default::default(),
            codes: Default::default(),
            overflow: AtomicPtr::new(ptr::null_mut()),
            _marker: PhantomData,
        }
    }
}

impl<T: Word> InlineBucket<T> {
    fn overflow(&self) -> Option<Overflow<'_>> {
        let ptr = NonNull::new(self.overflow.load(Ordering::Acquire))?;
        // SAFETY: A published overflow buffer stays mapped until the arena is
        // cleared, which requires exclusive access to the set. A retired one is
        // not recycled while a pinned reader may still hold it.
        Some(Overflow::new(unsafe { words_at(ptr) }))
    }

    /// Calls `f` on every item until it returns `true`, and returns the
    /// position of that item.
    fn scan<F>(&self, mut f: F) -> Option<usize>
    where
        F: FnMut(u64, u32) -> bool,
    {
        let len = self.len.load(Ordering::Acquire) as usize;

        for i in 0..len.min(INLINE_ITEMS) {
            if f(
                self.values[i].load(Ordering::Acquire),
                self.codes[i].load(Ordering::Acquire),
            ) {
                return Some(i);
            }
        }

        if len > INLINE_ITEMS {
            let overflow = self.overflow()?;
            for j in 0..(len - INLINE_ITEMS).min(overflow.capacity) {
                if f(overflow.value(j), overflow.code(j)) {
                    return Some(INLINE_ITEMS + j);
                }
            }
        }

        None
    }

    fn slot(&self, index: usize) -> Option<(u64, u32)> {
        if index < INLINE_ITEMS {
            Some((
                self.values[index].load(Ordering::Acquire),
                self.codes[index].load(Ordering::Acquire),
            ))
        } else {
            let j = index - INLINE_ITEMS;
            self.overflow()
                .filter(|o| j < o.capacity)
                .map(|o| (o.value(j), o.code(j)))
        }
    }

    fn set_slot(&self, index: usize, bits: u64, code: u32) {
        if index < INLINE_ITEMS {
            self.values[index].store(bits, Ordering::Release);
            self.codes[index].store(code, Ordering::Release);
        } else {
            let Some(overflow) = self.overflow() else {
                unreachable!("item {index} is past the inline slots but there is no overflow")
            };
            overflow.set(index - INLINE_ITEMS, bits, code);
        }
    }

    /// Makes room for overflow item `j`, growing the overflow buffer if needed.
    fn reserve(&self, arena: &Arc<Arena>, j: usize) {
        let current = self.overflow();
        if matches!(&current, Some(o) if j < o.capacity) {
            return;
        }

        let words = current
            .as_ref()
            .map_or(FIRST_OVERFLOW_WORDS, |o| o.words.len() * 2);
        let block = arena.allocate(words * 8);
        // SAFETY: The block was just allocated from a live arena.
        let grown = Overflow::new(unsafe { block.words() });

        if let Some(old) = &current {
            for k in 0..j.min(old.capacity) {
                grown.set(k, old.value(k), old.code(k));
            }
        }

        let old = self.overflow.swap(block.as_ptr(), Ordering::AcqRel);
        if let Some(old) = NonNull::new(old) {
            // SAFETY: The old buffer was allocated since the last clear.
            arena.retire(unsafe { arena.block_at(old) });
        }
    }
}

impl<T: Word> Bucket for InlineBucket<T> {
    type Elem = T;
    type Owned = T;

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire) as usize
    }

    fn find(&self, elem: &T, code: u32) -> Option<usize> {
        let bits = elem.to_bits();
        self.scan(|v, c| c == code && v == bits)
    }

    fn add(&self, arena: &Arc<Arena>, elem: &T, code: u32) -> bool {
        if self.find(elem, code).is_some() {
            return false;
        }

        let len = self.len.load(Ordering::Relaxed) as usize;
        if len >= INLINE_ITEMS {
            self.reserve(arena, len - INLINE_ITEMS);
        }
        self.set_slot(len, elem.to_bits(), code);
        self.len.store(len as u32 + 1, Ordering::Release);
        true
    }

    fn remove(&self, _arena: &Arc<Arena>, elem: &T, code: u32) -> bool {
        let Some(index) = self.find(elem, code) else {
            return false;
        };

        let last = self.len.load(Ordering::Relaxed) as usize - 1;
        if index != last {
            if let Some((bits, code)) = self.slot(last) {
                self.set_slot(index, bits, code);
            }
        }
        self.len.store(last as u32, Ordering::Release);
        true
    }

    fn split(&self, target: &Self, split_bit: u32, arena: &Arc<Arena>) -> usize {
        let len = self.len.load(Ordering::Relaxed) as usize;
        let mut kept = 0;
        let mut duplicates = 0;

        for i in 0..len {
            let Some((bits, code)) = self.slot(i) else {
                break;
            };

            if code & split_bit != 0 {
                if !target.add(arena, &T::from_bits(bits), code) {
                    duplicates += 1;
                }
            } else {
                if kept != i {
                    self.set_slot(kept, bits, code);
                }
                kept += 1;
            }
        }

        self.len.store(kept as u32, Ordering::Release);
        duplicates
    }

    fn item(&self, index: usize) -> Option<(T, u32)> {
        if index >= self.len() {
            return None;
        }
        self.slot(index).map(|(bits, code)| (T::from_bits(bits), code))
    }

    fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&T, u32),
    {
        self.scan(|bits, code| {
            f(&T::from_bits(bits), code);
            false
        });
    }

    fn lock(&self) -> SpinLockGuard<'_> {
        self.lock.lock()
    }

    fn clear(&mut self) {
        *self.len.get_mut() = 0;
        *self.overflow.get_mut() = ptr::null_mut();
    }
}

/// A view of an overflow buffer.
struct Overflow<'a> {
    words: &'a [AtomicU64],
    capacity: usize,
}

impl<'a> Overflow<'a> {
    fn new(words: &'a [AtomicU64]) -> Self {
        // Each item takes one value word and half a fingerprint word.
        let capacity = words.len().saturating_sub(1) * 2 / 3;
        Self { words, capacity }
    }

    fn value(&self, j: usize) -> u64 {
        self.words[1 + j].load(Ordering::Acquire)
    }

    fn code(&self, j: usize) -> u32 {
        let (word, shift) = self.code_position(j);
        (self.words[word].load(Ordering::Acquire) >> shift) as u32
    }

    fn set(&self, j: usize, bits: u64, code: u32) {
        self.words[1 + j].store(bits, Ordering::Release);

        let (word, shift) = self.code_position(j);
        let word = &self.words[word];
        let packed = word.load(Ordering::Relaxed) & !(0xffff_ffff << shift);
        word.store(packed | (code as u64) << shift, Ordering::Release);
    }

    fn code_position(&self, j: usize) -> (usize, u32) {
        (1 + self.capacity + j / 2, (j % 2) as u32 * 32)
    }
}
