//! A chunked bump allocator for bucket overflow buffers.
//!
//! Buffers are carved out of large, zero-initialized chunks of 64-bit atomic
//! words and are never returned to the system allocator individually. A
//! released buffer goes to the "hot" list of its power-of-two size class; once
//! that list grows past [`ARENA_HOT_LIST_LIMIT`], its older half moves to the
//! "cool" list, and only cool buffers are handed out again. This delays reuse
//! of a buffer that a lock-free reader may still be scanning.
//!
//! In concurrent mode a buffer retired by a writer does not even reach the hot
//! list until every thread that was pinned (see `crossbeam_epoch`) at the time
//! of retirement has unpinned.
//!
//! The first word of every buffer holds its length in words. The arena writes
//! it and nothing else may.
//!
//! A single-threaded arena takes no locks. It belongs to the first thread that
//! uses it, until the next `clear`, and panics if another thread touches it in
//! the meantime.
//!
//! Every `clear` bumps the arena's generation. A retirement that is still
//! queued in the epoch collector when the arena is cleared carries the old
//! generation and is dropped instead of being recycled, because the chunk it
//! points into no longer exists.

use crate::common::concurrent::constants::{
    ARENA_CHUNK_WORDS, ARENA_HOT_LIST_LIMIT, ARENA_MAX_ALLOC_SIZE,
};

use std::{
    alloc::{self, Layout},
    mem,
    ptr::{self, NonNull},
    slice,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

const WORD: usize = mem::size_of::<u64>();
const NUM_SIZE_CLASSES: usize = (ARENA_MAX_ALLOC_SIZE / WORD).trailing_zeros() as usize + 1;

/// A buffer handed out by an [`Arena`].
#[derive(Debug)]
pub(crate) struct Block {
    ptr: NonNull<AtomicU64>,
    generation: u64,
}

// SAFETY: A block is an address inside a chunk owned by an `Arc<Arena>`. It is
// only dereferenced through atomic operations.
unsafe impl Send for Block {}

impl Block {
    pub(crate) fn as_ptr(&self) -> *mut AtomicU64 {
        self.ptr.as_ptr()
    }

    /// Returns the words of this block, including the length header.
    ///
    /// # Safety
    ///
    /// The arena that allocated this block must not have been cleared or
    /// dropped.
    pub(crate) unsafe fn words<'a>(&self) -> &'a [AtomicU64] {
        words_at(self.ptr)
    }
}

/// Returns the words of the block starting at `ptr`, including the length
/// header.
///
/// # Safety
///
/// `ptr` must have been returned by [`Block::as_ptr`] for a block of an arena
/// that has not been cleared or dropped since.
pub(crate) unsafe fn words_at<'a>(ptr: NonNull<AtomicU64>) -> &'a [AtomicU64] {
    let len = ptr.as_ref().load(Ordering::Relaxed) as usize;
    slice::from_raw_parts(ptr.as_ptr(), len)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Chunks obtained from the system allocator.
    pub chunks: usize,
    /// Size classes currently holding released buffers.
    pub size_classes: usize,
}

pub struct Arena {
    concurrent: bool,
    generation: AtomicU64,
    /// The thread that may use a single-threaded arena, or zero if none has yet.
    owner: AtomicUsize,
    chunks: Mutex<ChunkList>,
    classes: Box<[Mutex<SizeClass>]>,
}

impl Arena {
    pub(crate) fn new(concurrent: bool) -> Self {
        Self {
            concurrent,
            generation: AtomicU64::new(0),
            owner: AtomicUsize::new(0),
            chunks: Mutex::new(ChunkList::default()),
            classes: (0..NUM_SIZE_CLASSES)
                .map(|_| Mutex::new(SizeClass::default()))
                .collect(),
        }
    }

    /// Returns a buffer of at least `size` bytes, header word included.
    ///
    /// # Panics
    ///
    /// Panics if `size` is larger than 64 KiB.
    pub(crate) fn allocate(&self, size: usize) -> Block {
        assert!(
            size <= ARENA_MAX_ALLOC_SIZE,
            "cannot allocate {size} bytes from an arena (max {ARENA_MAX_ALLOC_SIZE})"
        );

        let words = class_words(size);
        let generation = self.generation.load(Ordering::Acquire);

        let recycled = self.with(&self.classes[class_index(words)], |class| class.cool.pop());
        let ptr = match recycled {
            Some(BlockPtr(ptr)) => ptr,
            None => self.with(&self.chunks, |chunks| chunks.bump(words)),
        };

        // SAFETY: `ptr` points at `words` words inside a live chunk.
        unsafe { ptr.as_ref() }.store(words as u64, Ordering::Relaxed);

        Block { ptr, generation }
    }

    /// Rebuilds the block starting at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must come from a block allocated since the last `clear`.
    pub(crate) unsafe fn block_at(&self, ptr: NonNull<AtomicU64>) -> Block {
        Block {
            ptr,
            generation: self.generation.load(Ordering::Acquire),
        }
    }

    /// Hands `block` back to its size class's hot list.
    pub(crate) fn release(&self, block: Block) {
        // `clear` bumps the generation under the chunk lock and empties the
        // free lists before releasing it. Holding the chunk lock until the
        // block is pushed keeps a stale block out of the new lists.
        self.with(&self.chunks, |_| {
            if block.generation != self.generation.load(Ordering::Acquire) {
                return;
            }
            // SAFETY: The generation matches, so the chunk is still alive.
            let words = unsafe { block.words() }.len();
            debug_assert!(words.is_power_of_two());

            self.with(&self.classes[class_index(words)], |class| {
                let SizeClass { hot, cool } = class;
                hot.push(BlockPtr(block.ptr));

                if hot.len() > ARENA_HOT_LIST_LIMIT {
                    let aged = hot.len() / 2;
                    cool.extend(hot.drain(..aged));
                }
            });
        });
    }

    /// Releases `block` once no thread can still be reading it.
    ///
    /// In single-threaded mode there are no concurrent readers and the block
    /// goes straight to the hot list.
    pub(crate) fn retire(self: &Arc<Self>, block: Block) {
        if self.concurrent {
            let guard = crossbeam_epoch::pin();
            let arena = Arc::clone(self);
            guard.defer(move || arena.release(block));
        } else {
            self.release(block);
        }
    }

    /// Drops every chunk and forgets every released buffer. A single-threaded
    /// arena is free to be claimed by another thread afterwards.
    ///
    /// Callers must have exclusive access to the set, and must make sure no
    /// block handed out before this call is still referenced, except by
    /// pending retirements.
    pub(crate) fn clear(&self) {
        self.disown();
        self.with(&self.chunks, |chunks| {
            self.generation.fetch_add(1, Ordering::AcqRel);

            for class in self.classes.iter() {
                self.with(class, |class| {
                    class.hot.clear();
                    class.cool.clear();
                });
            }

            *chunks = ChunkList::default();
        });
        self.disown();
    }

    /// Lets any thread claim a single-threaded arena. Callers must have
    /// exclusive access to the set.
    pub(crate) fn disown(&self) {
        self.owner.store(0, Ordering::Release);
    }

    pub(crate) fn stats(&self) -> ArenaStats {
        let chunks = self.with(&self.chunks, |chunks| chunks.list.len());
        let size_classes = self
            .classes
            .iter()
            .filter(|class| self.with(class, |c| !c.hot.is_empty() || !c.cool.is_empty()))
            .count();

        ArenaStats {
            chunks,
            size_classes,
        }
    }

    /// Runs `f` on the contents of `mutex`, locking it only in concurrent
    /// mode. `f` must not reach the same mutex again.
    fn with<T, R>(&self, mutex: &Mutex<T>, f: impl FnOnce(&mut T) -> R) -> R {
        if self.concurrent {
            return f(&mut mutex.lock());
        }

        self.claim();
        // SAFETY: Only the owning thread gets here, and it does not re-enter
        // this mutex, so this is the only reference to its contents.
        f(unsafe { &mut *mutex.data_ptr() })
    }

    /// Makes the current thread the owner of a single-threaded arena.
    ///
    /// # Panics
    ///
    /// Panics if another thread owns it.
    fn claim(&self) {
        let me = thread_token();
        let owner = self.owner.load(Ordering::Relaxed);
        if owner == me {
            return;
        }
        let claimed = owner == 0
            && self
                .owner
                .compare_exchange(0, me, Ordering::Acquire, Ordering::Relaxed)
                .is_ok();
        assert!(
            claimed,
            "a single-threaded set was written from two threads; build it with `concurrent(true)` to share it"
        );
    }
}

/// Returns a non-zero number that no other thread of this process ever gets.
fn thread_token() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(1);

    thread_local! {
        static TOKEN: usize = NEXT.fetch_add(1, Ordering::Relaxed);
    }

    TOKEN.with(|token| *token)
}

#[derive(Default)]
struct ChunkList {
    list: Vec<Box<[AtomicU64]>>,
    used: usize,
}

impl ChunkList {
    fn bump(&mut self, words: usize) -> NonNull<AtomicU64> {
        if self.list.is_empty() || self.used + words > ARENA_CHUNK_WORDS {
            self.list.push(zeroed_words(ARENA_CHUNK_WORDS));
            self.used = 0;
            log::trace!("arena chunk #{} allocated", self.list.len());
        }

        let chunk = &self.list[self.list.len() - 1];
        // SAFETY: `used + words` is within the chunk, so the pointer is in
        // bounds and non-null.
        let ptr = unsafe { NonNull::new_unchecked(chunk.as_ptr().add(self.used) as *mut AtomicU64) };
        self.used += words;
        ptr
    }
}

#[derive(Default)]
struct SizeClass {
    hot: Vec<BlockPtr>,
    cool: Vec<BlockPtr>,
}

struct BlockPtr(NonNull<AtomicU64>);

// SAFETY: See `Block`.
unsafe impl Send for BlockPtr {}

fn class_words(size: usize) -> usize {
    ((size + WORD - 1) / WORD).max(1).next_power_of_two()
}

fn class_index(words: usize) -> usize {
    words.trailing_zeros() as usize
}

fn zeroed_words(len: usize) -> Box<[AtomicU64]> {
    let Ok(layout) = Layout::array::<AtomicU64>(len) else {
        panic!("an arena chunk of {len} words does not fit in memory");
    };

    // SAFETY: `layout` has a non-zero size. All-zero bytes are a valid
    // `AtomicU64`, and the allocation matches what `Box<[AtomicU64]>` frees.
    unsafe {
        let ptr = alloc::alloc_zeroed(layout) as *mut AtomicU64;
        if ptr.is_null() {
            alloc::handle_alloc_error(layout);
        }
        Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len))
    }
}
