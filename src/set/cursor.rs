use super::HashSet;
use crate::Element;

use std::{fmt, iter::FusedIterator, ptr};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Position {
    pub(crate) shard: usize,
    pub(crate) bucket: usize,
    pub(crate) item: usize,
}

/// A position in a [`HashSet`][hash-set].
///
/// Elements are visited shard by shard, bucket by bucket, and in insertion
/// order inside a bucket. A cursor that has run past the last element is at
/// the end and stays there.
///
/// A cursor does not lock anything. Elements inserted or removed while it is
/// in use may or may not be visited, and a bucket split may move elements
/// behind it.
///
/// `Cursor` is also an [`Iterator`] whose `next` returns the current element
/// and then advances.
///
/// # Examples
///
/// ```rust
/// use fastset::IntSet;
///
/// let set = IntSet::<i64>::new(false);
/// set.add(&1);
///
/// let mut cursor = set.cursor();
/// assert!(cursor.is_valid());
/// assert!(!cursor.has_next());
/// assert_eq!(cursor.next(), Some(1));
/// assert!(!cursor.is_valid());
/// assert_eq!(cursor.get(), 0);
/// ```
///
/// [hash-set]: ./struct.HashSet.html
pub struct Cursor<'a, E: Element + ?Sized> {
    set: &'a HashSet<E>,
    position: Option<Position>,
}

impl<'a, E: Element + ?Sized> Cursor<'a, E> {
    pub(crate) fn new(set: &'a HashSet<E>, position: Option<Position>) -> Self {
        Self { set, position }
    }

    pub(crate) fn begin(set: &'a HashSet<E>) -> Self {
        let position = seek(
            set,
            Position {
                shard: 0,
                bucket: 0,
                item: 0,
            },
        );
        Self::new(set, position)
    }

    /// Returns `true` if the cursor points at an element.
    pub fn is_valid(&self) -> bool {
        self.position.map_or(false, |p| {
            self.set
                .shard(p.shard)
                .and_then(|shard| shard.bucket_len(p.bucket))
                .map_or(false, |len| p.item < len)
        })
    }

    /// Returns `true` if there is an element after the current one.
    pub fn has_next(&self) -> bool {
        self.position
            .and_then(|p| seek(self.set, Position { item: p.item + 1, ..p }))
            .is_some()
    }

    /// Returns a copy of the current element, or the default value if the
    /// cursor does not point at one.
    pub fn get(&self) -> E::Owned {
        self.current().unwrap_or_default()
    }

    /// Moves to the next element. Does nothing at the end.
    pub fn advance(&mut self) {
        if let Some(p) = self.position {
            self.position = seek(self.set, Position { item: p.item + 1, ..p });
        }
    }

    pub(crate) fn current(&self) -> Option<E::Owned> {
        let p = self.position?;
        self.set.shard(p.shard)?.item(p.bucket, p.item)
    }

    pub(crate) fn is_end(&self) -> bool {
        self.position.is_none()
    }

    pub(crate) fn belongs_to(&self, set: &HashSet<E>) -> bool {
        ptr::eq(self.set, set)
    }
}

impl<E: Element + ?Sized> Clone for Cursor<'_, E> {
    fn clone(&self) -> Self {
        Self {
            set: self.set,
            position: self.position,
        }
    }
}

impl<E: Element + ?Sized> PartialEq for Cursor<'_, E> {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self.set, other.set) && self.position == other.position
    }
}

impl<E: Element + ?Sized> Eq for Cursor<'_, E> {}

impl<E: Element + ?Sized> fmt::Debug for Cursor<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.position {
            Some(p) => f
                .debug_struct("Cursor")
                .field("shard", &p.shard)
                .field("bucket", &p.bucket)
                .field("item", &p.item)
                .finish(),
            None => f.write_str("Cursor(end)"),
        }
    }
}

impl<E: Element + ?Sized> Iterator for Cursor<'_, E> {
    type Item = E::Owned;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.position?;
            let current = self.current();
            self.advance();
            if current.is_some() {
                return current;
            }
        }
    }
}

impl<E: Element + ?Sized> FusedIterator for Cursor<'_, E> {}

/// An iterator over copies of the elements of a [`HashSet`][hash-set].
///
/// [hash-set]: ./struct.HashSet.html
pub struct Iter<'a, E: Element + ?Sized> {
    cursor: Cursor<'a, E>,
}

impl<'a, E: Element + ?Sized> Iter<'a, E> {
    pub(crate) fn new(cursor: Cursor<'a, E>) -> Self {
        Self { cursor }
    }
}

impl<E: Element + ?Sized> Iterator for Iter<'_, E> {
    type Item = E::Owned;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next()
    }
}

impl<E: Element + ?Sized> FusedIterator for Iter<'_, E> {}

/// Returns the first position at or after `from` that holds an element.
fn seek<E: Element + ?Sized>(set: &HashSet<E>, mut from: Position) -> Option<Position> {
    while let Some(shard) = set.shard(from.shard) {
        while let Some(len) = shard.bucket_len(from.bucket) {
            if from.item < len {
                return Some(from);
            }
            from.bucket += 1;
            from.item = 0;
        }
        from.shard += 1;
        from.bucket = 0;
        from.item = 0;
    }
    None
}
