#![warn(clippy::all)]
#![warn(rust_2018_idioms)]

//! Fastset is a fast, sharded hash set for Rust, built for membership tests
//! and deduplication over hundreds of millions of fixed-width integers or
//! byte strings.
//!
//! A set can be created in single-threaded mode, where it takes no locks at
//! all, or in concurrent mode, where lookups stay lock-free and insertions and
//! removals lock a single bucket. Every shard grows on its own, one bucket at
//! a time, so a resize never blocks the whole set.
//!
//! # Examples
//!
//! ```rust
//! use fastset::{BytesSet, IntSet};
//!
//! let visited = IntSet::<i64>::new(false);
//! assert!(visited.add(&42));
//! assert!(visited.contains(&42));
//!
//! let words = BytesSet::with_bits(true, 2, 8);
//! assert!(words.add(b"hello"));
//! assert!(!words.add(b"hello"));
//! assert_eq!(words.len(), 1);
//! ```
//!
//! # Minimum Supported Rust Versions
//!
//! This crate's minimum supported Rust version (MSRV) is 1.65.

pub(crate) mod cht;
pub(crate) mod common;
mod element;
mod set;

pub use cht::{arena::ArenaStats, shard::ShardStats};
pub use common::error::VerifyError;
pub use element::Element;
pub use set::{BytesSet, Cursor, HashSet, IntSet, Iter, SetBuilder};
