// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A block-addressed storage core with two engines on top of one
//! storage abstraction:
//!
//! - a static [`Tree`]: a B+ tree built once from a sorted batch of
//!   `(key, value)` records, self-described entirely through typed
//!   fixed-size blocks, answering point and range queries;
//! - an [`Oram`] engine implementing the Path ORAM protocol, hiding
//!   *which* logical block an access touches by reading and rewriting
//!   one full root-to-leaf path of a bucket tree per access.
//!
//! Both sit on [`BlockStorage`], a uniform interface over fixed-size
//! addressable blocks with in-memory and file-backed implementations.
//! ORAM hides the access pattern, not the payloads; encrypting block
//! contents is the caller's responsibility.
//!
//! ```
//! use oramdb::{InMemoryStorage, Tree};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! # fn main() -> Result<(), oramdb::StoreError> {
//! let storage = Rc::new(RefCell::new(InMemoryStorage::new(256)?));
//! let records: Vec<(u64, Vec<u8>)> = (0..10).map(|key| (key, vec![key as u8; 32])).collect();
//! let tree = Tree::build(Rc::clone(&storage), &records)?;
//! assert_eq!(tree.search(7)?, vec![vec![7u8; 32]]);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::cargo, clippy::doc_markdown, missing_docs, rustdoc::all)]

pub mod btree;
pub mod oram;
pub mod storage;
#[cfg(test)]
pub(crate) mod test_utils;
pub(crate) mod utils;

use thiserror::Error;

pub use btree::Tree;
pub use oram::position_map::{InMemoryPositionMap, PositionMap};
pub use oram::stash::{InMemoryStash, Stash};
pub use oram::Oram;
pub use storage::{BlockStorage, FileStorage, InMemoryStorage, EMPTY};

/// The numeric type of block addresses handed out by [`BlockStorage::malloc`].
pub type Address = u64;
/// The numeric type of B+ tree record keys.
pub type Key = u64;
/// The numeric type of logical ORAM block identifiers.
pub type BlockId = u64;
/// The numeric type of ORAM leaf identifiers.
pub type Leaf = u64;

/// The width in bytes of every integer field in the block formats.
/// All such fields are encoded little-endian.
pub const WORD_SIZE: usize = std::mem::size_of::<u64>();

/// The error type shared by the storage adapters, the B+ tree, and the
/// ORAM engine. Every failure propagates to the caller; nothing is
/// retried or silently recovered.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A payload whose length differs from the adapter's block size.
    #[error("data size ({actual}) does not match block size ({expected})")]
    DataSize {
        /// The length of the offending payload.
        actual: usize,
        /// The length the adapter expects.
        expected: usize,
    },

    /// A `get` or `set` at an address no `malloc` call ever returned.
    #[error("attempt to access memory that was not malloced ({0})")]
    UnallocatedAccess(Address),

    /// The backing file could not be opened.
    #[error("cannot open {path}: {source}")]
    FileOpen {
        /// The path passed to [`FileStorage::new`].
        path: String,
        /// The underlying failure.
        source: std::io::Error,
    },

    /// An existing backing file whose size is not a whole number of blocks.
    #[error("file size ({size}) is not a multiple of block size ({block_size})")]
    MisalignedFile {
        /// The observed file size in bytes.
        size: u64,
        /// The adapter's block size.
        block_size: usize,
    },

    /// An I/O failure on the backing file after it was opened.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An index value that does not fit the platform's pointer width.
    #[error(transparent)]
    IntegerConversion(#[from] std::num::TryFromIntError),

    /// A block size too small to hold the tree's block layouts.
    #[error("block size too small ({0})")]
    BlockSizeTooSmall(usize),

    /// A block whose tag byte names no known block type.
    #[error("unrecognized block type tag ({tag:#04x}) at {location}")]
    BlockType {
        /// The address of the offending block.
        location: Address,
        /// The tag byte found there.
        tag: u8,
    },

    /// A node block read where a data block was expected.
    #[error("non-data block at {0}")]
    NonDataBlock(Address),

    /// A data block read where a node block was expected.
    #[error("non-node block at {0}")]
    NonNodeBlock(Address),

    /// More `(key, child)` pairs than a node block can hold.
    #[error("node block of {pairs} pairs does not fit the block size ({block_size})")]
    NodeOverflow {
        /// The requested pair count.
        pairs: usize,
        /// The block size the pairs must fit in.
        block_size: usize,
    },

    /// A construction batch that is unsorted or has values of mixed lengths.
    #[error("input batch rejected: {0}")]
    InvalidBatch(&'static str),

    /// A data block whose `next` pointer does not continue the key-ordered chain.
    #[error("data block chain broken at {0}")]
    BrokenDataChain(Address),

    /// A key that contradicts the bound recorded in the index above it.
    #[error("key {actual} at {location} does not match the expected bound {expected}")]
    KeyMismatch {
        /// The address of the block holding the offending key.
        location: Address,
        /// The bound recorded in the parent node.
        expected: Key,
        /// The key actually found.
        actual: Key,
    },

    /// Engine parameters that describe no valid geometry.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),

    /// A logical block id at or beyond the engine's capacity.
    #[error("block {0} is out of bounds")]
    BlockOutOfBounds(BlockId),

    /// A block that should have been recovered by the read phase but was not.
    #[error("block {0} is not present in the stash")]
    StashMiss(BlockId),

    /// A stash insert beyond the configured capacity. The stash never
    /// grows past its cap; a persistently full stash means eviction is
    /// failing to drain it.
    #[error("stash overflow: capacity {0} exceeded")]
    StashOverflow(usize),

    /// A block missing from the path its position map entry names.
    #[error("block {block} is mapped to leaf {leaf}, but was not found in the path")]
    BlockNotOnPath {
        /// The missing logical block.
        block: BlockId,
        /// The leaf its position map entry points at.
        leaf: Leaf,
    },
}
