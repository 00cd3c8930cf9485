// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The stash: overflow storage for blocks not yet evicted to their path.

use crate::{BlockId, StoreError};
use std::collections::BTreeMap;

/// The engine's view of a stash. Like the position map this is a seam:
/// the engine never assumes an in-memory implementation.
pub trait Stash {
    /// Inserts `payload` under `block`, overwriting any previous entry.
    fn add(&mut self, block: BlockId, payload: Vec<u8>) -> Result<(), StoreError>;

    /// Same contract as [`Stash::add`]; named for the write step of the
    /// access protocol.
    fn update(&mut self, block: BlockId, payload: Vec<u8>) -> Result<(), StoreError>;

    /// The payload stored under `block`; an absent entry is the
    /// "not present in the stash" error.
    fn get(&self, block: BlockId) -> Result<Vec<u8>, StoreError>;

    /// Drops the entry under `block`, if any.
    fn remove(&mut self, block: BlockId);

    /// A snapshot of the current entries in deterministic (ascending
    /// id) order.
    fn get_all(&self) -> Vec<(BlockId, Vec<u8>)>;
}

/// An in-memory stash with an optional hard capacity.
///
/// The capacity must cover one path's worth of blocks (the read phase
/// parks `Z * height` of them here) plus overflow headroom. Exceeding
/// it is an error rather than a growth event: a stash that keeps
/// filling up means eviction is failing to drain it, which callers
/// should treat as a broken invariant, not absorb.
#[derive(Debug, Default)]
pub struct InMemoryStash {
    entries: BTreeMap<BlockId, Vec<u8>>,
    capacity: Option<usize>,
}

impl InMemoryStash {
    /// A stash that may grow without bound.
    pub fn unbounded() -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity: None,
        }
    }

    /// A stash holding at most `capacity` entries.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity: Some(capacity),
        }
    }

    /// The number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the stash holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Stash for InMemoryStash {
    fn add(&mut self, block: BlockId, payload: Vec<u8>) -> Result<(), StoreError> {
        if let Some(capacity) = self.capacity {
            if self.entries.len() >= capacity && !self.entries.contains_key(&block) {
                return Err(StoreError::StashOverflow(capacity));
            }
        }
        self.entries.insert(block, payload);
        Ok(())
    }

    fn update(&mut self, block: BlockId, payload: Vec<u8>) -> Result<(), StoreError> {
        self.add(block, payload)
    }

    fn get(&self, block: BlockId) -> Result<Vec<u8>, StoreError> {
        self.entries
            .get(&block)
            .cloned()
            .ok_or(StoreError::StashMiss(block))
    }

    fn remove(&mut self, block: BlockId) {
        self.entries.remove(&block);
    }

    fn get_all(&self) -> Vec<(BlockId, Vec<u8>)> {
        self.entries
            .iter()
            .map(|(block, payload)| (*block, payload.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::assert_error_contains;

    #[test]
    fn add_and_get() {
        let mut stash = InMemoryStash::unbounded();
        stash.add(1, vec![1]).unwrap();
        stash.add(2, vec![2]).unwrap();

        assert_eq!(stash.get(1).unwrap(), vec![1]);
        assert_eq!(stash.get(2).unwrap(), vec![2]);
        assert_eq!(stash.len(), 2);
    }

    #[test]
    fn add_overwrites() {
        let mut stash = InMemoryStash::unbounded();
        stash.add(1, vec![1]).unwrap();
        stash.update(1, vec![9]).unwrap();

        assert_eq!(stash.get(1).unwrap(), vec![9]);
        assert_eq!(stash.len(), 1);
    }

    #[test]
    fn missing_block_is_an_error() {
        let stash = InMemoryStash::unbounded();
        assert_error_contains(stash.get(7), "not present in the stash");
    }

    #[test]
    fn remove_is_idempotent() {
        let mut stash = InMemoryStash::unbounded();
        stash.add(1, vec![1]).unwrap();
        stash.remove(1);
        stash.remove(1);
        assert!(stash.is_empty());
    }

    #[test]
    fn snapshot_is_ordered() {
        let mut stash = InMemoryStash::unbounded();
        stash.add(3, vec![3]).unwrap();
        stash.add(1, vec![1]).unwrap();
        stash.add(2, vec![2]).unwrap();

        let ids: Vec<_> = stash.get_all().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn capacity_is_a_hard_limit() {
        let mut stash = InMemoryStash::bounded(2);
        stash.add(1, vec![1]).unwrap();
        stash.add(2, vec![2]).unwrap();
        assert_error_contains(stash.add(3, vec![3]), "stash overflow");

        // Overwrites and removals still work at capacity.
        stash.update(1, vec![9]).unwrap();
        stash.remove(2);
        stash.add(3, vec![3]).unwrap();
    }
}
