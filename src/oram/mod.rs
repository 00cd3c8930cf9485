// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The Path ORAM engine.
//!
//! The engine wraps a [`BlockStorage`] adapter, a [`PositionMap`], and
//! a [`Stash`] to serve reads and writes of logical blocks while
//! hiding which block an access touches. Storage holds a complete
//! binary tree of buckets, `Z` slots each; every logical block is
//! mapped to a leaf and lives somewhere on the path from the root to
//! that leaf, or in the stash. Each access re-maps the block to a
//! fresh random leaf, reads its old path into the stash, and greedily
//! evicts stash contents back onto that path, so the storage below
//! observes one full path read and one full path write per access
//! regardless of the block requested.

pub(crate) mod bucket;
pub mod position_map;
pub mod stash;
mod tree_index;

use crate::storage::BlockStorage;
use crate::{Address, BlockId, Leaf, StoreError, WORD_SIZE};
use bucket::Slot;
use position_map::{InMemoryPositionMap, PositionMap};
use rand::{CryptoRng, Rng};
use stash::{InMemoryStash, Stash};
use std::cell::RefCell;
use std::rc::Rc;
use tree_index::{bucket_for_level_leaf, can_include, random_leaf};

pub use bucket::DUMMY_BLOCK_ID;

/// The stash headroom, in blocks, that [`Oram::with_default_components`]
/// provisions beyond one path's worth. Forty overflow blocks keep the
/// overflow probability negligible for the bucket sizes in common use.
pub const DEFAULT_STASH_OVERFLOW: usize = 40;

/// A Path ORAM engine over block storage.
///
/// The position map and stash are injected so implementations stored
/// elsewhere can replace the in-memory ones. The engine is
/// single-threaded; callers serialize access.
#[derive(Debug)]
pub struct Oram<S: BlockStorage, P: PositionMap, T: Stash> {
    storage: Rc<RefCell<S>>,
    position_map: P,
    stash: T,
    /// Storage addresses of the physical slots; slot `bucket * z + i`
    /// of the bucket tree lives at `slots[bucket * z + i]`.
    slots: Vec<Address>,
    height: u32,
    z: u64,
    buckets: u64,
    blocks: u64,
    data_size: usize,
}

impl<S: BlockStorage> Oram<S, InMemoryPositionMap, InMemoryStash> {
    /// Builds an engine with the in-memory position map and a stash
    /// capped at one path plus [`DEFAULT_STASH_OVERFLOW`] blocks.
    pub fn with_default_components<R: Rng + CryptoRng>(
        log_capacity: u32,
        z: u64,
        storage: Rc<RefCell<S>>,
        rng: &mut R,
    ) -> Result<Self, StoreError> {
        let blocks = (1u64
            .checked_shl(log_capacity)
            .ok_or(StoreError::InvalidConfiguration("height too large"))?)
            * z;
        let position_map = InMemoryPositionMap::new(usize::try_from(blocks)?);
        let stash =
            InMemoryStash::bounded(usize::try_from(z * u64::from(log_capacity))? + DEFAULT_STASH_OVERFLOW);
        Self::new(log_capacity, z, storage, position_map, stash, rng)
    }
}

impl<S: BlockStorage, P: PositionMap, T: Stash> Oram<S, P, T> {
    /// Builds an engine of `2^log_capacity` buckets of `z` slots over
    /// `storage`, allocating and filling the whole bucket tree with
    /// dummies and scattering the logical blocks over random leaves.
    pub fn new<R: Rng + CryptoRng>(
        log_capacity: u32,
        z: u64,
        storage: Rc<RefCell<S>>,
        position_map: P,
        stash: T,
        rng: &mut R,
    ) -> Result<Self, StoreError> {
        let height = log_capacity;
        if height < 2 || height > 32 || z == 0 {
            return Err(StoreError::InvalidConfiguration(
                "height must be in 2..=32 and the bucket size positive",
            ));
        }
        let block_size = storage.borrow().block_size();
        if block_size <= WORD_SIZE {
            return Err(StoreError::InvalidConfiguration(
                "block size must exceed the id word",
            ));
        }

        let buckets = 1u64 << height;
        let blocks = buckets
            .checked_mul(z)
            .ok_or(StoreError::InvalidConfiguration("capacity overflows"))?;

        log::info!("Oram::new -- height {height}, Z {z}, {buckets} buckets, {blocks} blocks");

        let mut slots = Vec::with_capacity(usize::try_from(blocks)?);
        {
            let mut storage = storage.borrow_mut();
            for _ in 0..blocks {
                slots.push(storage.malloc());
            }
        }

        let mut engine = Self {
            storage,
            position_map,
            stash,
            slots,
            height,
            z,
            buckets,
            blocks,
            data_size: block_size - WORD_SIZE,
        };

        for index in 0..engine.slots.len() {
            let dummy = Slot::dummy(engine.data_size, rng);
            engine.write_slot(index, &dummy)?;
        }

        for block in 0..blocks {
            engine.position_map.set(block, random_leaf(height, rng))?;
        }

        Ok(engine)
    }

    /// Obliviously reads logical block `block`. Reading a block that
    /// was never written is the "not present in the stash" error.
    pub fn get<R: Rng + CryptoRng>(
        &mut self,
        block: BlockId,
        rng: &mut R,
    ) -> Result<Vec<u8>, StoreError> {
        self.access(block, None, rng)
    }

    /// Obliviously writes `data` (exactly [`Oram::data_size`] bytes)
    /// into logical block `block`.
    pub fn put<R: Rng + CryptoRng>(
        &mut self,
        block: BlockId,
        data: &[u8],
        rng: &mut R,
    ) -> Result<(), StoreError> {
        self.access(block, Some(data), rng)?;
        Ok(())
    }

    /// The number of logical blocks the engine serves.
    pub fn block_capacity(&self) -> BlockId {
        self.blocks
    }

    /// The payload length of a logical block: the storage block size
    /// minus the id word.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// One access of the Path ORAM protocol: remap, read the old path
    /// into the stash, serve the request from the stash, write the
    /// path back. The sequence is strict; the write-back looks
    /// positions up in the already-updated map.
    fn access<R: Rng + CryptoRng>(
        &mut self,
        block: BlockId,
        data: Option<&[u8]>,
        rng: &mut R,
    ) -> Result<Vec<u8>, StoreError> {
        if block >= self.blocks {
            return Err(StoreError::BlockOutOfBounds(block));
        }
        if let Some(data) = data {
            if data.len() != self.data_size {
                return Err(StoreError::DataSize {
                    actual: data.len(),
                    expected: self.data_size,
                });
            }
        }

        let previous = self.position_map.get(block)?;
        self.position_map.set(block, random_leaf(self.height, rng))?;
        log::debug!("Oram::access -- block {block}, path {previous}");

        self.read_path(previous)?;

        if let Some(data) = data {
            self.stash.update(block, data.to_vec())?;
        }
        let result = self.stash.get(block)?;

        self.write_path(previous, rng)?;

        Ok(result)
    }

    /// Reads every slot on the path to `leaf`, parking the non-dummy
    /// blocks in the stash.
    fn read_path(&mut self, leaf: Leaf) -> Result<(), StoreError> {
        for level in 0..self.height {
            let bucket = bucket_for_level_leaf(self.height, level, leaf);
            for index in 0..self.z {
                let slot = self.read_slot(self.slot_index(bucket, index)?)?;
                if !slot.is_dummy() {
                    self.stash.add(slot.id, slot.payload)?;
                }
            }
        }
        Ok(())
    }

    /// Rewrites every bucket on the path to `leaf`, bottom-up,
    /// greedily evicting stash entries whose current position allows
    /// them into each bucket and filling the rest with dummies.
    fn write_path<R: Rng + CryptoRng>(&mut self, leaf: Leaf, rng: &mut R) -> Result<(), StoreError> {
        let z = usize::try_from(self.z)?;
        let mut remaining = self.stash.get_all();
        let mut evicted = Vec::new();

        for level in (0..self.height).rev() {
            let bucket = bucket_for_level_leaf(self.height, level, leaf);

            let mut picked = Vec::new();
            for (index, (block, _)) in remaining.iter().enumerate() {
                if can_include(self.height, self.position_map.get(*block)?, leaf, level) {
                    picked.push(index);
                    if picked.len() == z {
                        break;
                    }
                }
            }

            let mut to_insert = Vec::with_capacity(picked.len());
            for index in picked.into_iter().rev() {
                let (block, payload) = remaining.remove(index);
                evicted.push(block);
                to_insert.push((block, payload));
            }

            for index in 0..self.z {
                let slot_index = self.slot_index(bucket, index)?;
                match to_insert.pop() {
                    Some((id, payload)) => self.write_slot(slot_index, &Slot { id, payload })?,
                    None => {
                        let dummy = Slot::dummy(self.data_size, rng);
                        self.write_slot(slot_index, &dummy)?;
                    }
                }
            }
        }

        for block in evicted {
            self.stash.remove(block);
        }
        Ok(())
    }

    /// Verifies that every block present in the bucket tree lies on
    /// the path its position map entry names. Blocks that were never
    /// written are indistinguishable from the initialization filler
    /// and are not checked. The stash is restored afterwards, so a
    /// passing check leaves the engine state untouched.
    pub fn check_consistency(&mut self) -> Result<(), StoreError> {
        let mut present = Vec::new();
        for index in 0..self.slots.len() {
            let slot = self.read_slot(index)?;
            if !slot.is_dummy() {
                present.push(slot.id);
            }
        }

        let saved = self.stash.get_all();
        let result = self.verify_paths(&present);

        for (block, _) in self.stash.get_all() {
            self.stash.remove(block);
        }
        for (block, payload) in saved {
            self.stash.add(block, payload)?;
        }
        result
    }

    fn verify_paths(&mut self, present: &[BlockId]) -> Result<(), StoreError> {
        for &block in present {
            for (resident, _) in self.stash.get_all() {
                self.stash.remove(resident);
            }

            let leaf = self.position_map.get(block)?;
            self.read_path(leaf)?;

            if !self.stash.get_all().iter().any(|(id, _)| *id == block) {
                return Err(StoreError::BlockNotOnPath { block, leaf });
            }
        }
        Ok(())
    }

    fn slot_index(&self, bucket: u64, slot: u64) -> Result<usize, StoreError> {
        Ok(usize::try_from(bucket * self.z + slot)?)
    }

    fn read_slot(&mut self, index: usize) -> Result<Slot, StoreError> {
        let raw = self.storage.borrow_mut().get(self.slots[index])?;
        Ok(Slot::decode(&raw))
    }

    fn write_slot(&mut self, index: usize, slot: &Slot) -> Result<(), StoreError> {
        let raw = slot.encode(self.data_size + WORD_SIZE)?;
        self.storage.borrow_mut().set(self.slots[index], &raw)
    }
}
