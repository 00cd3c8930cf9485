// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The physical slot format of the ORAM bucket tree.
//!
//! Each bucket holds `Z` slots; each slot is one storage block encoding
//! a logical block id word followed by the payload. A dummy slot
//! carries [`DUMMY_BLOCK_ID`] and random filler, so occupied and empty
//! slots are indistinguishable to the storage below.

use crate::utils::{random_bytes, read_word, write_word};
use crate::{BlockId, StoreError, WORD_SIZE};
use rand::{CryptoRng, Rng};

/// The id marking a slot that holds no logical block.
pub const DUMMY_BLOCK_ID: BlockId = BlockId::MAX;

/// A decoded physical slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Slot {
    /// The logical block stored here, or [`DUMMY_BLOCK_ID`].
    pub id: BlockId,
    /// The block payload; random filler in a dummy slot.
    pub payload: Vec<u8>,
}

impl Slot {
    /// A dummy slot with fresh random filler.
    pub fn dummy<R: Rng + CryptoRng>(data_size: usize, rng: &mut R) -> Self {
        Self {
            id: DUMMY_BLOCK_ID,
            payload: random_bytes(data_size, rng),
        }
    }

    pub fn is_dummy(&self) -> bool {
        self.id == DUMMY_BLOCK_ID
    }

    /// Encodes the slot into a `block_size`-byte storage block.
    pub fn encode(&self, block_size: usize) -> Result<Vec<u8>, StoreError> {
        if self.payload.len() + WORD_SIZE != block_size {
            return Err(StoreError::DataSize {
                actual: self.payload.len(),
                expected: block_size - WORD_SIZE,
            });
        }
        let mut raw = vec![0u8; block_size];
        write_word(&mut raw, 0, self.id);
        raw[WORD_SIZE..].copy_from_slice(&self.payload);
        Ok(raw)
    }

    /// Decodes a storage block into a slot.
    pub fn decode(raw: &[u8]) -> Self {
        Self {
            id: read_word(raw, 0),
            payload: raw[WORD_SIZE..].to_vec(),
        }
    }
}
