// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The typed block formats of the B+ tree.
//!
//! Every tree block starts with a tag byte and decodes into one of two
//! variants. A *node* block is an internal index entry list; a *data*
//! block carries a single record plus the address of its in-order
//! successor. All integer fields are little-endian words.
//!
//! ```text
//! node:  0x01 | count | count x (key, child) | zero pad
//! data:  0x02 | next | key | value_len | value bytes | zero pad
//! ```

use crate::utils::{read_word, write_word};
use crate::{Address, Key, StoreError, WORD_SIZE};

/// Tag byte of an internal index block.
pub(crate) const NODE_TAG: u8 = 0x01;
/// Tag byte of a leaf (record-carrying) block.
pub(crate) const DATA_TAG: u8 = 0x02;

/// Header bytes of a node block: the tag plus the pair count word.
const NODE_HEADER: usize = 1 + WORD_SIZE;
/// Header bytes of a data block: tag, next pointer, key, value length.
const DATA_HEADER: usize = 1 + 3 * WORD_SIZE;

/// The maximum number of `(key, child)` pairs a node block can hold.
pub(crate) fn node_capacity(block_size: usize) -> usize {
    block_size.saturating_sub(NODE_HEADER) / (2 * WORD_SIZE)
}

/// The longest value a data block can hold.
pub(crate) fn value_capacity(block_size: usize) -> usize {
    block_size.saturating_sub(DATA_HEADER)
}

/// The payload of a decoded data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DataBlock {
    /// Address of the next data block in key order, or the storage's
    /// empty sentinel at the rightmost record.
    pub next: Address,
    /// The record's key.
    pub key: Key,
    /// The record's value, exactly as inserted.
    pub value: Vec<u8>,
}

/// A decoded tree block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Block {
    /// Internal index block: `(key, child)` pairs sorted by key, each
    /// key being the maximum key reachable through its child.
    Node(Vec<(Key, Address)>),
    /// Leaf block carrying one record.
    Data(DataBlock),
}

impl Block {
    /// Decodes a raw block, dispatching on the tag byte. `location` is
    /// only used to label errors.
    pub fn decode(location: Address, raw: &[u8]) -> Result<Self, StoreError> {
        if raw.len() < DATA_HEADER {
            return Err(StoreError::BlockSizeTooSmall(raw.len()));
        }
        match raw.first() {
            Some(&NODE_TAG) => {
                let count = usize::try_from(read_word(raw, 1))?;
                if count == 0 || NODE_HEADER + 2 * count * WORD_SIZE > raw.len() {
                    return Err(StoreError::NodeOverflow {
                        pairs: count,
                        block_size: raw.len(),
                    });
                }
                let mut pairs = Vec::with_capacity(count);
                for i in 0..count {
                    let offset = NODE_HEADER + 2 * i * WORD_SIZE;
                    pairs.push((read_word(raw, offset), read_word(raw, offset + WORD_SIZE)));
                }
                Ok(Block::Node(pairs))
            }
            Some(&DATA_TAG) => {
                let len = usize::try_from(read_word(raw, 1 + 2 * WORD_SIZE))?;
                if DATA_HEADER + len > raw.len() {
                    return Err(StoreError::DataSize {
                        actual: len,
                        expected: raw.len() - DATA_HEADER,
                    });
                }
                Ok(Block::Data(DataBlock {
                    next: read_word(raw, 1),
                    key: read_word(raw, 1 + WORD_SIZE),
                    value: raw[DATA_HEADER..DATA_HEADER + len].to_vec(),
                }))
            }
            Some(&tag) => Err(StoreError::BlockType { location, tag }),
            None => Err(StoreError::BlockType { location, tag: 0 }),
        }
    }

    /// The node pairs, or the "non-node block" error.
    pub fn into_node(self, location: Address) -> Result<Vec<(Key, Address)>, StoreError> {
        match self {
            Block::Node(pairs) => Ok(pairs),
            Block::Data(_) => Err(StoreError::NonNodeBlock(location)),
        }
    }

    /// The data payload, or the "non-data block" error.
    pub fn into_data(self, location: Address) -> Result<DataBlock, StoreError> {
        match self {
            Block::Data(data) => Ok(data),
            Block::Node(_) => Err(StoreError::NonDataBlock(location)),
        }
    }
}

/// Encodes a node block of `pairs` into a `block_size`-byte buffer.
pub(crate) fn encode_node(
    pairs: &[(Key, Address)],
    block_size: usize,
) -> Result<Vec<u8>, StoreError> {
    if pairs.is_empty() || pairs.len() > node_capacity(block_size) {
        return Err(StoreError::NodeOverflow {
            pairs: pairs.len(),
            block_size,
        });
    }

    let mut raw = vec![0u8; block_size];
    raw[0] = NODE_TAG;
    write_word(&mut raw, 1, pairs.len() as u64);
    for (i, (key, child)) in pairs.iter().enumerate() {
        let offset = NODE_HEADER + 2 * i * WORD_SIZE;
        write_word(&mut raw, offset, *key);
        write_word(&mut raw, offset + WORD_SIZE, *child);
    }
    Ok(raw)
}

/// Encodes a data block into a `block_size`-byte buffer.
pub(crate) fn encode_data(
    next: Address,
    key: Key,
    value: &[u8],
    block_size: usize,
) -> Result<Vec<u8>, StoreError> {
    if block_size < DATA_HEADER || value.len() > value_capacity(block_size) {
        return Err(StoreError::BlockSizeTooSmall(block_size));
    }

    let mut raw = vec![0u8; block_size];
    raw[0] = DATA_TAG;
    write_word(&mut raw, 1, next);
    write_word(&mut raw, 1 + WORD_SIZE, key);
    write_word(&mut raw, 1 + 2 * WORD_SIZE, value.len() as u64);
    raw[DATA_HEADER..DATA_HEADER + value.len()].copy_from_slice(value);
    Ok(raw)
}
