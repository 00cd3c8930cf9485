// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Storage adapters: fixed-size addressable blocks over memory or a file.
//!
//! An adapter hands out addresses through `malloc` and accepts reads
//! and writes of whole blocks at previously allocated addresses. One
//! address is reserved for the *meta block*, which the tree uses to
//! record its root pointer; it counts as allocated from construction.

use crate::utils::write_word;
use crate::{Address, StoreError};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// The sentinel address. Never returned by `malloc`; marks "no block
/// here" wherever an address field needs a null (a tree with no root,
/// the end of the data block chain).
pub const EMPTY: Address = Address::MAX;

/// A store of fixed-size blocks addressed by opaque integers.
///
/// Consumers hold the adapter behind `Rc<RefCell<_>>` when the handle
/// must be shared, e.g. to open a second reader over the same backing
/// file or to inspect blocks a tree wrote.
pub trait BlockStorage {
    /// The size in bytes of every block; constant for the adapter's lifetime.
    fn block_size(&self) -> usize;

    /// Reserves a previously unused address. Addresses are strictly
    /// increasing across calls.
    fn malloc(&mut self) -> Address;

    /// Reads the whole block at `location`. Fails for any address that
    /// `malloc` never returned (the meta address counts as allocated).
    fn get(&mut self, location: Address) -> Result<Vec<u8>, StoreError>;

    /// Writes `data` as the whole block at `location`. Fails unless
    /// `data.len()` equals the block size and `location` is allocated.
    fn set(&mut self, location: Address, data: &[u8]) -> Result<(), StoreError>;

    /// The sentinel address, never valid for `get`/`set`.
    fn empty(&self) -> Address {
        EMPTY
    }

    /// The address of the reserved meta block.
    fn meta(&self) -> Address;
}

/// A [`BlockStorage`] holding its blocks in a `Vec`. Addresses are
/// allocation counters; the meta block is address `0`, allocated at
/// construction and initialized to [`EMPTY`].
#[derive(Debug)]
pub struct InMemoryStorage {
    block_size: usize,
    blocks: Vec<Vec<u8>>,
}

impl InMemoryStorage {
    /// Creates an empty store of `block_size`-byte blocks. A block
    /// size that cannot hold a single address word is rejected.
    pub fn new(block_size: usize) -> Result<Self, StoreError> {
        if block_size < crate::WORD_SIZE {
            return Err(StoreError::BlockSizeTooSmall(block_size));
        }
        let mut meta_block = vec![0u8; block_size];
        write_word(&mut meta_block, 0, EMPTY);
        Ok(Self {
            block_size,
            blocks: vec![meta_block],
        })
    }

    fn check_location(&self, location: Address) -> Result<usize, StoreError> {
        let index = usize::try_from(location)?;
        if index >= self.blocks.len() {
            return Err(StoreError::UnallocatedAccess(location));
        }
        Ok(index)
    }
}

impl BlockStorage for InMemoryStorage {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn malloc(&mut self) -> Address {
        self.blocks.push(vec![0u8; self.block_size]);
        (self.blocks.len() - 1) as Address
    }

    fn get(&mut self, location: Address) -> Result<Vec<u8>, StoreError> {
        let index = self.check_location(location)?;
        Ok(self.blocks[index].clone())
    }

    fn set(&mut self, location: Address, data: &[u8]) -> Result<(), StoreError> {
        if data.len() != self.block_size {
            return Err(StoreError::DataSize {
                actual: data.len(),
                expected: self.block_size,
            });
        }
        let index = self.check_location(location)?;
        self.blocks[index].copy_from_slice(data);
        Ok(())
    }

    fn meta(&self) -> Address {
        0
    }
}

/// A [`BlockStorage`] backed by a random-access file. Addresses are
/// byte offsets, always multiples of the block size. The first block
/// of the file is reserved unused; the second is the meta block.
///
/// The adapter owns the file handle; dropping the adapter releases it
/// on every exit path, including a failed construction.
#[derive(Debug)]
pub struct FileStorage {
    block_size: usize,
    file: std::fs::File,
    /// Byte offset of the end of the allocated region; the next
    /// `malloc` returns this and advances it by one block.
    cursor: u64,
}

impl FileStorage {
    /// Opens the adapter over `path`.
    ///
    /// With `truncate` the file is created or emptied, the allocation
    /// cursor starts past the two reserved blocks, and the meta block
    /// is initialized to [`EMPTY`]. Without it the file must already
    /// exist and hold a whole number of blocks; the cursor resumes at
    /// the file size, preserving all earlier contents including the
    /// meta block. A block size that cannot hold a single address
    /// word is rejected.
    pub fn new<P: AsRef<Path>>(
        block_size: usize,
        path: P,
        truncate: bool,
    ) -> Result<Self, StoreError> {
        if block_size < crate::WORD_SIZE {
            return Err(StoreError::BlockSizeTooSmall(block_size));
        }
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(truncate)
            .truncate(truncate)
            .open(path)
            .map_err(|source| StoreError::FileOpen {
                path: path.display().to_string(),
                source,
            })?;

        if truncate {
            let mut storage = Self {
                block_size,
                file,
                cursor: 2 * block_size as u64,
            };
            let mut meta_block = vec![0u8; block_size];
            write_word(&mut meta_block, 0, EMPTY);
            let meta = storage.meta();
            storage.set(meta, &meta_block)?;
            Ok(storage)
        } else {
            let size = file.metadata()?.len();
            if size % block_size as u64 != 0 {
                return Err(StoreError::MisalignedFile { size, block_size });
            }
            Ok(Self {
                block_size,
                file,
                cursor: size,
            })
        }
    }

    fn check_location(&self, location: Address) -> Result<(), StoreError> {
        let block_size = self.block_size as u64;
        if location % block_size != 0 || location < block_size || location >= self.cursor {
            return Err(StoreError::UnallocatedAccess(location));
        }
        Ok(())
    }
}

impl BlockStorage for FileStorage {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn malloc(&mut self) -> Address {
        let location = self.cursor;
        self.cursor += self.block_size as u64;
        log::debug!("FileStorage::malloc -- {location}");
        location
    }

    fn get(&mut self, location: Address) -> Result<Vec<u8>, StoreError> {
        self.check_location(location)?;

        self.file.seek(SeekFrom::Start(location))?;
        let mut block = vec![0u8; self.block_size];
        // A block that was malloced but never set may lie past the end
        // of the file; the unwritten tail reads as zeroes.
        let mut filled = 0;
        while filled < self.block_size {
            let count = self.file.read(&mut block[filled..])?;
            if count == 0 {
                break;
            }
            filled += count;
        }
        Ok(block)
    }

    fn set(&mut self, location: Address, data: &[u8]) -> Result<(), StoreError> {
        if data.len() != self.block_size {
            return Err(StoreError::DataSize {
                actual: data.len(),
                expected: self.block_size,
            });
        }
        self.check_location(location)?;

        self.file.seek(SeekFrom::Start(location))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn meta(&self) -> Address {
        self.block_size as Address
    }
}
