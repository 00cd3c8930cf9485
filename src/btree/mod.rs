// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A static B+ tree over block storage.
//!
//! The tree is built once from a batch of records sorted by key and is
//! read-only afterwards. Its entire structure lives in typed blocks:
//! data blocks form a singly-linked list in ascending key order, node
//! blocks index them by the maximum key reachable through each child,
//! and the storage's meta block holds the root address. Opening a tree
//! over existing storage therefore needs nothing but the meta block.

pub(crate) mod block;

use crate::storage::BlockStorage;
use crate::utils::{read_word, write_word};
use crate::{Address, Key, StoreError};
use block::{encode_data, encode_node, node_capacity, value_capacity, Block};
use std::cell::RefCell;
use std::rc::Rc;

/// A block-addressed B+ tree mapping integer keys to fixed-length
/// values. Duplicate keys are permitted and preserved in insertion
/// order.
#[derive(Debug)]
pub struct Tree<S: BlockStorage> {
    storage: Rc<RefCell<S>>,
    root: Address,
    leftmost_data_block: Address,
}

impl<S: BlockStorage> Tree<S> {
    /// Builds a tree over `storage` from `data`, a batch of records in
    /// ascending key order whose values all have the same length.
    ///
    /// The data layer is written first (linked right to left), then
    /// index layers are stacked until a single root remains, and the
    /// root address is planted in the meta block. An empty batch opens
    /// whatever tree the storage's meta block already describes.
    pub fn build(storage: Rc<RefCell<S>>, data: &[(Key, Vec<u8>)]) -> Result<Self, StoreError> {
        let block_size = storage.borrow().block_size();
        let fanout = node_capacity(block_size);
        // A fanout below two cannot reduce the layer count.
        if fanout < 2 {
            return Err(StoreError::BlockSizeTooSmall(block_size));
        }

        if data.is_empty() {
            return Self::open(storage);
        }

        let value_len = data[0].1.len();
        if value_len > value_capacity(block_size) {
            return Err(StoreError::BlockSizeTooSmall(block_size));
        }
        if data.iter().any(|(_, value)| value.len() != value_len) {
            return Err(StoreError::InvalidBatch("values are not of identical length"));
        }
        if data.windows(2).any(|pair| pair[0].0 > pair[1].0) {
            return Err(StoreError::InvalidBatch("keys are not in ascending order"));
        }

        log::info!(
            "Tree::build -- {} records, block size {block_size}, fanout {fanout}",
            data.len()
        );

        let (leftmost_data_block, mut layer) = Self::write_data_layer(&storage, data, block_size)?;
        while layer.len() > 1 {
            layer = Self::push_layer(&storage, &layer, block_size, fanout)?;
        }
        let root = layer[0].1;

        let mut meta_block = vec![0u8; block_size];
        write_word(&mut meta_block, 0, root);
        {
            let mut storage = storage.borrow_mut();
            let meta = storage.meta();
            storage.set(meta, &meta_block)?;
        }

        Ok(Self {
            storage,
            root,
            leftmost_data_block,
        })
    }

    /// Opens the tree recorded in the storage's meta block.
    pub fn open(storage: Rc<RefCell<S>>) -> Result<Self, StoreError> {
        let (root, empty) = {
            let mut storage = storage.borrow_mut();
            let meta = storage.meta();
            let meta_block = storage.get(meta)?;
            (read_word(&meta_block, 0), storage.empty())
        };

        let leftmost_data_block = if root == empty {
            empty
        } else {
            Self::find_leftmost(&storage, root)?
        };

        Ok(Self {
            storage,
            root,
            leftmost_data_block,
        })
    }

    /// Point query: the values recorded under `key`, in insertion order.
    /// A missing key yields an empty result.
    pub fn search(&self, key: Key) -> Result<Vec<Vec<u8>>, StoreError> {
        self.search_range(key, key)
    }

    /// Range query: the values whose keys lie in `[lo, hi]`, in
    /// ascending key order, duplicates in insertion order. An inverted
    /// range yields an empty result.
    pub fn search_range(&self, lo: Key, hi: Key) -> Result<Vec<Vec<u8>>, StoreError> {
        let empty = self.storage.borrow().empty();
        let mut out = Vec::new();
        if lo > hi || self.root == empty {
            return Ok(out);
        }

        let mut current = self.descend(lo)?;
        while current != empty {
            let data = self.read_block(current)?.into_data(current)?;
            if data.key > hi {
                break;
            }
            if data.key >= lo {
                out.push(data.value);
            }
            current = data.next;
        }
        Ok(out)
    }

    /// Verifies the tree's structural invariants: the root decodes,
    /// every node entry's key equals the maximum key reachable through
    /// its child, and the data block chain visits exactly the tree's
    /// records in non-decreasing key order.
    pub fn check_consistency(&self) -> Result<(), StoreError> {
        let empty = self.storage.borrow().empty();
        if self.root == empty {
            return Ok(());
        }

        let mut expected = Vec::new();
        self.check_subtree(self.root, &mut expected)?;

        let mut current = self.leftmost_data_block;
        let mut previous_key: Option<Key> = None;
        for &address in &expected {
            if current != address {
                return Err(StoreError::BrokenDataChain(address));
            }
            let data = self
                .read_block(current)
                .and_then(|block| block.into_data(current))
                .map_err(|_| StoreError::BrokenDataChain(current))?;
            if let Some(previous) = previous_key {
                if previous > data.key {
                    return Err(StoreError::KeyMismatch {
                        location: current,
                        expected: previous,
                        actual: data.key,
                    });
                }
            }
            previous_key = Some(data.key);
            current = data.next;
        }
        if current != empty {
            return Err(StoreError::BrokenDataChain(current));
        }
        Ok(())
    }

    /// Recursively checks the index under `location` and returns the
    /// maximum key reachable there, appending the addresses of data
    /// blocks in key order.
    fn check_subtree(
        &self,
        location: Address,
        data_addresses: &mut Vec<Address>,
    ) -> Result<Key, StoreError> {
        match self.read_block(location)? {
            Block::Data(data) => {
                data_addresses.push(location);
                Ok(data.key)
            }
            Block::Node(pairs) => {
                let mut maximum = 0;
                for (key, child) in pairs {
                    let reachable = self.check_subtree(child, data_addresses)?;
                    if reachable != key {
                        return Err(StoreError::KeyMismatch {
                            location: child,
                            expected: key,
                            actual: reachable,
                        });
                    }
                    maximum = key;
                }
                Ok(maximum)
            }
        }
    }

    /// Descends from the root to the data block where a walk for `key`
    /// starts: at every node, the first child whose bound covers `key`,
    /// with the rightmost child as fallback.
    fn descend(&self, key: Key) -> Result<Address, StoreError> {
        let mut current = self.root;
        loop {
            match self.read_block(current)? {
                Block::Data(_) => return Ok(current),
                Block::Node(pairs) => {
                    let (_, child) = pairs
                        .iter()
                        .find(|(bound, _)| *bound >= key)
                        .copied()
                        .unwrap_or(pairs[pairs.len() - 1]);
                    current = child;
                }
            }
        }
    }

    fn find_leftmost(storage: &Rc<RefCell<S>>, root: Address) -> Result<Address, StoreError> {
        let mut current = root;
        loop {
            let raw = storage.borrow_mut().get(current)?;
            match Block::decode(current, &raw)? {
                Block::Data(_) => return Ok(current),
                Block::Node(pairs) => current = pairs[0].1,
            }
        }
    }

    /// Writes one data block per record, linking right to left so each
    /// block points at its successor. Returns the leftmost address and
    /// the `(key, address)` sequence for the first index layer.
    fn write_data_layer(
        storage: &Rc<RefCell<S>>,
        data: &[(Key, Vec<u8>)],
        block_size: usize,
    ) -> Result<(Address, Vec<(Key, Address)>), StoreError> {
        let mut storage = storage.borrow_mut();
        let addresses: Vec<Address> = data.iter().map(|_| storage.malloc()).collect();

        let mut next = storage.empty();
        for (index, (key, value)) in data.iter().enumerate().rev() {
            let raw = encode_data(next, *key, value, block_size)?;
            storage.set(addresses[index], &raw)?;
            next = addresses[index];
        }

        let layer = data
            .iter()
            .zip(&addresses)
            .map(|((key, _), address)| (*key, *address))
            .collect();
        Ok((addresses[0], layer))
    }

    /// Writes one index layer over `layer`, grouping consecutive
    /// entries into nodes of at most `fanout` pairs. Each emitted entry
    /// carries the chunk's maximum key.
    fn push_layer(
        storage: &Rc<RefCell<S>>,
        layer: &[(Key, Address)],
        block_size: usize,
        fanout: usize,
    ) -> Result<Vec<(Key, Address)>, StoreError> {
        let mut storage = storage.borrow_mut();
        let mut next_layer = Vec::with_capacity(layer.len().div_ceil(fanout));
        for chunk in layer.chunks(fanout) {
            let raw = encode_node(chunk, block_size)?;
            let address = storage.malloc();
            storage.set(address, &raw)?;
            next_layer.push((chunk[chunk.len() - 1].0, address));
        }
        log::debug!("Tree::build -- pushed layer of {} nodes", next_layer.len());
        Ok(next_layer)
    }

    fn read_block(&self, location: Address) -> Result<Block, StoreError> {
        let raw = self.storage.borrow_mut().get(location)?;
        Block::decode(location, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStorage, InMemoryStorage, EMPTY};
    use crate::test_utils::{assert_error_contains, generate_data_points};
    use crate::WORD_SIZE;
    use tempfile::TempDir;

    fn shared(block_size: usize) -> Rc<RefCell<InMemoryStorage>> {
        Rc::new(RefCell::new(InMemoryStorage::new(block_size).unwrap()))
    }

    /// The suites nominally use 100-byte payloads; where that does not
    /// fit the block's data area the payloads are generated at
    /// capacity instead.
    fn payload_size(block_size: usize) -> usize {
        value_capacity(block_size).min(100)
    }

    fn populate(
        storage: &Rc<RefCell<InMemoryStorage>>,
        block_size: usize,
        duplicates: usize,
    ) -> (Tree<InMemoryStorage>, Vec<(Key, Vec<u8>)>) {
        let data = generate_data_points(5, 15, payload_size(block_size), duplicates);
        let tree = Tree::build(Rc::clone(storage), &data).unwrap();
        (tree, data)
    }

    fn initialization(block_size: usize) {
        let storage = shared(block_size);
        let data = generate_data_points(5, 7, payload_size(block_size), 1);
        assert!(Tree::build(storage, &data).is_ok());
    }

    fn read_data_layer(block_size: usize) {
        let storage = shared(block_size);
        let data = generate_data_points(5, 7, payload_size(block_size), 1);
        let tree = Tree::build(Rc::clone(&storage), &data).unwrap();

        let mut current = tree.leftmost_data_block;
        for (key, value) in &data {
            let data_block = tree.read_block(current).unwrap().into_data(current).unwrap();
            assert_eq!(data_block.key, *key);
            assert_eq!(&data_block.value, value);
            current = data_block.next;
        }
        assert_eq!(current, EMPTY);
    }

    fn push_layer(block_size: usize) {
        let storage = shared(block_size);
        let fanout = node_capacity(block_size);
        let layer: Vec<(Key, Address)> = (0..2 * fanout as Key + 1).map(|i| (i, i * 1000)).collect();

        let pushed =
            Tree::<InMemoryStorage>::push_layer(&storage, &layer, block_size, fanout).unwrap();
        assert_eq!(pushed.len(), 3);

        let mut seen = 0;
        for (bound, address) in &pushed {
            let raw = storage.borrow_mut().get(*address).unwrap();
            let pairs = Block::decode(*address, &raw)
                .unwrap()
                .into_node(*address)
                .unwrap();
            for (key, child) in &pairs {
                assert!(key <= bound);
                assert_eq!(*child, key * 1000);
                seen += 1;
            }
            assert_eq!(pairs.last().map(|pair| pair.0), Some(*bound));
        }
        assert_eq!(seen, layer.len());
    }

    fn basic_search(block_size: usize) {
        let storage = shared(block_size);
        let (tree, data) = populate(&storage, block_size, 1);

        let returned = tree.search(10).unwrap();
        let expected: Vec<Vec<u8>> = data
            .iter()
            .filter(|(key, _)| *key == 10)
            .map(|(_, value)| value.clone())
            .collect();
        assert_eq!(returned, expected);
        assert_eq!(returned.len(), 1);
    }

    fn search_not_found(block_size: usize) {
        let storage = shared(block_size);
        let (tree, _) = populate(&storage, block_size, 1);

        assert!(tree.search(20).unwrap().is_empty());
        assert!(tree.search(0).unwrap().is_empty());
        assert!(tree.search_range(0, 4).unwrap().is_empty());
        assert!(tree.search_range(16, 100).unwrap().is_empty());
    }

    fn search_duplicates(block_size: usize) {
        let storage = shared(block_size);
        let (tree, data) = populate(&storage, block_size, 3);

        let returned = tree.search(10).unwrap();
        let expected: Vec<Vec<u8>> = data
            .iter()
            .filter(|(key, _)| *key == 10)
            .map(|(_, value)| value.clone())
            .collect();
        assert_eq!(returned.len(), 3);
        assert_eq!(returned, expected);
    }

    fn search_range_duplicates(block_size: usize) {
        let storage = shared(block_size);
        let (tree, data) = populate(&storage, block_size, 3);

        let returned = tree.search_range(8, 11).unwrap();
        let expected: Vec<Vec<u8>> = data
            .iter()
            .filter(|(key, _)| (8..=11).contains(key))
            .map(|(_, value)| value.clone())
            .collect();
        assert_eq!(returned.len(), 12);
        assert_eq!(returned, expected);
    }

    fn search_all(block_size: usize) {
        let storage = shared(block_size);
        let (tree, data) = populate(&storage, block_size, 1);

        let returned = tree.search_range(5, 15).unwrap();
        let expected: Vec<Vec<u8>> = data.iter().map(|(_, value)| value.clone()).collect();
        assert_eq!(returned, expected);
    }

    fn search_inverted_range(block_size: usize) {
        let storage = shared(block_size);
        let (tree, _) = populate(&storage, block_size, 1);
        assert!(tree.search_range(11, 8).unwrap().is_empty());
    }

    fn single_record(block_size: usize) {
        let storage = shared(block_size);
        let data = generate_data_points(5, 5, payload_size(block_size), 1);
        let tree = Tree::build(Rc::clone(&storage), &data).unwrap();

        // Degenerate tree: the root is the single data block.
        assert_eq!(tree.root, tree.leftmost_data_block);
        assert_eq!(tree.search(5).unwrap(), vec![data[0].1.clone()]);
        tree.check_consistency().unwrap();
    }

    fn empty_batch_opens_existing(block_size: usize) {
        let storage = shared(block_size);
        let (_, data) = populate(&storage, block_size, 1);

        let reopened = Tree::build(Rc::clone(&storage), &[]).unwrap();
        let expected: Vec<Vec<u8>> = data.iter().map(|(_, value)| value.clone()).collect();
        assert_eq!(reopened.search_range(5, 15).unwrap(), expected);
    }

    fn file_reopen(block_size: usize) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tree.bin");
        let data = generate_data_points(5, 15, payload_size(block_size), 1);

        let storage = Rc::new(RefCell::new(
            FileStorage::new(block_size, &path, true).unwrap(),
        ));
        let tree = Tree::build(storage, &data).unwrap();
        drop(tree);

        let storage = Rc::new(RefCell::new(
            FileStorage::new(block_size, &path, false).unwrap(),
        ));
        let tree = Tree::open(storage).unwrap();

        let expected: Vec<Vec<u8>> = data.iter().map(|(_, value)| value.clone()).collect();
        assert_eq!(tree.search_range(5, 15).unwrap(), expected);
        tree.check_consistency().unwrap();
    }

    fn consistency_ok(block_size: usize) {
        let storage = shared(block_size);
        let (tree, _) = populate(&storage, block_size, 1);
        tree.check_consistency().unwrap();
    }

    fn consistency_wrong_block_type(block_size: usize) {
        let storage = shared(block_size);
        let (tree, _) = populate(&storage, block_size, 1);

        let mut raw = storage.borrow_mut().get(tree.root).unwrap();
        raw[0] = 0xff;
        storage.borrow_mut().set(tree.root, &raw).unwrap();

        assert_error_contains(tree.check_consistency(), "block type");
    }

    fn consistency_data_block_pointer(block_size: usize) {
        let storage = shared(block_size);
        let (tree, _) = populate(&storage, block_size, 1);

        let leftmost = tree.leftmost_data_block;
        let mut raw = storage.borrow_mut().get(leftmost).unwrap();
        write_word(&mut raw, 1, EMPTY);
        storage.borrow_mut().set(leftmost, &raw).unwrap();

        assert_error_contains(tree.check_consistency(), "data block");
    }

    fn consistency_data_block_key(block_size: usize) {
        let storage = shared(block_size);
        let (tree, _) = populate(&storage, block_size, 1);

        let leftmost = tree.leftmost_data_block;
        let mut raw = storage.borrow_mut().get(leftmost).unwrap();
        write_word(&mut raw, 1 + WORD_SIZE, 0);
        storage.borrow_mut().set(leftmost, &raw).unwrap();

        assert_error_contains(tree.check_consistency(), "key");
    }

    macro_rules! tree_tests_for_block_size {
        ($block_size:expr) => {
            paste::paste! {
                mod [<block_size_ $block_size>] {
                    #[test]
                    fn initialization() {
                        super::initialization($block_size);
                    }

                    #[test]
                    fn read_data_layer() {
                        super::read_data_layer($block_size);
                    }

                    #[test]
                    fn push_layer() {
                        super::push_layer($block_size);
                    }

                    #[test]
                    fn basic_search() {
                        super::basic_search($block_size);
                    }

                    #[test]
                    fn search_not_found() {
                        super::search_not_found($block_size);
                    }

                    #[test]
                    fn search_duplicates() {
                        super::search_duplicates($block_size);
                    }

                    #[test]
                    fn search_range_duplicates() {
                        super::search_range_duplicates($block_size);
                    }

                    #[test]
                    fn search_all() {
                        super::search_all($block_size);
                    }

                    #[test]
                    fn search_inverted_range() {
                        super::search_inverted_range($block_size);
                    }

                    #[test]
                    fn single_record() {
                        super::single_record($block_size);
                    }

                    #[test]
                    fn empty_batch_opens_existing() {
                        super::empty_batch_opens_existing($block_size);
                    }

                    #[test]
                    fn file_reopen() {
                        super::file_reopen($block_size);
                    }

                    #[test]
                    fn consistency_ok() {
                        super::consistency_ok($block_size);
                    }

                    #[test]
                    fn consistency_wrong_block_type() {
                        super::consistency_wrong_block_type($block_size);
                    }

                    #[test]
                    fn consistency_data_block_pointer() {
                        super::consistency_data_block_pointer($block_size);
                    }

                    #[test]
                    fn consistency_data_block_key() {
                        super::consistency_data_block_key($block_size);
                    }
                }
            }
        };
    }

    tree_tests_for_block_size!(64);
    tree_tests_for_block_size!(128);
    tree_tests_for_block_size!(256);

    #[test]
    fn block_size_too_small() {
        let storage = shared(4 * WORD_SIZE);
        assert_error_contains(
            Tree::build(Rc::clone(&storage), &[]),
            "block size too small",
        );

        let data = generate_data_points(5, 7, 4, 1);
        assert_error_contains(Tree::build(storage, &data), "block size too small");
    }

    #[test]
    fn oversized_value_rejected() {
        let storage = shared(64);
        let data = generate_data_points(5, 7, 100, 1);
        assert_error_contains(Tree::build(storage, &data), "block size too small");
    }

    #[test]
    fn unsorted_batch_rejected() {
        let storage = shared(256);
        let mut data = generate_data_points(5, 7, 16, 1);
        data.reverse();
        assert_error_contains(Tree::build(storage, &data), "ascending");
    }

    #[test]
    fn mixed_value_lengths_rejected() {
        let storage = shared(256);
        let mut data = generate_data_points(5, 7, 16, 1);
        data[1].1.push(0);
        assert_error_contains(Tree::build(storage, &data), "identical length");
    }

    #[test]
    fn open_over_fresh_storage_is_empty() {
        let storage = shared(64);
        let tree = Tree::open(storage).unwrap();
        assert_eq!(tree.root, EMPTY);
        assert!(tree.search(5).unwrap().is_empty());
        assert!(tree.search_range(0, 100).unwrap().is_empty());
        tree.check_consistency().unwrap();
    }
}
