// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Geometry of the ORAM bucket tree.
//!
//! Buckets form a complete binary tree stored in level order: the root
//! is bucket `1`, bucket `0` exists in storage but lies on no path, and
//! the leaves occupy the bottom row starting at `2^(height - 1)`.

use crate::Leaf;
use rand::{CryptoRng, Rng};

/// The index of the bucket at `level` on the path from the root to
/// `leaf` in a tree of `height` levels. Level `0` is the root.
pub(crate) fn bucket_for_level_leaf(height: u32, level: u32, leaf: Leaf) -> u64 {
    debug_assert!(level < height);
    (leaf + (1u64 << (height - 1))) >> (height - 1 - level)
}

/// Whether a block currently mapped to `block_leaf` may be placed at
/// `level` of the path to `path_leaf`: the two paths must pass through
/// the same bucket there.
pub(crate) fn can_include(height: u32, block_leaf: Leaf, path_leaf: Leaf, level: u32) -> bool {
    bucket_for_level_leaf(height, level, block_leaf)
        == bucket_for_level_leaf(height, level, path_leaf)
}

/// Draws a leaf uniformly from `[0, 2^(height - 1))`.
pub(crate) fn random_leaf<R: Rng + CryptoRng>(height: u32, rng: &mut R) -> Leaf {
    rng.gen_range(0..(1u64 << (height - 1)))
}
