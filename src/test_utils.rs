// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Shared fixtures for the unit test suites.

use crate::{Key, StoreError};

/// Repeats `word` to fill exactly `size` bytes.
pub(crate) fn generate_data_bytes(word: &str, size: usize) -> Vec<u8> {
    word.as_bytes().iter().copied().cycle().take(size).collect()
}

/// The record batch the tree suites share: keys `from..=to` with
/// `duplicates` records per key, every value `size` bytes derived from
/// the key and the duplicate index so insertion order is observable.
pub(crate) fn generate_data_points(
    from: Key,
    to: Key,
    size: usize,
    duplicates: usize,
) -> Vec<(Key, Vec<u8>)> {
    let mut data = Vec::new();
    for key in from..=to {
        for duplicate in 0..duplicates {
            data.push((key, generate_data_bytes(&format!("{key}-{duplicate}-"), size)));
        }
    }
    data
}

/// Asserts that `result` failed with a message containing `needle`.
pub(crate) fn assert_error_contains<T: std::fmt::Debug>(
    result: Result<T, StoreError>,
    needle: &str,
) {
    let error = match result {
        Ok(value) => panic!("expected a failure, got {value:?}"),
        Err(error) => error,
    };
    let message = error.to_string();
    assert!(
        message.contains(needle),
        "error message does not contain {needle:?}: {message}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_bytes_fill_exactly() {
        let bytes = generate_data_bytes("10-0-", 12);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes, b"10-0-10-0-10");
    }

    #[test]
    fn data_points_are_sorted_with_duplicates() {
        let data = generate_data_points(5, 7, 16, 3);
        assert_eq!(data.len(), 9);
        assert!(data.windows(2).all(|pair| pair[0].0 <= pair[1].0));
        // Duplicate values differ, so result order is observable.
        assert_ne!(data[0].1, data[1].1);
    }
}
