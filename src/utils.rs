// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Byte-level helpers shared by the block codecs.

use crate::WORD_SIZE;
use rand::{CryptoRng, Rng};

/// Reads the little-endian word starting at `offset`.
pub(crate) fn read_word(buf: &[u8], offset: usize) -> u64 {
    let mut word = [0u8; WORD_SIZE];
    word.copy_from_slice(&buf[offset..offset + WORD_SIZE]);
    u64::from_le_bytes(word)
}

/// Writes `value` as a little-endian word starting at `offset`.
pub(crate) fn write_word(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + WORD_SIZE].copy_from_slice(&value.to_le_bytes());
}

/// Returns `len` uniformly random bytes.
pub(crate) fn random_bytes<R: Rng + CryptoRng>(len: usize, rng: &mut R) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn word_round_trip() {
        let mut buf = vec![0u8; 24];
        write_word(&mut buf, 8, 0x0102_0304_0506_0708);
        assert_eq!(read_word(&buf, 8), 0x0102_0304_0506_0708);
        assert_eq!(read_word(&buf, 0), 0);
        assert_eq!(read_word(&buf, 16), 0);
    }

    #[test]
    fn word_is_little_endian() {
        let mut buf = vec![0u8; WORD_SIZE];
        write_word(&mut buf, 0, 1);
        assert_eq!(buf[0], 1);
        assert_eq!(&buf[1..], &[0u8; WORD_SIZE - 1]);
    }

    #[test]
    fn random_bytes_has_requested_length() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(random_bytes(0, &mut rng).len(), 0);
        assert_eq!(random_bytes(56, &mut rng).len(), 56);
    }
}
