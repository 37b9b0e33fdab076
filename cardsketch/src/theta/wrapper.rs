// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use crate::codec::SketchSlice;
use crate::codec::assert::ensure_preamble_longs_in_range;
use crate::codec::assert::insufficient_data;
use crate::codec::family::Family;
use crate::common::NumStdDev;
use crate::common::binomial_bounds;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::compute_seed_hash;
use crate::theta::bit_pack::BLOCK_WIDTH;
use crate::theta::bit_pack::BitUnpacker;
use crate::theta::bit_pack::unpack_bits_block;
use crate::theta::hash_table::MAX_THETA;
use crate::theta::serialization;
use crate::theta::serialization::V2_PREAMBLE_EMPTY;
use crate::theta::serialization::V2_PREAMBLE_ESTIMATE;
use crate::theta::serialization::V2_PREAMBLE_PRECISE;

/// A read-only view over a serialized compact Theta sketch.
///
/// The view borrows the buffer and never copies the retained entries; its
/// iterator decodes them on the fly, including the bit-packed serial
/// version 4 images. This makes it possible to scan sketch images from a
/// mapped file or a network buffer without paying for deserialization.
///
/// The view must not outlive the buffer it wraps; the borrow checker
/// enforces this through the lifetime parameter.
#[derive(Debug, Clone)]
pub struct WrappedCompactThetaSketch<'a> {
    // raw entry region of the wrapped buffer
    payload: &'a [u8],
    num_entries: u32,
    // packed width of a delta entry, or 0 for plain 64-bit entries
    entry_bits: u8,
    theta: u64,
    seed_hash: u16,
    empty: bool,
    ordered: bool,
}

impl<'a> WrappedCompactThetaSketch<'a> {
    /// Wraps a serialized compact sketch, validating with the default seed.
    pub fn wrap(bytes: &'a [u8]) -> Result<Self, Error> {
        Self::wrap_with_seed(bytes, DEFAULT_UPDATE_SEED)
    }

    /// Wraps a serialized compact sketch, validating against the given seed.
    ///
    /// All serial versions (1 through 4) are accepted. The preamble is
    /// parsed eagerly so that corruption surfaces here rather than during
    /// iteration.
    pub fn wrap_with_seed(bytes: &'a [u8], seed: u64) -> Result<Self, Error> {
        let mut cursor = SketchSlice::new(bytes);
        let pre_longs = cursor
            .read_u8()
            .map_err(insufficient_data("preamble_longs"))?;
        let ser_ver = cursor
            .read_u8()
            .map_err(insufficient_data("serial_version"))?;
        let family_id = cursor.read_u8().map_err(insufficient_data("family_id"))?;

        Family::THETA.validate_id(family_id)?;
        ensure_preamble_longs_in_range(
            Family::THETA.min_pre_longs..=Family::THETA.max_pre_longs,
            pre_longs,
        )?;

        match ser_ver {
            1 => Self::wrap_v1(bytes, cursor, seed),
            2 => Self::wrap_v2(bytes, pre_longs, cursor, seed),
            3 => Self::wrap_v3(bytes, pre_longs, cursor, seed),
            4 => Self::wrap_v4(bytes, pre_longs, cursor, seed),
            _ => Err(Error::deserial(format!(
                "unsupported serial version: expected 1, 2, 3, or 4, got {ser_ver}",
            ))),
        }
    }

    fn wrap_v1(
        bytes: &'a [u8],
        mut cursor: SketchSlice<'_>,
        expected_seed: u64,
    ) -> Result<Self, Error> {
        let seed_hash = compute_seed_hash(expected_seed);
        cursor.read_u8().map_err(insufficient_data("<unused>"))?;
        cursor
            .read_u32_le()
            .map_err(insufficient_data("<unused_u32_0>"))?;
        let num_entries = cursor
            .read_u32_le()
            .map_err(insufficient_data("num_entries"))?;
        cursor
            .read_u32_le()
            .map_err(insufficient_data("<unused_u32_1>"))?;
        let theta = cursor
            .read_u64_le()
            .map_err(insufficient_data("theta_long"))?;
        let empty = num_entries == 0 && theta == MAX_THETA;
        Self::with_plain_entries(
            bytes,
            cursor.position(),
            num_entries,
            theta,
            seed_hash,
            empty,
            true,
        )
    }

    fn wrap_v2(
        bytes: &'a [u8],
        pre_longs: u8,
        mut cursor: SketchSlice<'_>,
        expected_seed: u64,
    ) -> Result<Self, Error> {
        cursor.read_u8().map_err(insufficient_data("<unused>"))?;
        cursor
            .read_u16_le()
            .map_err(insufficient_data("<unused_u16>"))?;
        let seed_hash = cursor
            .read_u16_le()
            .map_err(insufficient_data("seed_hash"))?;
        let expected_seed_hash = compute_seed_hash(expected_seed);
        if seed_hash != expected_seed_hash {
            return Err(Error::deserial(format!(
                "incompatible seed hash: expected {expected_seed_hash}, got {seed_hash}",
            )));
        }

        match pre_longs {
            V2_PREAMBLE_EMPTY => {
                Self::with_plain_entries(bytes, cursor.position(), 0, MAX_THETA, seed_hash, true, true)
            }
            V2_PREAMBLE_PRECISE | V2_PREAMBLE_ESTIMATE => {
                let num_entries = cursor
                    .read_u32_le()
                    .map_err(insufficient_data("num_entries"))?;
                cursor
                    .read_u32_le()
                    .map_err(insufficient_data("<unused_u32>"))?;
                let theta = if pre_longs == V2_PREAMBLE_ESTIMATE {
                    cursor
                        .read_u64_le()
                        .map_err(insufficient_data("theta_long"))?
                } else {
                    MAX_THETA
                };
                let empty = num_entries == 0 && theta == MAX_THETA;
                Self::with_plain_entries(
                    bytes,
                    cursor.position(),
                    num_entries,
                    theta,
                    seed_hash,
                    empty,
                    true,
                )
            }
            _ => Err(Error::invalid_preamble_longs(V2_PREAMBLE_ESTIMATE, pre_longs)),
        }
    }

    fn wrap_v3(
        bytes: &'a [u8],
        pre_longs: u8,
        mut cursor: SketchSlice<'_>,
        expected_seed: u64,
    ) -> Result<Self, Error> {
        cursor
            .read_u16_le()
            .map_err(insufficient_data("<unused_u16>"))?;
        let flags = cursor.read_u8().map_err(insufficient_data("flags"))?;
        let seed_hash = cursor
            .read_u16_le()
            .map_err(insufficient_data("seed_hash"))?;

        let empty = (flags & serialization::FLAGS_IS_EMPTY) != 0;
        let ordered = (flags & serialization::FLAGS_IS_ORDERED) != 0;
        if empty {
            return Self::with_plain_entries(
                bytes,
                cursor.position(),
                0,
                MAX_THETA,
                seed_hash,
                true,
                ordered,
            );
        }

        let expected_seed_hash = compute_seed_hash(expected_seed);
        if seed_hash != expected_seed_hash {
            return Err(Error::deserial(format!(
                "incompatible seed hash: expected {expected_seed_hash}, got {seed_hash}",
            )));
        }

        let mut theta = MAX_THETA;
        let num_entries = if pre_longs == 1 {
            // single-item form
            1
        } else {
            let num_entries = cursor
                .read_u32_le()
                .map_err(insufficient_data("num_entries"))?;
            cursor
                .read_u32_le()
                .map_err(insufficient_data("<unused_u32>"))?;
            if pre_longs > 2 {
                theta = cursor
                    .read_u64_le()
                    .map_err(insufficient_data("theta_long"))?;
            }
            num_entries
        };
        Self::with_plain_entries(
            bytes,
            cursor.position(),
            num_entries,
            theta,
            seed_hash,
            false,
            ordered,
        )
    }

    fn wrap_v4(
        bytes: &'a [u8],
        pre_longs: u8,
        mut cursor: SketchSlice<'_>,
        expected_seed: u64,
    ) -> Result<Self, Error> {
        let entry_bits = cursor.read_u8().map_err(insufficient_data("entry_bits"))?;
        let num_entries_bytes = cursor
            .read_u8()
            .map_err(insufficient_data("num_entries_bytes"))?;
        let flags = cursor.read_u8().map_err(insufficient_data("flags"))?;
        let seed_hash = cursor
            .read_u16_le()
            .map_err(insufficient_data("seed_hash"))?;
        let empty = (flags & serialization::FLAGS_IS_EMPTY) != 0;
        let ordered = (flags & serialization::FLAGS_IS_ORDERED) != 0;
        if !empty {
            let expected_seed_hash = compute_seed_hash(expected_seed);
            if seed_hash != expected_seed_hash {
                return Err(Error::deserial(format!(
                    "incompatible seed hash: expected {expected_seed_hash}, got {seed_hash}",
                )));
            }
        }
        if !(1..=63).contains(&entry_bits) {
            return Err(Error::deserial(format!(
                "corrupted: entry bits out of range: {entry_bits}"
            )));
        }
        if !(1..=4).contains(&num_entries_bytes) {
            return Err(Error::deserial(format!(
                "corrupted: num entries bytes out of range: {num_entries_bytes}"
            )));
        }
        let theta = if pre_longs > 1 {
            cursor
                .read_u64_le()
                .map_err(insufficient_data("theta_long"))?
        } else {
            MAX_THETA
        };

        let mut num_entries = 0u32;
        for i in 0..num_entries_bytes {
            let entry_count_byte = cursor
                .read_u8()
                .map_err(insufficient_data("num_entries_byte"))?;
            num_entries |= (entry_count_byte as u32) << ((i as u32) << 3);
        }

        let payload = &bytes[cursor.position()..];
        let whole_blocks = (num_entries as usize) / BLOCK_WIDTH;
        let tail_entries = (num_entries as usize) % BLOCK_WIDTH;
        let needed = whole_blocks * entry_bits as usize
            + (tail_entries * entry_bits as usize).div_ceil(8);
        if payload.len() < needed {
            return Err(Error::insufficient_data("packed entries"));
        }

        Ok(Self {
            payload,
            num_entries,
            entry_bits,
            theta,
            seed_hash,
            empty,
            ordered,
        })
    }

    fn with_plain_entries(
        bytes: &'a [u8],
        offset: usize,
        num_entries: u32,
        theta: u64,
        seed_hash: u16,
        empty: bool,
        ordered: bool,
    ) -> Result<Self, Error> {
        let payload = &bytes[offset..];
        if payload.len() < num_entries as usize * 8 {
            return Err(Error::insufficient_data("entries"));
        }
        Ok(Self {
            payload,
            num_entries,
            entry_bits: 0,
            theta,
            seed_hash,
            empty,
            ordered,
        })
    }

    /// Returns true if the wrapped sketch is empty.
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Returns true if the wrapped entries are ordered (sorted ascending).
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Returns theta as a fraction (0.0 to 1.0).
    pub fn theta(&self) -> f64 {
        self.theta as f64 / MAX_THETA as f64
    }

    /// Returns theta as u64.
    pub fn theta64(&self) -> u64 {
        self.theta
    }

    /// Returns the number of retained entries.
    pub fn num_retained(&self) -> usize {
        self.num_entries as usize
    }

    /// Returns the 16-bit seed hash.
    pub fn seed_hash(&self) -> u16 {
        self.seed_hash
    }

    /// Returns true if the wrapped sketch is in estimation mode.
    pub fn is_estimation_mode(&self) -> bool {
        self.theta < MAX_THETA
    }

    /// Returns the cardinality estimate.
    pub fn estimate(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let num_retained = self.num_entries as f64;
        if self.theta == MAX_THETA {
            return num_retained;
        }
        num_retained / self.theta()
    }

    /// Returns the approximate lower error bound given the specified number of Standard Deviations.
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        if !self.is_estimation_mode() {
            return self.num_entries as f64;
        }
        binomial_bounds::lower_bound(self.num_entries as u64, self.theta(), num_std_dev)
            .expect("wrapped theta should always be valid")
    }

    /// Returns the approximate upper error bound given the specified number of Standard Deviations.
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        if !self.is_estimation_mode() {
            return self.num_entries as f64;
        }
        binomial_bounds::upper_bound(
            self.num_entries as u64,
            self.theta(),
            num_std_dev,
            self.is_empty(),
        )
        .expect("wrapped theta should always be valid")
    }

    /// Returns an iterator over the retained hash values, decoding them
    /// lazily from the wrapped buffer.
    pub fn iter(&self) -> WrappedThetaEntries<'a> {
        WrappedThetaEntries {
            payload: self.payload,
            entry_bits: self.entry_bits,
            num_entries: self.num_entries,
            index: 0,
            previous: 0,
            buffer: [0u64; BLOCK_WIDTH],
        }
    }
}

/// Iterator over the entries of a [`WrappedCompactThetaSketch`].
///
/// Bit-packed images are decoded through a small internal buffer, one block
/// of eight deltas at a time; plain images are read directly.
#[derive(Debug)]
pub struct WrappedThetaEntries<'a> {
    payload: &'a [u8],
    entry_bits: u8,
    num_entries: u32,
    index: u32,
    previous: u64,
    buffer: [u64; BLOCK_WIDTH],
}

impl WrappedThetaEntries<'_> {
    fn refill_buffer(&mut self) {
        let start = self.index as usize;
        let bits = self.entry_bits as usize;
        let block_offset = (start / BLOCK_WIDTH) * bits;
        if start + BLOCK_WIDTH <= self.num_entries as usize {
            unpack_bits_block(
                &mut self.buffer,
                &self.payload[block_offset..block_offset + bits],
                self.entry_bits,
            );
        } else {
            let rem = self.num_entries as usize - start;
            let mut unpacker = BitUnpacker::new(&self.payload[block_offset..]);
            for slot in self.buffer.iter_mut().take(rem) {
                *slot = unpacker.unpack_value(self.entry_bits);
            }
        }
    }
}

impl Iterator for WrappedThetaEntries<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.index >= self.num_entries {
            return None;
        }
        let value = if self.entry_bits == 0 {
            let offset = self.index as usize * 8;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&self.payload[offset..offset + 8]);
            u64::from_le_bytes(buf)
        } else {
            if self.index as usize % BLOCK_WIDTH == 0 {
                self.refill_buffer();
            }
            let delta = self.buffer[self.index as usize % BLOCK_WIDTH];
            self.previous += delta;
            self.previous
        };
        self.index += 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.num_entries - self.index) as usize;
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theta::CompactThetaSketch;
    use crate::theta::ThetaSketch;

    fn assert_wrapped_matches(compact: &CompactThetaSketch, bytes: &[u8]) {
        let wrapped = WrappedCompactThetaSketch::wrap(bytes).unwrap();
        assert_eq!(wrapped.is_empty(), compact.is_empty());
        assert_eq!(wrapped.is_ordered(), compact.is_ordered());
        assert_eq!(wrapped.num_retained(), compact.num_retained());
        assert_eq!(wrapped.theta64(), compact.theta64());
        assert_eq!(wrapped.seed_hash(), compact.seed_hash());
        assert!((wrapped.estimate() - compact.estimate()).abs() <= 1e-12);
        let wrapped_entries: Vec<u64> = wrapped.iter().collect();
        let compact_entries: Vec<u64> = compact.iter().collect();
        assert_eq!(wrapped_entries, compact_entries);
    }

    #[test]
    fn wrap_uncompressed_image() {
        let mut theta = ThetaSketch::builder().lg_k(12).build();
        for i in 0..500 {
            theta.update_i32(i);
        }
        let compact = theta.compact(true);
        assert_wrapped_matches(&compact, &compact.serialize());
    }

    #[test]
    fn wrap_compressed_image() {
        let mut theta = ThetaSketch::builder().lg_k(12).build();
        for i in 0..500 {
            theta.update_i32(i);
        }
        let compact = theta.compact(true);
        let bytes = compact.serialize_compressed();
        assert_eq!(bytes[1], 4);
        assert_wrapped_matches(&compact, &bytes);
    }

    #[test]
    fn wrap_compressed_image_with_tail() {
        let mut theta = ThetaSketch::builder().lg_k(12).build();
        for i in 0..13 {
            theta.update_i32(i);
        }
        let compact = theta.compact(true);
        assert_eq!(compact.num_retained() % 8, 5);
        assert_wrapped_matches(&compact, &compact.serialize_compressed());
    }

    #[test]
    fn wrap_estimation_mode_image() {
        let mut theta = ThetaSketch::builder().lg_k(5).build();
        for i in 0..5000 {
            theta.update_i32(i);
        }
        let compact = theta.compact(true);
        assert!(compact.is_estimation_mode());
        assert_wrapped_matches(&compact, &compact.serialize());
        assert_wrapped_matches(&compact, &compact.serialize_compressed());
    }

    #[test]
    fn wrap_empty_and_single_item_images() {
        let mut theta = ThetaSketch::builder().build();
        let empty = theta.compact(true);
        assert_wrapped_matches(&empty, &empty.serialize());

        theta.update_str("abc");
        let single = theta.compact(true);
        assert_eq!(single.serialize().len(), 16);
        assert_wrapped_matches(&single, &single.serialize());
    }

    #[test]
    fn wrap_rejects_seed_hash_mismatch() {
        let mut theta = ThetaSketch::builder().seed(7).build();
        theta.update_str("apple");
        let bytes = theta.compact(true).serialize();

        let err = WrappedCompactThetaSketch::wrap_with_seed(&bytes, 8).unwrap_err();
        assert!(err.message().contains("incompatible seed hash"));
    }

    #[test]
    fn wrap_rejects_truncated_image() {
        let mut theta = ThetaSketch::builder().lg_k(12).build();
        for i in 0..100 {
            theta.update_i32(i);
        }
        let compact = theta.compact(true);
        for serialized in [compact.serialize(), compact.serialize_compressed()] {
            let err = WrappedCompactThetaSketch::wrap(&serialized[..serialized.len() - 2]);
            assert!(err.is_err());
        }
    }
}
