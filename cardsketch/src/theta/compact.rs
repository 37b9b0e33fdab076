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

use std::fmt::Write as _;

use crate::codec::SketchBytes;
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
use crate::theta::bit_pack::BitPacker;
use crate::theta::bit_pack::BitUnpacker;
use crate::theta::bit_pack::pack_bits_block;
use crate::theta::bit_pack::unpack_bits_block;
use crate::theta::hash_table::MAX_THETA;
use crate::theta::serialization;
use crate::theta::serialization::V2_PREAMBLE_EMPTY;
use crate::theta::serialization::V2_PREAMBLE_ESTIMATE;
use crate::theta::serialization::V2_PREAMBLE_PRECISE;

/// Compact (immutable) theta sketch.
///
/// This is the serialization-friendly form of a theta sketch: a compact array of retained hash
/// values plus theta and a 16-bit seed hash. It can be ordered (sorted ascending) or unordered.
///
/// Ordered sketches with more than one entry serialize to a compressed
/// format (serial version 4) that bit-packs the deltas between consecutive
/// keys; everything else uses the fixed-width version 3 layout. Versions 1
/// and 2 are accepted on input for compatibility with old images.
#[derive(Clone, Debug)]
pub struct CompactThetaSketch {
    entries: Vec<u64>,
    theta: u64,
    seed_hash: u16,
    ordered: bool,
    empty: bool,
}

impl CompactThetaSketch {
    pub(crate) fn new(
        entries: Vec<u64>,
        theta: u64,
        seed_hash: u16,
        ordered: bool,
        empty: bool,
    ) -> Self {
        Self {
            entries,
            theta,
            seed_hash,
            ordered,
            empty,
        }
    }

    /// Returns the cardinality estimate.
    pub fn estimate(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let num_retained = self.num_retained() as f64;
        if self.theta == MAX_THETA {
            return num_retained;
        }
        let theta = self.theta as f64 / MAX_THETA as f64;
        num_retained / theta
    }

    /// Returns theta as a fraction (0.0 to 1.0).
    pub fn theta(&self) -> f64 {
        self.theta as f64 / MAX_THETA as f64
    }

    /// Returns theta as u64.
    pub fn theta64(&self) -> u64 {
        self.theta
    }

    /// Returns true if this sketch is empty.
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Returns true if this sketch is in estimation mode.
    pub fn is_estimation_mode(&self) -> bool {
        self.theta < MAX_THETA
    }

    /// Returns the number of retained entries.
    pub fn num_retained(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if retained entries are ordered (sorted ascending).
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Returns the 16-bit seed hash.
    pub fn seed_hash(&self) -> u16 {
        self.seed_hash
    }

    /// Return iterator over retained hash values.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().copied()
    }

    /// Returns the approximate lower error bound given the specified number of Standard Deviations.
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        if !self.is_estimation_mode() {
            return self.num_retained() as f64;
        }
        binomial_bounds::lower_bound(self.num_retained() as u64, self.theta(), num_std_dev)
            .expect("compact theta should always be valid")
    }

    /// Returns the approximate upper error bound given the specified number of Standard Deviations.
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        if !self.is_estimation_mode() {
            return self.num_retained() as f64;
        }
        binomial_bounds::upper_bound(
            self.num_retained() as u64,
            self.theta(),
            num_std_dev,
            self.is_empty(),
        )
        .expect("compact theta should always be valid")
    }

    /// Produce a human-readable summary of this sketch.
    pub fn to_string(&self, print_items: bool) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "### Compact Theta sketch summary:");
        let _ = writeln!(s, "   num retained keys    : {}", self.num_retained());
        let _ = writeln!(s, "   seed hash            : {:#x}", self.seed_hash());
        let _ = writeln!(s, "   empty?               : {}", self.is_empty());
        let _ = writeln!(s, "   ordered?             : {}", self.is_ordered());
        let _ = writeln!(
            s,
            "   estimation mode?     : {}",
            self.is_estimation_mode()
        );
        let _ = writeln!(s, "   theta (fraction)     : {}", self.theta());
        let _ = writeln!(s, "   theta (raw 64-bit)   : {}", self.theta64());
        let _ = writeln!(s, "   estimate             : {}", self.estimate());
        let _ = writeln!(s, "### End sketch summary");
        if print_items {
            let _ = writeln!(s, "### Retained keys");
            for key in self.iter() {
                let _ = writeln!(s, "   {key}");
            }
            let _ = writeln!(s, "### End retained keys");
        }
        s
    }

    fn preamble_longs(&self, compressed: bool) -> u8 {
        if compressed {
            if self.is_estimation_mode() { 2 } else { 1 }
        } else if self.is_estimation_mode() {
            3
        } else if self.is_empty() || self.entries.len() == 1 {
            1
        } else {
            2
        }
    }

    fn is_suitable_for_compression(&self) -> bool {
        self.ordered
            && !self.entries.is_empty()
            && (self.entries.len() != 1 || self.is_estimation_mode())
    }

    /// Computes the size in bytes required to serialize the current state.
    ///
    /// Computing the compressed size is more expensive because it requires
    /// scanning all retained entries for the packing width.
    pub fn serialized_size_bytes(&self, compressed: bool) -> usize {
        if compressed && self.is_suitable_for_compression() {
            let entry_bits = Self::compute_entry_bits(&self.entries);
            let num_entries_bytes = Self::num_entries_bytes(self.entries.len());
            self.compressed_size_bytes(entry_bits, num_entries_bytes)
        } else {
            (self.preamble_longs(false) as usize) * 8 + 8 * self.entries.len()
        }
    }

    fn compressed_size_bytes(&self, entry_bits: u8, num_entries_bytes: u8) -> usize {
        let whole_blocks = self.entries.len() / BLOCK_WIDTH;
        let tail_entries = self.entries.len() % BLOCK_WIDTH;
        (self.preamble_longs(true) as usize) * 8
            + num_entries_bytes as usize
            + whole_blocks * entry_bits as usize
            + (tail_entries * entry_bits as usize).div_ceil(8)
    }

    /// Serializes this sketch in compressed form if applicable.
    ///
    /// This uses serial version 4 when the sketch is ordered and suitable for compression, and
    /// falls back to the uncompressed serial version 3 otherwise.
    pub fn serialize_compressed(&self) -> Vec<u8> {
        self.serialize_compressed_with_header(0)
    }

    /// Like [`Self::serialize_compressed`], reserving `header_size_bytes` of
    /// zeroed prefix owned by the caller.
    pub fn serialize_compressed_with_header(&self, header_size_bytes: usize) -> Vec<u8> {
        if self.is_suitable_for_compression() {
            self.serialize_v4(header_size_bytes)
        } else {
            self.serialize_with_header(header_size_bytes)
        }
    }

    /// Serializes this sketch into the uncompressed compact theta format.
    pub fn serialize(&self) -> Vec<u8> {
        self.serialize_with_header(0)
    }

    /// Like [`Self::serialize`], reserving `header_size_bytes` of zeroed
    /// prefix owned by the caller.
    pub fn serialize_with_header(&self, header_size_bytes: usize) -> Vec<u8> {
        let mut bytes =
            SketchBytes::with_capacity(header_size_bytes + self.serialized_size_bytes(false));
        bytes.write_zeros(header_size_bytes);

        let pre_longs = self.preamble_longs(false);
        bytes.write_u8(pre_longs);
        bytes.write_u8(serialization::UNCOMPRESSED_SERIAL_VERSION);
        bytes.write_u8(Family::THETA.id);
        bytes.write_u8(0); // unused for compact
        bytes.write_u8(0); // unused for compact

        let mut flags = 0u8;
        flags |= serialization::FLAGS_IS_READ_ONLY;
        flags |= serialization::FLAGS_IS_COMPACT;
        if self.is_empty() {
            flags |= serialization::FLAGS_IS_EMPTY;
        }
        if self.is_ordered() {
            flags |= serialization::FLAGS_IS_ORDERED;
        }
        bytes.write_u8(flags);

        bytes.write_u16_le(self.seed_hash);

        if pre_longs > 1 {
            bytes.write_u32_le(self.entries.len() as u32);
            bytes.write_u32_le(0); // not used by compact sketches
        }
        if self.is_estimation_mode() {
            bytes.write_u64_le(self.theta);
        }
        for hash in self.entries.iter() {
            bytes.write_u64_le(*hash);
        }
        bytes.into_bytes()
    }

    fn serialize_v4(&self, header_size_bytes: usize) -> Vec<u8> {
        let pre_longs = self.preamble_longs(true);
        let entry_bits = Self::compute_entry_bits(&self.entries);
        let num_entries_bytes = Self::num_entries_bytes(self.entries.len());

        let out_bytes = self.compressed_size_bytes(entry_bits, num_entries_bytes);
        let mut bytes = SketchBytes::with_capacity(header_size_bytes + out_bytes);
        bytes.write_zeros(header_size_bytes);

        bytes.write_u8(pre_longs);
        bytes.write_u8(serialization::COMPRESSED_SERIAL_VERSION);
        bytes.write_u8(Family::THETA.id);
        bytes.write_u8(entry_bits);
        bytes.write_u8(num_entries_bytes);

        let mut flags = 0u8;
        flags |= serialization::FLAGS_IS_READ_ONLY;
        flags |= serialization::FLAGS_IS_COMPACT;
        flags |= serialization::FLAGS_IS_ORDERED;
        bytes.write_u8(flags);

        bytes.write_u16_le(self.seed_hash);
        if self.is_estimation_mode() {
            bytes.write_u64_le(self.theta);
        }

        let mut n = self.entries.len() as u32;
        for _ in 0..num_entries_bytes {
            bytes.write_u8((n & 0xff) as u8);
            n >>= 8;
        }

        // pack whole blocks of deltas
        let mut previous = 0u64;
        let mut i = 0usize;
        let mut block = vec![0u8; entry_bits as usize];
        while i + BLOCK_WIDTH <= self.entries.len() {
            let mut deltas = [0u64; BLOCK_WIDTH];
            for (j, delta) in deltas.iter_mut().enumerate() {
                let entry = self.entries[i + j];
                *delta = entry - previous;
                previous = entry;
            }
            block.fill(0);
            pack_bits_block(&deltas, &mut block, entry_bits);
            bytes.write(&block);
            i += BLOCK_WIDTH;
        }

        // pack the remaining deltas if fewer than 8 of them are left
        if i < self.entries.len() {
            let mut tail = vec![0u8; entry_bits as usize];
            let mut packer = BitPacker::new(&mut tail);
            while i < self.entries.len() {
                let delta = self.entries[i] - previous;
                previous = self.entries[i];
                packer.pack_value(delta, entry_bits);
                i += 1;
            }
            let bytes_used = packer.byte_used();
            bytes.write(&tail[0..bytes_used]);
        }

        bytes.into_bytes()
    }

    fn compute_entry_bits(entries: &[u64]) -> u8 {
        let mut previous = 0u64;
        let mut ored = 0u64;
        for &entry in entries {
            let delta = entry - previous;
            ored |= delta;
            previous = entry;
        }
        (64 - ored.leading_zeros()) as u8
    }

    fn num_entries_bytes(num_entries: usize) -> u8 {
        let n = num_entries as u32;
        let bits = u32::BITS - n.leading_zeros();
        bits.div_ceil(8) as u8
    }

    /// Deserializes a compact theta sketch from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Self::deserialize_with_seed(bytes, DEFAULT_UPDATE_SEED)
    }

    /// Deserializes a compact theta sketch from bytes using the provided expected seed.
    pub fn deserialize_with_seed(bytes: &[u8], seed: u64) -> Result<Self, Error> {
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
            1 => Self::deserialize_v1(cursor, seed),
            2 => Self::deserialize_v2(pre_longs, cursor, seed),
            3 => Self::deserialize_v3(pre_longs, cursor, seed),
            4 => Self::deserialize_v4(pre_longs, cursor, seed),
            _ => Err(Error::deserial(format!(
                "unsupported serial version: expected 1, 2, 3, or 4, got {ser_ver}",
            ))),
        }
    }

    fn read_entries(
        cursor: &mut SketchSlice<'_>,
        num_entries: usize,
        theta: u64,
    ) -> Result<Vec<u64>, Error> {
        let mut entries = Vec::with_capacity(num_entries);
        for _ in 0..num_entries {
            let hash = cursor.read_u64_le().map_err(insufficient_data("entries"))?;
            if hash == 0 || hash >= theta {
                return Err(Error::deserial("corrupted: invalid retained hash value"));
            }
            entries.push(hash);
        }
        Ok(entries)
    }

    fn deserialize_v1(mut cursor: SketchSlice<'_>, expected_seed: u64) -> Result<Self, Error> {
        // Version 1 images carry no seed hash, so the expectation is adopted.
        let seed_hash = compute_seed_hash(expected_seed);
        cursor.read_u8().map_err(insufficient_data("<unused>"))?;
        cursor
            .read_u32_le()
            .map_err(insufficient_data("<unused_u32_0>"))?;
        let num_entries = cursor
            .read_u32_le()
            .map_err(insufficient_data("num_entries"))? as usize;
        cursor
            .read_u32_le()
            .map_err(insufficient_data("<unused_u32_1>"))?;
        let theta = cursor
            .read_u64_le()
            .map_err(insufficient_data("theta_long"))?;

        let empty = num_entries == 0 && theta == MAX_THETA;
        if empty {
            return Ok(Self {
                entries: vec![],
                theta,
                seed_hash,
                ordered: true,
                empty: true,
            });
        }

        let entries = Self::read_entries(&mut cursor, num_entries, theta)?;

        Ok(Self {
            entries,
            theta,
            seed_hash,
            ordered: true,
            empty: false,
        })
    }

    fn deserialize_v2(
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
            V2_PREAMBLE_EMPTY => Ok(Self {
                entries: vec![],
                theta: MAX_THETA,
                seed_hash,
                ordered: true,
                empty: true,
            }),
            V2_PREAMBLE_PRECISE => {
                let num_entries = cursor
                    .read_u32_le()
                    .map_err(insufficient_data("num_entries"))?
                    as usize;
                cursor
                    .read_u32_le()
                    .map_err(insufficient_data("<unused_u32>"))?;
                let entries = Self::read_entries(&mut cursor, num_entries, MAX_THETA)?;
                Ok(Self {
                    entries,
                    theta: MAX_THETA,
                    seed_hash,
                    ordered: true,
                    empty: num_entries == 0,
                })
            }
            V2_PREAMBLE_ESTIMATE => {
                let num_entries = cursor
                    .read_u32_le()
                    .map_err(insufficient_data("num_entries"))?
                    as usize;
                cursor
                    .read_u32_le()
                    .map_err(insufficient_data("<unused_u32>"))?;
                let theta = cursor
                    .read_u64_le()
                    .map_err(insufficient_data("theta_long"))?;
                let empty = (num_entries == 0) && (theta == MAX_THETA);
                let entries = Self::read_entries(&mut cursor, num_entries, theta)?;
                Ok(Self {
                    entries,
                    theta,
                    seed_hash,
                    ordered: true,
                    empty,
                })
            }
            _ => Err(Error::invalid_preamble_longs(V2_PREAMBLE_ESTIMATE, pre_longs)),
        }
    }

    fn deserialize_v3(
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
        let mut theta = MAX_THETA;
        let num_entries;
        let mut entries = vec![];
        if !empty {
            let expected_seed_hash = compute_seed_hash(expected_seed);
            if seed_hash != expected_seed_hash {
                return Err(Error::deserial(format!(
                    "incompatible seed hash: expected {expected_seed_hash}, got {seed_hash}",
                )));
            }
            if pre_longs == 1 {
                // single-item form
                num_entries = 1;
            } else {
                num_entries = cursor
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
            }
            entries = Self::read_entries(&mut cursor, num_entries as usize, theta)?;
        }
        let ordered = (flags & serialization::FLAGS_IS_ORDERED) != 0;
        Ok(Self {
            entries,
            theta,
            seed_hash,
            ordered,
            empty,
        })
    }

    fn deserialize_v4(
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

        // unpack num_entries
        let mut num_entries = 0usize;
        for i in 0..num_entries_bytes {
            let entry_count_byte = cursor
                .read_u8()
                .map_err(insufficient_data("num_entries_byte"))?;
            num_entries |= (entry_count_byte as usize) << ((i as usize) << 3);
        }

        // unpack whole blocks of deltas
        let mut i = 0usize;
        let mut entries = vec![0u64; num_entries];
        let mut block = vec![0u8; entry_bits as usize];
        while i + BLOCK_WIDTH <= num_entries {
            cursor
                .read_exact(&mut block)
                .map_err(insufficient_data("delta_block"))?;
            unpack_bits_block(&mut entries[i..i + BLOCK_WIDTH], &block, entry_bits);
            i += BLOCK_WIDTH;
        }

        // unpack the remaining deltas if fewer than 8 of them are left
        if i < num_entries {
            let rem = num_entries - i;
            let bytes_needed = (rem * entry_bits as usize).div_ceil(8);
            let mut tail = vec![0u8; bytes_needed];
            cursor
                .read_exact(&mut tail)
                .map_err(insufficient_data("delta_tail"))?;

            let mut unpacker = BitUnpacker::new(&tail);
            for slot in entries.iter_mut().take(num_entries).skip(i) {
                *slot = unpacker.unpack_value(entry_bits);
            }
        }

        // undo deltas
        let mut previous = 0;
        for e in &mut entries {
            *e += previous;
            previous = *e;
            if *e == 0 || *e >= theta {
                return Err(Error::deserial("corrupted: invalid retained hash value"));
            }
        }

        let ordered = (flags & serialization::FLAGS_IS_ORDERED) != 0;

        Ok(Self {
            entries,
            theta,
            seed_hash,
            ordered,
            empty,
        })
    }
}
