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

//! Arbitrary-bit-width packing of 64-bit values into byte buffers.
//!
//! Two forms are provided. The streaming form ([`BitPacker`] /
//! [`BitUnpacker`]) maintains a byte-and-bit cursor and packs one value at a
//! time. The block form ([`pack_bits_block`] / [`unpack_bits_block`])
//! handles exactly [`BLOCK_WIDTH`] values at once and produces `bits` output
//! bytes, bit-identical to eight streaming calls starting at offset zero.
//! Within the byte stream the most significant bits of each value come
//! first, matching the compressed theta wire format.

pub(crate) const BLOCK_WIDTH: usize = 8;

#[inline]
fn low_bit_to_byte_mask(bits: u8) -> u8 {
    if bits >= u8::BITS as u8 {
        u8::MAX
    } else {
        (1u8 << bits) - 1
    }
}

/// Packs values into a byte buffer with arbitrary bit widths.
///
/// # Panics
///
/// Panics if the buffer is too small to hold the packed values.
/// The caller must ensure that `bytes` has enough capacity for
/// the total number of bits to be packed.
pub(crate) struct BitPacker<'a> {
    bytes: &'a mut [u8],
    byte_index: usize,
    byte_bit_used: u8,
}

impl<'a> BitPacker<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        BitPacker {
            bytes,
            byte_index: 0,
            byte_bit_used: 0,
        }
    }

    /// Returns the number of bytes touched so far, including a partial last byte.
    pub fn byte_used(&self) -> usize {
        if self.byte_bit_used == 0 {
            self.byte_index
        } else {
            self.byte_index + 1
        }
    }

    /// Packs the low `bits` bits of `value` into the buffer.
    ///
    /// # Panics
    ///
    /// Panics if packing the value would exceed the buffer bounds.
    pub fn pack_value(&mut self, value: u64, mut bits: u8) {
        debug_assert!(self.byte_bit_used < 8, "offset must be in [0, 7]");

        if self.byte_bit_used > 0 {
            let remain_bits = 8 - self.byte_bit_used;
            let remain_mask = low_bit_to_byte_mask(remain_bits);

            // Fast path: the current byte has room for the whole value.
            if bits < remain_bits {
                self.bytes[self.byte_index] |=
                    ((value << (remain_bits - bits)) as u8) & remain_mask;
                self.byte_bit_used += bits;
                return;
            }

            // Fill the current byte with the value's highest remain_bits bits.
            self.bytes[self.byte_index] |= ((value >> (bits - remain_bits)) as u8) & remain_mask;
            bits -= remain_bits;
            self.byte_bit_used = 0;
            self.byte_index += 1;
        }

        while bits >= 8 {
            self.bytes[self.byte_index] = (value >> (bits - 8)) as u8;
            self.byte_index += 1;
            bits -= 8;
        }

        if bits > 0 {
            self.bytes[self.byte_index] = (value << (8 - bits)) as u8;
            self.byte_bit_used = bits;
        }
    }
}

/// Unpacks values from a byte buffer with arbitrary bit widths.
///
/// # Panics
///
/// Panics if the buffer is too small to provide the requested bits.
/// The caller must ensure that `bytes` has enough capacity for
/// the total number of bits to be unpacked.
pub(crate) struct BitUnpacker<'a> {
    bytes: &'a [u8],
    byte_index: usize,
    byte_bit_used: u8,
}

impl<'a> BitUnpacker<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            byte_index: 0,
            byte_bit_used: 0,
        }
    }

    /// Unpacks the next `bits`-wide value from the buffer.
    ///
    /// # Panics
    ///
    /// Panics if unpacking the value would exceed the buffer bounds.
    pub fn unpack_value(&mut self, mut bits: u8) -> u64 {
        if bits == 0 {
            return 0;
        }

        let avail_bits = 8 - self.byte_bit_used;
        let chunk_bits = avail_bits.min(bits);
        let chunk_mask = low_bit_to_byte_mask(chunk_bits);

        let mut value =
            ((self.bytes[self.byte_index] >> (avail_bits - chunk_bits)) & chunk_mask) as u64;
        // The current byte has been consumed entirely.
        if chunk_bits == avail_bits {
            self.byte_index += 1;
        }
        self.byte_bit_used = (self.byte_bit_used + chunk_bits) & 7;
        bits -= chunk_bits;

        while bits >= 8 {
            value = (value << 8) | self.bytes[self.byte_index] as u64;
            self.byte_index += 1;
            bits -= 8;
        }

        if bits > 0 {
            value = (value << bits) | (self.bytes[self.byte_index] >> (8 - bits)) as u64;
            self.byte_bit_used = bits;
        }

        value
    }
}

/// Packs a block of [`BLOCK_WIDTH`] values into exactly `bits` bytes.
///
/// Bit-identical to eight [`BitPacker::pack_value`] calls starting at offset
/// zero, but works on whole bytes through a wide accumulator so the loop has
/// no per-bit cursor bookkeeping.
///
/// # Panics
///
/// * Panics if `values.len()` is not equal to `BLOCK_WIDTH`.
/// * Panics if `bits` is not in the range `1..=63`.
/// * Panics if `bytes` is shorter than `bits` bytes.
pub(crate) fn pack_bits_block(values: &[u64], bytes: &mut [u8], bits: u8) {
    assert_eq!(values.len(), BLOCK_WIDTH, "values length must be 8");
    assert!(
        (1..=63).contains(&bits),
        "wrong number of bits in pack_bits_block8: {bits}"
    );
    assert!(bytes.len() >= bits as usize, "output buffer too small");

    let mask = (1u128 << bits) - 1;
    // Accumulates packed bits left-aligned in arrival order; never holds
    // more than 7 + 63 bits between flushes.
    let mut acc = 0u128;
    let mut acc_bits = 0u32;
    let mut out = 0usize;
    for &value in values {
        acc = (acc << bits) | (value as u128 & mask);
        acc_bits += bits as u32;
        while acc_bits >= 8 {
            bytes[out] = (acc >> (acc_bits - 8)) as u8;
            acc_bits -= 8;
            out += 1;
        }
    }
    // 8 values of `bits` bits fill whole bytes exactly
    debug_assert_eq!(acc_bits, 0);
    debug_assert_eq!(out, bits as usize);
}

/// Unpacks a block of [`BLOCK_WIDTH`] values from exactly `bits` bytes.
///
/// The exact inverse of [`pack_bits_block`], and equally interchangeable
/// with eight [`BitUnpacker::unpack_value`] calls starting at offset zero.
///
/// # Panics
///
/// * Panics if `values.len()` is not equal to `BLOCK_WIDTH`.
/// * Panics if `bits` is not in the range `1..=63`.
/// * Panics if `bytes` is shorter than `bits` bytes.
pub(crate) fn unpack_bits_block(values: &mut [u64], bytes: &[u8], bits: u8) {
    assert_eq!(values.len(), BLOCK_WIDTH, "values length must be 8");
    assert!(
        (1..=63).contains(&bits),
        "wrong number of bits in unpack_bits_block8: {bits}"
    );
    assert!(bytes.len() >= bits as usize, "input buffer too small");

    let mask = (1u128 << bits) - 1;
    let mut acc = 0u128;
    let mut acc_bits = 0u32;
    let mut input = 0usize;
    for value in values.iter_mut() {
        while acc_bits < bits as u32 {
            acc = (acc << 8) | bytes[input] as u128;
            input += 1;
            acc_bits += 8;
        }
        *value = ((acc >> (acc_bits - bits as u32)) & mask) as u64;
        acc_bits -= bits as u32;
    }
    debug_assert_eq!(acc_bits, 0);
    debug_assert_eq!(input, bits as usize);
}
