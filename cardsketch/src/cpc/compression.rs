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

//! Compression of the CPC payloads into arrays of 32-bit words.
//!
//! The surprising-value table compresses as a sorted sequence of `row_col`
//! pairs: the column delta within a row is written in unary and the row
//! delta as a Golomb code whose base width is chosen from the pair density.
//! The sliding window bytes are carried packed four to a word. Each flavor
//! applies a structural transformation first (the hybrid merge of window
//! bits into the pair stream, the pinned column shift, the sliding column
//! rotation) so that the pair deltas stay small.

use std::cmp::Ordering;

use crate::cpc::CpcSketch;
use crate::cpc::Flavor;
use crate::cpc::determine_correct_offset;
use crate::cpc::determine_flavor;
use crate::cpc::pair_table::PairTable;
use crate::cpc::pair_table::introspective_insertion_sort;

#[derive(Default)]
pub(super) struct CompressedState {
    pub(super) table_data: Vec<u32>,
    pub(super) table_data_words: usize,
    // can be different from the number of entries in the sketch in hybrid mode
    pub(super) table_num_entries: u32,
    pub(super) window_data: Vec<u32>,
    pub(super) window_data_words: usize,
}

impl CompressedState {
    pub fn compress(&mut self, source: &CpcSketch) {
        match source.flavor() {
            Flavor::Empty => {
                // nothing to carry
            }
            Flavor::Sparse => {
                self.compress_sparse_flavor(source);
                debug_assert!(self.window_data.is_empty(), "window is not expected");
                debug_assert!(!self.table_data.is_empty(), "table is expected");
            }
            Flavor::Hybrid => {
                self.compress_hybrid_flavor(source);
                debug_assert!(self.window_data.is_empty(), "window is not expected");
                debug_assert!(!self.table_data.is_empty(), "table is expected");
            }
            Flavor::Pinned => {
                self.compress_pinned_flavor(source);
                debug_assert!(!self.window_data.is_empty(), "window is expected");
            }
            Flavor::Sliding => {
                self.compress_sliding_flavor(source);
                debug_assert!(!self.window_data.is_empty(), "window is expected");
            }
        }
    }

    fn compress_sparse_flavor(&mut self, source: &CpcSketch) {
        debug_assert!(source.sliding_window.is_empty());
        let mut pairs = source.surprising_value_table().unwrapping_get_items();
        introspective_insertion_sort(&mut pairs);
        self.compress_surprising_values(&pairs, source.lg_k());
    }

    fn compress_hybrid_flavor(&mut self, source: &CpcSketch) {
        debug_assert!(!source.sliding_window.is_empty());
        debug_assert_eq!(source.window_offset, 0);

        let k = 1usize << source.lg_k();
        let mut pairs = source.surprising_value_table().unwrapping_get_items();
        if !pairs.is_empty() {
            introspective_insertion_sort(&mut pairs);
        }
        let num_pairs_from_table = pairs.len();
        let num_pairs_from_window = (source.num_coupons() as usize) - num_pairs_from_table;

        let all_pairs_len = num_pairs_from_table + num_pairs_from_window;
        let mut all_pairs = vec![0; all_pairs_len];
        // read the window bits as pairs into the upper region of the output
        {
            // The empty space that this leaves at the beginning of the output array will be filled
            // later.
            let mut idx = num_pairs_from_table;
            for row_index in 0..k {
                let mut byte = source.sliding_window[row_index];
                while byte != 0 {
                    let col_index = byte.trailing_zeros();
                    byte ^= 1 << col_index; // erase the 1
                    all_pairs[idx] = ((row_index << 6) as u32) | col_index;
                    idx += 1;
                }
            }
            assert_eq!(idx, all_pairs_len);
        }
        // two-way merge of the table pairs and the window pairs into all_pairs
        {
            let mut final_idx = 0;
            let mut table_idx = 0;
            let mut window_idx = num_pairs_from_table;

            while final_idx < all_pairs_len {
                if table_idx < num_pairs_from_table
                    && (window_idx >= all_pairs_len || pairs[table_idx] <= all_pairs[window_idx])
                {
                    all_pairs[final_idx] = pairs[table_idx];
                    table_idx += 1;
                } else {
                    all_pairs[final_idx] = all_pairs[window_idx];
                    window_idx += 1;
                }
                final_idx += 1;
            }
        }

        self.compress_surprising_values(&all_pairs, source.lg_k());
    }

    fn compress_pinned_flavor(&mut self, source: &CpcSketch) {
        self.compress_window_bytes(&source.sliding_window);
        let mut pairs = source.surprising_value_table().unwrapping_get_items();
        if !pairs.is_empty() {
            // Here we subtract 8 from the column indices. Because they are stored in the low 6 bits
            // of each row_col pair, and because no column index is less than 8 for a pinned
            // sketch, we can simply subtract 8 from the pairs themselves.
            for pair in &mut pairs {
                assert!(*pair & 63 >= 8, "pair column index is less than 8: {pair}");
                *pair -= 8;
            }

            introspective_insertion_sort(&mut pairs);
            self.compress_surprising_values(&pairs, source.lg_k());
        }
    }

    // Complicated by the existence of both a left fringe and a right fringe.
    fn compress_sliding_flavor(&mut self, source: &CpcSketch) {
        self.compress_window_bytes(&source.sliding_window);
        let mut pairs = source.surprising_value_table().unwrapping_get_items();
        if !pairs.is_empty() {
            // Rotate the column indices into a canonical configuration so
            // that both fringes land next to each other. This changes the
            // implied ordering of the pairs, so it must happen before sorting.
            let offset = source.window_offset;
            debug_assert!(offset <= 56);
            for pair in &mut pairs {
                let row_col = *pair;
                let row = row_col >> 6;
                let mut col = (row_col & 63) as u8;
                // new = ((old - (offset+8)) + 64) mod 64
                col = (col + 56 - offset) & 63;
                debug_assert!(col < 56);
                *pair = (row << 6) | (col as u32);
            }

            introspective_insertion_sort(&mut pairs);
            self.compress_surprising_values(&pairs, source.lg_k());
        }
    }

    fn compress_surprising_values(&mut self, pairs: &[u32], lg_k: u8) {
        let k = 1u32 << lg_k;
        let num_pairs = pairs.len() as u32;
        let num_base_bits = golomb_choose_number_of_base_bits(k + num_pairs, num_pairs as u64);
        let table_len = safe_length_for_compressed_pair_buf(k, num_pairs, num_base_bits);
        self.table_data.resize(table_len, 0);

        let compressed_words = self.low_level_compress_pairs(pairs, num_base_bits);

        // The unused portion of the output buffer stays allocated; it is
        // transient and the recorded word count delimits the payload.

        self.table_data_words = compressed_words;
        self.table_num_entries = num_pairs;
    }

    fn compress_window_bytes(&mut self, window: &[u8]) {
        let words = window.len().div_ceil(4);
        self.window_data.resize(words, 0);
        for (word, chunk) in self.window_data.iter_mut().zip(window.chunks(4)) {
            let mut packed = 0u32;
            for (j, &byte) in chunk.iter().enumerate() {
                packed |= (byte as u32) << (8 * j);
            }
            *word = packed;
        }
        self.window_data_words = words;
    }

    /// Returns the number of compressed words that were actually used.
    fn low_level_compress_pairs(&mut self, pairs: &[u32], num_base_bits: u8) -> usize {
        let mut bitbuf = 0;
        let mut bufbits = 0;
        let mut next_word_index = 0;
        let golomb_lo_mask = ((1u64 << num_base_bits) - 1) as u64;
        let mut predicted_row_index = 0;
        let mut predicted_col_index = 0;

        for &row_col in pairs {
            let row_index = row_col >> 6;
            let col_index = row_col & 63;

            if row_index != predicted_row_index {
                predicted_col_index = 0;
            }

            assert!(row_index >= predicted_row_index);
            assert!(col_index >= predicted_col_index);

            let y_delta = (row_index - predicted_row_index) as u64;
            let x_delta = (col_index - predicted_col_index) as u64;

            predicted_row_index = row_index;
            predicted_col_index = col_index + 1;

            write_unary(
                &mut self.table_data,
                &mut next_word_index,
                &mut bitbuf,
                &mut bufbits,
                x_delta,
            );

            let golomb_lo = y_delta & golomb_lo_mask;
            let golomb_hi = y_delta >> num_base_bits;
            write_unary(
                &mut self.table_data,
                &mut next_word_index,
                &mut bitbuf,
                &mut bufbits,
                golomb_hi,
            );

            bitbuf |= golomb_lo << bufbits;
            bufbits += num_base_bits;
            maybe_flush_bitbuf(
                &mut bitbuf,
                &mut bufbits,
                &mut self.table_data,
                &mut next_word_index,
            );
        }

        // Pad the bitstream with zero bits so that the decoder's 8-bit unary
        // peek can't overrun its input.
        bufbits += 8;
        maybe_flush_bitbuf(
            &mut bitbuf,
            &mut bufbits,
            &mut self.table_data,
            &mut next_word_index,
        );

        if bufbits > 0 {
            // We are done encoding now, so we flush the bit buffer.
            debug_assert!(bufbits < 32);
            self.table_data[next_word_index] = (bitbuf & 0xffffffff) as u32;
            next_word_index += 1;
        }

        next_word_index
    }
}

pub(super) struct UncompressedState {
    pub(super) table: PairTable,
    pub(super) window: Vec<u8>,
}

impl CompressedState {
    pub fn uncompress(&self, lg_k: u8, num_coupons: u32) -> UncompressedState {
        match determine_flavor(lg_k, num_coupons) {
            Flavor::Empty => UncompressedState {
                table: PairTable::new(2, lg_k + 6),
                window: vec![],
            },
            Flavor::Sparse => self.uncompress_sparse_flavor(lg_k),
            Flavor::Hybrid => self.uncompress_hybrid_flavor(lg_k),
            Flavor::Pinned => self.uncompress_pinned_flavor(lg_k),
            Flavor::Sliding => self.uncompress_sliding_flavor(lg_k, num_coupons),
        }
    }

    fn uncompress_sparse_flavor(&self, lg_k: u8) -> UncompressedState {
        debug_assert!(self.window_data.is_empty(), "window is not expected");
        debug_assert!(!self.table_data.is_empty(), "table is expected");

        let pairs = uncompress_surprising_values(
            &self.table_data,
            self.table_data_words,
            self.table_num_entries,
            lg_k,
        );

        UncompressedState {
            table: PairTable::from_slots(lg_k, self.table_num_entries, pairs),
            window: vec![],
        }
    }

    fn uncompress_hybrid_flavor(&self, lg_k: u8) -> UncompressedState {
        debug_assert!(self.window_data.is_empty(), "window is not expected");
        debug_assert!(!self.table_data.is_empty(), "table is expected");

        let mut pairs = uncompress_surprising_values(
            &self.table_data,
            self.table_data_words,
            self.table_num_entries,
            lg_k,
        );

        // In the hybrid flavor, some of these pairs actually belong in the window, so we will
        // separate them out, moving the "true" pairs to the bottom of the array.
        let k = 1usize << lg_k;
        let mut window = vec![0u8; k];
        let mut next_true_pair = 0u32;
        for i in 0..self.table_num_entries {
            let row_col = pairs[i as usize];
            assert_ne!(row_col, u32::MAX);
            let col = row_col & 63;
            if col < 8 {
                let row = row_col >> 6;
                window[row as usize] |= 1 << col; // set the window bit
            } else {
                pairs[next_true_pair as usize] = row_col;
                next_true_pair += 1;
            }
        }
        pairs.truncate(next_true_pair as usize);

        UncompressedState {
            table: PairTable::from_slots(lg_k, next_true_pair, pairs),
            window,
        }
    }

    fn uncompress_pinned_flavor(&self, lg_k: u8) -> UncompressedState {
        debug_assert!(!self.window_data.is_empty(), "window is expected");

        let k = 1usize << lg_k;
        let window = uncompress_window_bytes(&self.window_data, k);
        let num_pairs = self.table_num_entries;
        let table = if num_pairs == 0 {
            PairTable::new(2, lg_k + 6)
        } else {
            debug_assert!(!self.table_data.is_empty(), "table is expected");
            let mut pairs = uncompress_surprising_values(
                &self.table_data,
                self.table_data_words,
                num_pairs,
                lg_k,
            );
            // undo the compressor's 8-column shift
            for pair in pairs.iter_mut() {
                assert!((*pair & 63) < 56, "pair column index is invalid: {pair}");
                *pair += 8;
            }
            PairTable::from_slots(lg_k, num_pairs, pairs)
        };
        UncompressedState { table, window }
    }

    fn uncompress_sliding_flavor(&self, lg_k: u8, num_coupons: u32) -> UncompressedState {
        debug_assert!(!self.window_data.is_empty(), "window is expected");

        let k = 1usize << lg_k;
        let window = uncompress_window_bytes(&self.window_data, k);
        let num_pairs = self.table_num_entries;
        let table = if num_pairs == 0 {
            PairTable::new(2, lg_k + 6)
        } else {
            debug_assert!(!self.table_data.is_empty(), "table is expected");
            let mut pairs = uncompress_surprising_values(
                &self.table_data,
                self.table_data_words,
                num_pairs,
                lg_k,
            );
            let offset = determine_correct_offset(lg_k, num_coupons);
            assert!(offset <= 56, "offset is invalid: {offset}");

            for pair in pairs.iter_mut() {
                let row_col = *pair;
                let row = row_col >> 6;
                let mut col = (row_col & 63) as u8;
                // undo the rotation: old = (new + (offset+8)) mod 64
                col = (col.wrapping_add(offset + 8)) & 63;
                *pair = (row << 6) | (col as u32);
            }

            PairTable::from_slots(lg_k, num_pairs, pairs)
        };
        UncompressedState { table, window }
    }
}

fn uncompress_surprising_values(
    data: &[u32],
    data_words: usize,
    num_pairs: u32,
    lg_k: u8,
) -> Vec<u32> {
    let k = 1u32 << lg_k;
    let mut pairs = vec![0; num_pairs as usize];
    let num_base_bits = golomb_choose_number_of_base_bits(k + num_pairs, num_pairs as u64);
    low_level_uncompress_pairs(&mut pairs, num_pairs, num_base_bits, data, data_words);
    pairs
}

fn uncompress_window_bytes(data: &[u32], k: usize) -> Vec<u8> {
    let mut window = vec![0u8; k];
    for (i, byte) in window.iter_mut().enumerate() {
        *byte = (data[i / 4] >> (8 * (i % 4))) as u8;
    }
    window
}

fn low_level_uncompress_pairs(
    pairs: &mut [u32],
    num_pairs_to_decode: u32,
    num_base_bits: u8,
    compressed_words: &[u32],
    num_compressed_words: usize,
) {
    let mut word_index = 0;
    let mut bitbuf = 0;
    let mut bufbits = 0;
    let golomb_lo_mask = (1u64 << num_base_bits) - 1;
    let mut predicted_row_index = 0u32;
    let mut predicted_col_index = 0u32;

    // for each pair we need to read:
    // x_delta (unary)
    // y_delta_hi (unary)
    // y_delta_lo (base bits)

    for pair_index in 0..num_pairs_to_decode {
        let x_delta =
            read_unary(compressed_words, &mut word_index, &mut bitbuf, &mut bufbits) as u32;

        let golomb_hi = read_unary(compressed_words, &mut word_index, &mut bitbuf, &mut bufbits);
        // ensure num_base_bits in the bit buffer
        maybe_fill_bitbuf(
            &mut bitbuf,
            &mut bufbits,
            compressed_words,
            &mut word_index,
            num_base_bits,
        );
        let golomb_lo = bitbuf & golomb_lo_mask;
        bitbuf >>= num_base_bits;
        bufbits -= num_base_bits;
        let y_delta = ((golomb_hi << num_base_bits) | golomb_lo) as u32;

        // Now that we have x_delta and y_delta, we can compute the pair's row and column
        if y_delta > 0 {
            predicted_col_index = 0;
        }
        let row_index = predicted_row_index + y_delta;
        let col_index = predicted_col_index + x_delta;
        let row_col = (row_index << 6) | col_index;
        pairs[pair_index as usize] = row_col;
        predicted_row_index = row_index;
        predicted_col_index = col_index + 1;
    }

    debug_assert!(
        word_index <= num_compressed_words,
        "word_index: {word_index}, num_compressed_words: {num_compressed_words}",
    );
}

fn write_unary(
    compressed_words: &mut [u32],
    next_word_index: &mut usize,
    bitbuf: &mut u64,
    bufbits: &mut u8,
    value: u64,
) {
    assert!(*bufbits <= 31);

    let mut remaining = value;
    while remaining >= 16 {
        remaining -= 16;
        // Here we output 16 zeros, but we don't need to physically write them into bitbuf
        // because it already contains zeros in that region.
        *bufbits += 16; // Record the fact that 16 bits of output have occurred.
        maybe_flush_bitbuf(bitbuf, bufbits, compressed_words, next_word_index);
    }

    let the_unary_code = 1 << remaining;
    *bitbuf |= the_unary_code << *bufbits;
    *bufbits += (remaining + 1) as u8;
    maybe_flush_bitbuf(bitbuf, bufbits, compressed_words, next_word_index);
}

fn read_unary(
    compressed_words: &[u32],
    next_word_index: &mut usize,
    bitbuf: &mut u64,
    bufbits: &mut u8,
) -> u64 {
    let mut subtotal = 0u64;
    loop {
        // ensure 8 bits in bit buffer
        maybe_fill_bitbuf(bitbuf, bufbits, compressed_words, next_word_index, 8);
        // These 8 bits include either all or part of the unary codeword
        let peek8 = *bitbuf & 0xff;
        let trailing_zeros = peek8.trailing_zeros() as u8;
        if trailing_zeros < 8 {
            *bufbits -= 1 + trailing_zeros;
            *bitbuf >>= 1 + trailing_zeros;
            return subtotal + trailing_zeros as u64;
        }
        // The codeword was partial, so read some more
        subtotal += 8;
        *bufbits -= 8;
        *bitbuf >>= 8;
    }
}

fn maybe_flush_bitbuf(
    bitbuf: &mut u64,
    bufbits: &mut u8,
    word: &mut [u32],
    word_index: &mut usize,
) {
    if *bufbits >= 32 {
        word[*word_index] = (*bitbuf & 0xffffffff) as u32;
        *word_index += 1;
        *bitbuf >>= 32;
        *bufbits -= 32;
    }
}

fn maybe_fill_bitbuf(
    bitbuf: &mut u64,
    bufbits: &mut u8,
    words: &[u32],
    word_index: &mut usize,
    minbits: u8,
) {
    if *bufbits < minbits {
        *bitbuf |= (words[*word_index] as u64) << *bufbits;
        *word_index += 1;
        *bufbits += 32;
    }
}

// Explanation of padding: each pair emits
// 1) x_delta (unary, at least 1 bit, decoded with an 8-bit peek)
// 2) y_delta golomb hi (unary, at least 1 bit, decoded with an 8-bit peek)
// 3) y_delta golomb lo (straight B bits).
// The 8-bit peek is the tight constraint; 8 zero bits of padding at the end
// of the bitstream keep every peek inside the written words.
fn safe_length_for_compressed_pair_buf(k: u32, num_pairs: u32, num_base_bits: u8) -> usize {
    // Unary column codes cost at most 64 bits plus a terminator per pair.
    // The bound on the golomb row bits is based on page 198 of the textbook
    // "Managing Gigabytes" by Witten, Moffat, and Bell: the unary overflow
    // across all rows is at most k >> B.
    let k = k as usize;
    let num_pairs = num_pairs as usize;
    let num_base_bits = num_base_bits as usize;

    let xbits = 65 * num_pairs;
    let ybits = num_pairs * (1 + num_base_bits) + (k >> num_base_bits);
    divide_longs_rounding_up(xbits + ybits + 8, 32) + 1
}

fn divide_longs_rounding_up(x: usize, y: usize) -> usize {
    debug_assert_ne!(y, 0);
    let quotient = x / y;
    if quotient * y == x {
        quotient
    } else {
        quotient + 1
    }
}

/// Returns an integer that is between zero and ceil(log_2(k)) - 1, inclusive.
fn golomb_choose_number_of_base_bits(k: u32, count: u64) -> u8 {
    debug_assert!(k > 0);
    debug_assert!(count > 0);
    let quotient = ((k as u64) - count) / count; // integer division
    if quotient == 0 {
        0
    } else {
        floor_log2_of_long(quotient)
    }
}

fn floor_log2_of_long(x: u64) -> u8 {
    debug_assert!(x > 0);
    let mut p = 0u8;
    let mut y = 1u64;
    loop {
        match u64::cmp(&y, &x) {
            Ordering::Equal => return p,
            Ordering::Greater => return p - 1,
            Ordering::Less => {
                p += 1;
                y <<= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip_pairs(pairs: &[u32], lg_k: u8) {
        let mut state = CompressedState::default();
        state.compress_surprising_values(pairs, lg_k);
        let decoded = uncompress_surprising_values(
            &state.table_data,
            state.table_data_words,
            state.table_num_entries,
            lg_k,
        );
        assert_eq!(pairs, decoded.as_slice());
    }

    #[test]
    fn test_pair_stream_round_trip() {
        // sorted row_col pairs with mixed row gaps and column runs
        round_trip_pairs(&[5], 10);
        round_trip_pairs(&[0, 1, 2, 63], 10);
        round_trip_pairs(&[(3 << 6) | 7, (3 << 6) | 12, (900 << 6) | 55], 10);
        let dense: Vec<u32> = (0..200u32).map(|i| (i << 6) | (i % 56)).collect();
        round_trip_pairs(&dense, 10);
    }

    #[test]
    fn test_pair_stream_round_trip_large_row_gaps() {
        let lg_k = 20;
        let pairs = vec![(1u32 << 6) | 3, (100_000u32 << 6) | 2, (1_000_000u32 << 6) | 60];
        round_trip_pairs(&pairs, lg_k);
    }

    #[test]
    fn test_window_bytes_round_trip() {
        let k = 64;
        let window: Vec<u8> = (0..k).map(|i| (i * 37) as u8).collect();
        let mut state = CompressedState::default();
        state.compress_window_bytes(&window);
        assert_eq!(state.window_data_words, k / 4);
        let decoded = uncompress_window_bytes(&state.window_data, k);
        assert_eq!(window, decoded);
    }

    #[test]
    fn test_unary_round_trip() {
        let mut words = vec![0u32; 64];
        let mut next_word = 0;
        let mut bitbuf = 0u64;
        let mut bufbits = 0u8;
        let values = [0u64, 1, 7, 8, 15, 16, 31, 63, 200];
        for &v in &values {
            write_unary(&mut words, &mut next_word, &mut bitbuf, &mut bufbits, v);
        }
        // flush the tail
        bufbits += 8;
        maybe_flush_bitbuf(&mut bitbuf, &mut bufbits, &mut words, &mut next_word);
        if bufbits > 0 {
            words[next_word] = (bitbuf & 0xffffffff) as u32;
        }

        let mut word_index = 0;
        let mut bitbuf = 0u64;
        let mut bufbits = 0u8;
        for &v in &values {
            let decoded = read_unary(&words, &mut word_index, &mut bitbuf, &mut bufbits);
            assert_eq!(decoded, v);
        }
    }

    #[test]
    fn test_golomb_base_bits() {
        assert_eq!(golomb_choose_number_of_base_bits(1024, 1024), 0);
        assert_eq!(golomb_choose_number_of_base_bits(1024, 512), 0);
        assert_eq!(golomb_choose_number_of_base_bits(1024 + 100, 100), 3);
        assert_eq!(golomb_choose_number_of_base_bits(1024 + 10, 10), 6);
    }
}
