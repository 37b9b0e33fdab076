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

//! Binary serialization format constants for Theta sketches.
//!
//! Serial versions 1 through 3 share an uncompressed layout with small
//! preamble variations; version 4 bit-packs the deltas of an ordered entry
//! list.

/// Serial version of the uncompressed compact format.
pub(crate) const UNCOMPRESSED_SERIAL_VERSION: u8 = 3;

/// Serial version of the compressed (bit-packed) compact format.
pub(crate) const COMPRESSED_SERIAL_VERSION: u8 = 4;

// Flags (byte 5) - bit masks
/// Flag: data is in big-endian format (outputs are always little-endian)
#[allow(dead_code)]
pub(crate) const FLAGS_IS_BIG_ENDIAN: u8 = 1 << 0;
/// Flag: sketch is read-only (compact sketches are read-only)
pub(crate) const FLAGS_IS_READ_ONLY: u8 = 1 << 1;
/// Flag: sketch is empty
pub(crate) const FLAGS_IS_EMPTY: u8 = 1 << 2;
/// Flag: sketch is in compact format
pub(crate) const FLAGS_IS_COMPACT: u8 = 1 << 3;
/// Flag: hash values are ordered (sorted ascending)
pub(crate) const FLAGS_IS_ORDERED: u8 = 1 << 4;

// Serial version 2 encodes the sketch mode in the preamble length.
pub(crate) const V2_PREAMBLE_EMPTY: u8 = 1;
pub(crate) const V2_PREAMBLE_PRECISE: u8 = 2;
pub(crate) const V2_PREAMBLE_ESTIMATE: u8 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_masks_are_distinct_bits() {
        assert_eq!(FLAGS_IS_BIG_ENDIAN, 1);
        assert_eq!(FLAGS_IS_READ_ONLY, 2);
        assert_eq!(FLAGS_IS_EMPTY, 4);
        assert_eq!(FLAGS_IS_COMPACT, 8);
        assert_eq!(FLAGS_IS_ORDERED, 16);
    }
}
