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

//! Data structures and functions that may be used across all the sketch families.

// public common components
mod num_std_dev;
mod resize;
pub use self::num_std_dev::NumStdDev;
pub use self::resize::ResizeFactor;

// private to the crate
pub(crate) mod binomial_bounds;
pub(crate) mod inv_pow2_table;

/// Canonicalize a double value for compatibility with other ecosystems.
///
/// Returns the canonical bit pattern: `-0.0` maps to `+0.0` and every NaN
/// maps to the single canonical NaN pattern.
pub(crate) fn canonical_double(value: f64) -> u64 {
    if value.is_nan() {
        // the canonical NaN bit pattern used by the Java implementation
        0x7ff8000000000000u64
    } else {
        // -0.0 + 0.0 == +0.0 under IEEE754 roundTiesToEven rounding mode,
        // which Rust guarantees. Thus, by adding a positive zero we
        // canonicalize signed zero without any branches in one instruction.
        (value + 0.0).to_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_double() {
        assert_eq!(canonical_double(0.0), canonical_double(-0.0));
        assert_eq!(canonical_double(f64::NAN), 0x7ff8000000000000);
        assert_eq!(
            canonical_double(f64::from_bits(0x7ff8000000054321)),
            0x7ff8000000000000
        );
        assert_eq!(canonical_double(1.5), 1.5f64.to_bits());
    }
}
