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

/// `INVERSE_POWERS_OF_2[i] == 2^-i`, exact.
///
/// Index 64 is the largest needed: the HIP update reads entry `col + 1` for
/// columns up to 63, and the KXP refresh reads entry `8 * j` for `j <= 7`.
pub(crate) static INVERSE_POWERS_OF_2: [f64; 65] = inverse_powers_of_2();

const fn inverse_powers_of_2() -> [f64; 65] {
    let mut table = [0.0f64; 65];
    let mut i = 0u64;
    while i < 65 {
        // 2^-i is a power of two, so only the exponent bits are set
        table[i as usize] = f64::from_bits((1023 - i) << 52);
        i += 1;
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_values() {
        assert_eq!(INVERSE_POWERS_OF_2[0], 1.0);
        assert_eq!(INVERSE_POWERS_OF_2[1], 0.5);
        assert_eq!(INVERSE_POWERS_OF_2[8], 1.0 / 256.0);
        assert_eq!(INVERSE_POWERS_OF_2[64], 2.0f64.powi(-64));
    }
}
