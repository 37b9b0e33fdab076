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

use crate::common::NumStdDev;
use crate::common::ResizeFactor;
use crate::common::binomial_bounds;
use crate::common::canonical_double;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::theta::compact::CompactThetaSketch;
use crate::theta::hash_table::DEFAULT_LG_K;
use crate::theta::hash_table::MAX_LG_K;
use crate::theta::hash_table::MAX_THETA;
use crate::theta::hash_table::MIN_LG_K;
use crate::theta::hash_table::ThetaHashTable;

/// Mutable theta sketch for building from input data.
///
/// The sketch hashes each input with MurmurHash3 x64 128 under the configured
/// seed and retains the hash keys below the current threshold theta. Narrow
/// integer inputs widen to `i64` and floating point inputs are canonicalized
/// before hashing so that sketches stay compatible with producers in other
/// ecosystems.
#[derive(Debug)]
pub struct ThetaSketch {
    table: ThetaHashTable,
}

impl ThetaSketch {
    /// Create a new builder for ThetaSketch
    ///
    /// # Examples
    ///
    /// ```
    /// # use cardsketch::theta::ThetaSketch;
    /// let sketch = ThetaSketch::builder().lg_k(12).build();
    /// assert_eq!(sketch.lg_k(), 12);
    /// ```
    pub fn builder() -> ThetaSketchBuilder {
        ThetaSketchBuilder::default()
    }

    /// Update the sketch with raw bytes.
    ///
    /// This is the only update whose semantics are defined purely by the
    /// byte sequence. All typed updates reduce to this one.
    ///
    /// # Examples
    ///
    /// ```
    /// # use cardsketch::theta::ThetaSketch;
    /// let mut sketch = ThetaSketch::builder().build();
    /// sketch.update_bytes(&[1, 2, 3]);
    /// assert!(sketch.estimate() >= 1.0);
    /// ```
    pub fn update_bytes(&mut self, value: &[u8]) {
        let hash = self.table.hash_and_screen(value);
        if hash != 0 {
            self.table.try_insert(hash);
        }
    }

    /// Update the sketch with a string. Empty strings are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// # use cardsketch::theta::ThetaSketch;
    /// let mut sketch = ThetaSketch::builder().build();
    /// sketch.update_str("apple");
    /// assert!(sketch.estimate() >= 1.0);
    /// ```
    pub fn update_str(&mut self, value: &str) {
        if value.is_empty() {
            return;
        }
        self.update_bytes(value.as_bytes());
    }

    /// Update the sketch with an unsigned 64-bit integer.
    pub fn update_u64(&mut self, value: u64) {
        self.update_bytes(&value.to_le_bytes());
    }

    /// Update the sketch with a signed 64-bit integer.
    pub fn update_i64(&mut self, value: i64) {
        self.update_bytes(&value.to_le_bytes());
    }

    /// Update the sketch with an unsigned 32-bit integer.
    pub fn update_u32(&mut self, value: u32) {
        self.update_i32(value as i32);
    }

    /// Update the sketch with a signed 32-bit integer, widened to `i64`.
    pub fn update_i32(&mut self, value: i32) {
        self.update_i64(value as i64);
    }

    /// Update the sketch with an unsigned 16-bit integer.
    pub fn update_u16(&mut self, value: u16) {
        self.update_i16(value as i16);
    }

    /// Update the sketch with a signed 16-bit integer, widened to `i64`.
    pub fn update_i16(&mut self, value: i16) {
        self.update_i64(value as i64);
    }

    /// Update the sketch with an unsigned 8-bit integer.
    pub fn update_u8(&mut self, value: u8) {
        self.update_i8(value as i8);
    }

    /// Update the sketch with a signed 8-bit integer, widened to `i64`.
    pub fn update_i8(&mut self, value: i8) {
        self.update_i64(value as i64);
    }

    /// Update the sketch with a 64-bit float.
    ///
    /// The value is canonicalized first: `-0.0` becomes `+0.0` and every NaN
    /// maps to one canonical bit pattern.
    pub fn update_f64(&mut self, value: f64) {
        let canonical = canonical_double(value);
        self.update_bytes(&canonical.to_le_bytes());
    }

    /// Update the sketch with a 32-bit float, widened to `f64`.
    pub fn update_f32(&mut self, value: f32) {
        self.update_f64(value as f64);
    }

    /// Return cardinality estimate
    ///
    /// # Examples
    ///
    /// ```
    /// # use cardsketch::theta::ThetaSketch;
    /// # let mut sketch = ThetaSketch::builder().build();
    /// # sketch.update_str("apple");
    /// assert!(sketch.estimate() >= 1.0);
    /// ```
    pub fn estimate(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let num_retained = self.table.num_retained() as f64;
        let theta = self.table.theta() as f64 / MAX_THETA as f64;
        num_retained / theta
    }

    /// Return theta as a fraction (0.0 to 1.0)
    pub fn theta(&self) -> f64 {
        self.table.theta() as f64 / MAX_THETA as f64
    }

    /// Return theta as u64
    pub fn theta64(&self) -> u64 {
        self.table.theta()
    }

    /// Check if sketch is empty
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Check if sketch is in estimation mode
    pub fn is_estimation_mode(&self) -> bool {
        self.table.theta() < MAX_THETA
    }

    /// Return number of retained entries
    pub fn num_retained(&self) -> usize {
        self.table.num_retained()
    }

    /// Return the 16-bit seed hash used for cross-sketch compatibility checks
    pub fn seed_hash(&self) -> u16 {
        self.table.seed_hash()
    }

    /// Return lg_k
    pub fn lg_k(&self) -> u8 {
        self.table.lg_nom_size()
    }

    /// Trim the sketch to nominal size k
    pub fn trim(&mut self) {
        self.table.trim();
    }

    /// Reset the sketch to empty state
    pub fn reset(&mut self) {
        self.table.reset();
    }

    /// Return iterator over hash values
    ///
    /// # Examples
    ///
    /// ```
    /// # use cardsketch::theta::ThetaSketch;
    /// # let mut sketch = ThetaSketch::builder().build();
    /// # sketch.update_str("apple");
    /// let mut iter = sketch.iter();
    /// assert!(iter.next().is_some());
    /// ```
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.table.iter()
    }

    /// Return this sketch in compact (immutable) form.
    ///
    /// If `ordered` is true, retained hash values are sorted in ascending order.
    ///
    /// # Examples
    ///
    /// ```
    /// # use cardsketch::theta::ThetaSketch;
    /// let mut sketch = ThetaSketch::builder().build();
    /// sketch.update_str("apple");
    /// let compact = sketch.compact(true);
    /// assert_eq!(compact.num_retained(), 1);
    /// ```
    pub fn compact(&self, ordered: bool) -> CompactThetaSketch {
        let mut entries: Vec<u64> = self.iter().collect();

        let empty = self.is_empty();
        let theta = if empty {
            // A never-updated sketch initialized with p < 1.0 compacts with
            // the full theta, matching the Java correctThetaOnCompact().
            MAX_THETA
        } else {
            self.table.theta()
        };
        let is_single = entries.len() == 1 && theta == MAX_THETA;
        // Empty or single-item sketches are always ordered
        let ordered = ordered || empty || is_single;

        if ordered && entries.len() > 1 {
            entries.sort_unstable();
        }

        CompactThetaSketch::new(entries, theta, self.table.seed_hash(), ordered, empty)
    }

    /// Returns the approximate lower error bound given the specified number of Standard Deviations.
    ///
    /// # Examples
    ///
    /// ```
    /// use cardsketch::common::NumStdDev;
    /// use cardsketch::theta::ThetaSketch;
    ///
    /// let mut sketch = ThetaSketch::builder().lg_k(12).build();
    /// for i in 0..10000 {
    ///     sketch.update_i32(i);
    /// }
    ///
    /// let estimate = sketch.estimate();
    /// assert!(sketch.lower_bound(NumStdDev::Two) <= estimate);
    /// assert!(estimate <= sketch.upper_bound(NumStdDev::Two));
    /// ```
    pub fn lower_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        if !self.is_estimation_mode() {
            return self.num_retained() as f64;
        }
        // This is safe because sampling_probability is guaranteed to be > 0,
        // so theta will always be > 0, and binomial_bounds will never fail
        binomial_bounds::lower_bound(self.num_retained() as u64, self.theta(), num_std_dev)
            .expect("theta should always be valid")
    }

    /// Returns the approximate upper error bound given the specified number of Standard Deviations.
    pub fn upper_bound(&self, num_std_dev: NumStdDev) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        if !self.is_estimation_mode() {
            return self.num_retained() as f64;
        }
        // This is safe because sampling_probability is guaranteed to be > 0,
        // so theta will always be > 0, and binomial_bounds will never fail
        binomial_bounds::upper_bound(
            self.num_retained() as u64,
            self.theta(),
            num_std_dev,
            self.is_empty(),
        )
        .expect("theta should always be valid")
    }

    /// Produce a human-readable summary of this sketch.
    ///
    /// If `print_items` is true, the retained hash keys are listed as well.
    pub fn to_string(&self, print_items: bool) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "### Update Theta sketch summary:");
        let _ = writeln!(s, "   lg nominal size      : {}", self.lg_k());
        let _ = writeln!(s, "   lg current size      : {}", self.table.lg_cur_size());
        let _ = writeln!(s, "   num retained keys    : {}", self.num_retained());
        let _ = writeln!(
            s,
            "   resize factor        : {}",
            self.table.resize_factor().value()
        );
        let _ = writeln!(
            s,
            "   sampling probability : {}",
            self.table.sampling_probability()
        );
        let _ = writeln!(s, "   seed hash            : {:#x}", self.seed_hash());
        let _ = writeln!(s, "   empty?               : {}", self.is_empty());
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
}

/// Builder for ThetaSketch
#[derive(Debug)]
pub struct ThetaSketchBuilder {
    lg_k: u8,
    resize_factor: ResizeFactor,
    sampling_probability: f32,
    seed: u64,
}

impl Default for ThetaSketchBuilder {
    fn default() -> Self {
        Self {
            lg_k: DEFAULT_LG_K,
            resize_factor: ResizeFactor::X8,
            sampling_probability: 1.0,
            seed: DEFAULT_UPDATE_SEED,
        }
    }
}

impl ThetaSketchBuilder {
    /// Set lg_k (log2 of nominal size k).
    ///
    /// # Panics
    ///
    /// If lg_k is not in range [5, 26]
    ///
    /// # Examples
    ///
    /// ```
    /// # use cardsketch::theta::ThetaSketch;
    /// let sketch = ThetaSketch::builder().lg_k(12).build();
    /// assert_eq!(sketch.lg_k(), 12);
    /// ```
    pub fn lg_k(mut self, lg_k: u8) -> Self {
        assert!(
            (MIN_LG_K..=MAX_LG_K).contains(&lg_k),
            "lg_k must be in [{}, {}], got {}",
            MIN_LG_K,
            MAX_LG_K,
            lg_k
        );
        self.lg_k = lg_k;
        self
    }

    /// Set resize factor.
    pub fn resize_factor(mut self, factor: ResizeFactor) -> Self {
        self.resize_factor = factor;
        self
    }

    /// Set sampling probability p.
    ///
    /// The sampling probability controls the fraction of hashed values that are retained.
    /// Must be greater than 0 to ensure valid theta values for bound calculations.
    ///
    /// # Panics
    ///
    /// Panics if p is not in range (0.0, 1.0]
    ///
    /// # Examples
    ///
    /// ```
    /// # use cardsketch::theta::ThetaSketch;
    /// let _sketch = ThetaSketch::builder().sampling_probability(0.5).build();
    /// ```
    pub fn sampling_probability(mut self, probability: f32) -> Self {
        assert!(
            (0.0..=1.0).contains(&probability) && probability > 0.0,
            "sampling_probability must be in (0.0, 1.0], got {probability}"
        );
        self.sampling_probability = probability;
        self
    }

    /// Set hash seed.
    ///
    /// # Examples
    ///
    /// ```
    /// # use cardsketch::theta::ThetaSketch;
    /// let _sketch = ThetaSketch::builder().seed(7).build();
    /// ```
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Build the ThetaSketch.
    ///
    /// # Examples
    ///
    /// ```
    /// # use cardsketch::theta::ThetaSketch;
    /// let sketch = ThetaSketch::builder().lg_k(10).build();
    /// assert_eq!(sketch.lg_k(), 10);
    /// ```
    pub fn build(self) -> ThetaSketch {
        let table = ThetaHashTable::new(
            self.lg_k,
            self.resize_factor,
            self.sampling_probability,
            self.seed,
        );

        ThetaSketch { table }
    }
}
