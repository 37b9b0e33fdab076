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

use cardsketch::common::NumStdDev;
use cardsketch::cpc::CpcSketch;
use googletest::assert_that;
use googletest::prelude::ge;
use googletest::prelude::le;
use googletest::prelude::near;

const RELATIVE_ERROR_FOR_LG_K_11: f64 = 0.04;

#[test]
fn test_empty() {
    let sketch = CpcSketch::new(11).unwrap();
    assert!(sketch.is_empty());
    assert_eq!(sketch.estimate(), 0.0);
    assert_eq!(sketch.lower_bound(NumStdDev::One), 0.0);
    assert_eq!(sketch.upper_bound(NumStdDev::One), 0.0);
    assert!(sketch.validate());
}

#[test]
fn test_one_value() {
    let mut sketch = CpcSketch::new(11).unwrap();
    sketch.update_i32(1);
    assert!(!sketch.is_empty());
    assert_eq!(sketch.estimate(), 1.0);
    assert_that!(sketch.estimate(), ge(sketch.lower_bound(NumStdDev::One)));
    assert_that!(sketch.estimate(), le(sketch.upper_bound(NumStdDev::One)));
    assert!(sketch.validate());
}

#[test]
fn test_many_values() {
    let mut sketch = CpcSketch::new(11).unwrap();
    for i in 0..10000 {
        sketch.update_i32(i);
    }
    assert!(!sketch.is_empty());
    assert_that!(
        sketch.estimate(),
        near(10000.0, RELATIVE_ERROR_FOR_LG_K_11 * 10000.0)
    );
    assert_that!(sketch.estimate(), ge(sketch.lower_bound(NumStdDev::One)));
    assert_that!(sketch.estimate(), le(sketch.upper_bound(NumStdDev::One)));
    assert!(sketch.validate());
}

#[test]
fn test_invalid_lg_k_is_rejected() {
    assert!(CpcSketch::new(3).is_err());
    assert!(CpcSketch::new(27).is_err());
    assert!(CpcSketch::with_seed(3, 1).is_err());
}

#[test]
fn test_update_type_widening() {
    let mut sketch = CpcSketch::new(11).unwrap();

    // the same logical value through every narrow integer type
    sketch.update_i64(42);
    sketch.update_i32(42);
    sketch.update_u32(42);
    sketch.update_i16(42);
    sketch.update_u16(42);
    sketch.update_i8(42);
    sketch.update_u8(42);
    assert_eq!(sketch.estimate(), 1.0);

    // signed zeros canonicalize to the same input
    sketch.update_f64(0.0);
    let estimate = sketch.estimate();
    sketch.update_f64(-0.0);
    sketch.update_f32(0.0);
    assert_eq!(sketch.estimate(), estimate);

    // every NaN pattern canonicalizes to the same input
    sketch.update_f64(f64::NAN);
    let estimate = sketch.estimate();
    sketch.update_f64(f64::from_bits(0x7ff8000000054321));
    assert_eq!(sketch.estimate(), estimate);

    // empty strings are ignored
    sketch.update_str("");
    assert_eq!(sketch.estimate(), estimate);
}

#[test]
fn test_duplicates_are_not_counted() {
    let mut sketch = CpcSketch::new(11).unwrap();
    for _ in 0..1000 {
        sketch.update_str("same_value");
    }
    assert_eq!(sketch.num_coupons(), 1);
    assert_eq!(sketch.estimate(), 1.0);
    assert!(sketch.validate());
}

// Promotion scenario: with lg_k = 10 (K = 1024) the sparse region holds
// while C < 3K/32 = 96 coupons, and the sliding window appears beyond it.
#[test]
fn test_promotion_from_sparse_to_windowed() {
    let mut sketch = CpcSketch::new(10).unwrap();
    for i in 0..90 {
        sketch.update_i32(i);
    }
    assert!(sketch.num_coupons() <= 90);
    let summary = sketch.to_string(false);
    assert!(summary.contains("SPARSE"), "summary: {summary}");
    assert!(summary.contains("not allocated"), "summary: {summary}");
    // in the sparse flavor the table holds every coupon
    assert!(sketch.validate());

    for i in 90..1090 {
        sketch.update_i32(i);
    }
    let summary = sketch.to_string(false);
    assert!(!summary.contains("not allocated"), "summary: {summary}");
    assert!(sketch.validate());
}

// Window shift scenario: C >= 27K/8 = 3456 puts the sketch into the sliding
// flavor, which is exactly when the window offset leaves zero.
#[test]
fn test_window_shifts_keep_sketch_valid() {
    let mut sketch = CpcSketch::new(10).unwrap();
    for i in 0..30000 {
        sketch.update_i32(i);
        if i % 1000 == 999 {
            assert!(sketch.validate(), "after {} updates", i + 1);
        }
    }
    assert!(sketch.num_coupons() >= 3456);
    let summary = sketch.to_string(false);
    assert!(summary.contains("SLIDING"), "summary: {summary}");
    assert!(sketch.validate());
}

#[test]
fn test_validate_holds_across_flavors() {
    // exercise each flavor region of lg_k = 10
    for n in [0, 50, 300, 2000, 8000, 30000] {
        let mut sketch = CpcSketch::new(10).unwrap();
        for i in 0..n {
            sketch.update_i32(i);
        }
        assert!(sketch.validate(), "n = {n}");
    }
}

#[test]
fn test_estimate_accuracy_across_sizes() {
    // HIP relative standard error is about 0.59 / sqrt(K); allow 3 of them
    for lg_k in [10u8, 11, 12] {
        let k = (1u64 << lg_k) as f64;
        let tolerance = 3.0 * 0.59 / k.sqrt();
        for n in [1000i32, 50000] {
            let mut sketch = CpcSketch::new(lg_k).unwrap();
            for i in 0..n {
                sketch.update_i32(i);
            }
            assert_that!(sketch.estimate(), near(n as f64, tolerance * n as f64));
        }
    }
}

#[test]
fn test_bounds_bracket_estimate() {
    let mut sketch = CpcSketch::new(11).unwrap();
    for i in 0..25000 {
        sketch.update_i32(i);
    }
    let estimate = sketch.estimate();
    for kappa in [NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
        assert_that!(estimate, ge(sketch.lower_bound(kappa)));
        assert_that!(estimate, le(sketch.upper_bound(kappa)));
    }
    let lb1 = sketch.lower_bound(NumStdDev::One);
    let lb3 = sketch.lower_bound(NumStdDev::Three);
    let ub1 = sketch.upper_bound(NumStdDev::One);
    let ub3 = sketch.upper_bound(NumStdDev::Three);
    assert_that!(lb3, le(lb1));
    assert_that!(ub3, ge(ub1));
}
