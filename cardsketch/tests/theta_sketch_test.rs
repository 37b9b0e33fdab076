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
use cardsketch::theta::ThetaSketch;

#[test]
fn test_basic_update() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build();
    assert!(sketch.is_empty());
    assert_eq!(sketch.estimate(), 0.0);

    sketch.update_str("value1");
    assert!(!sketch.is_empty());
    assert_eq!(sketch.estimate(), 1.0);

    sketch.update_str("value2");
    assert_eq!(sketch.estimate(), 2.0);
}

#[test]
fn test_single_item() {
    let mut sketch = ThetaSketch::builder().build();
    sketch.update_str("abc");
    assert!(!sketch.is_empty());
    assert_eq!(sketch.num_retained(), 1);
    assert!(!sketch.is_estimation_mode());
    assert!((sketch.estimate() - 1.0).abs() < 1e-12);
}

#[test]
fn test_update_various_types() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build();

    sketch.update_str("string");
    sketch.update_i64(42);
    sketch.update_u64(42);
    sketch.update_f64(3.15);
    sketch.update_f64(3.15);
    sketch.update_f32(3.15);
    sketch.update_f32(3.15);
    sketch.update_bytes(&[1u8, 2, 3]);

    assert!(!sketch.is_empty());
    assert_eq!(sketch.estimate(), 5.0);
}

#[test]
fn test_narrow_integers_widen_to_i64() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build();

    // all of these are the same logical value 42 after widening
    sketch.update_i64(42);
    sketch.update_i32(42);
    sketch.update_u32(42);
    sketch.update_i16(42);
    sketch.update_u16(42);
    sketch.update_i8(42);
    sketch.update_u8(42);
    assert_eq!(sketch.estimate(), 1.0);

    // -1 as i8/i16/i32 widens to -1 as i64; u8 255 reinterprets to i8 -1
    sketch.update_i64(-1);
    sketch.update_i32(-1);
    sketch.update_i16(-1);
    sketch.update_i8(-1);
    sketch.update_u8(255);
    assert_eq!(sketch.estimate(), 2.0);
}

#[test]
fn test_float_canonicalization() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build();

    sketch.update_f64(0.0);
    sketch.update_f64(-0.0);
    assert_eq!(sketch.estimate(), 1.0);

    sketch.update_f64(f64::NAN);
    sketch.update_f64(f64::from_bits(0x7ff8000000054321));
    assert_eq!(sketch.estimate(), 2.0);

    // f32 widens to f64, so the same value collapses
    sketch.update_f64(2.5);
    sketch.update_f32(2.5);
    assert_eq!(sketch.estimate(), 3.0);
}

#[test]
fn test_empty_string_is_ignored() {
    let mut sketch = ThetaSketch::builder().build();
    sketch.update_str("");
    assert!(sketch.is_empty());
    assert_eq!(sketch.estimate(), 0.0);
}

#[test]
fn test_duplicate_updates() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build();

    for _ in 0..100 {
        sketch.update_str("same_value");
    }

    assert_eq!(sketch.estimate(), 1.0);
}

#[test]
fn test_theta_reduction() {
    let mut sketch = ThetaSketch::builder().lg_k(5).build(); // small k to trigger theta reduction
    assert!(!sketch.is_estimation_mode());

    for i in 0..1000 {
        sketch.update_str(&format!("value_{}", i));
    }

    assert!(sketch.is_estimation_mode());
    assert!(sketch.theta() < 1.0);
}

#[test]
fn test_trim() {
    let mut sketch = ThetaSketch::builder().lg_k(5).build();

    for i in 0..1000 {
        sketch.update_str(&format!("value_{}", i));
    }

    let before_trim = sketch.num_retained();
    sketch.trim();
    let after_trim = sketch.num_retained();

    // After trim, should have at most k entries
    assert!(after_trim <= before_trim);
    assert_eq!(sketch.num_retained(), 32);
}

#[test]
fn test_reset() {
    let mut sketch = ThetaSketch::builder().lg_k(5).build();

    for i in 0..1000 {
        sketch.update_str(&format!("value_{}", i));
    }
    assert!(!sketch.is_empty());
    assert!(sketch.is_estimation_mode());
    assert!(sketch.num_retained() > 32);
    assert!(sketch.theta() < 1.0);

    sketch.reset();
    assert!(sketch.is_empty());
    assert_eq!(sketch.estimate(), 0.0);
    assert_eq!(sketch.theta(), 1.0);
    assert_eq!(sketch.num_retained(), 0);
    assert!(!sketch.is_estimation_mode());
    assert_eq!(sketch.lower_bound(NumStdDev::One), 0.0);
    assert_eq!(sketch.upper_bound(NumStdDev::One), 0.0);
}

#[test]
fn test_iterator() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build();

    sketch.update_str("value1");
    sketch.update_str("value2");
    sketch.update_str("value3");

    let count: usize = sketch.iter().count();
    assert_eq!(count, sketch.num_retained());
}

#[test]
fn test_bounds_empty_sketch() {
    let sketch = ThetaSketch::builder().lg_k(12).build();
    assert!(sketch.is_empty());
    assert!(!sketch.is_estimation_mode());
    assert_eq!(sketch.theta(), 1.0);
    assert_eq!(sketch.estimate(), 0.0);
    assert_eq!(sketch.lower_bound(NumStdDev::One), 0.0);
    assert_eq!(sketch.upper_bound(NumStdDev::One), 0.0);
    assert_eq!(sketch.lower_bound(NumStdDev::Two), 0.0);
    assert_eq!(sketch.upper_bound(NumStdDev::Two), 0.0);
    assert_eq!(sketch.lower_bound(NumStdDev::Three), 0.0);
    assert_eq!(sketch.upper_bound(NumStdDev::Three), 0.0);
}

#[test]
fn test_bounds_exact_mode() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build();
    for i in 0..2000 {
        sketch.update_i32(i);
    }
    assert!(!sketch.is_empty());
    assert!(!sketch.is_estimation_mode());
    assert_eq!(sketch.theta(), 1.0);
    assert_eq!(sketch.estimate(), 2000.0);
    assert_eq!(sketch.lower_bound(NumStdDev::One), 2000.0);
    assert_eq!(sketch.upper_bound(NumStdDev::One), 2000.0);
}

#[test]
fn test_bounds_estimation_mode() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build();
    let n = 10000;
    for i in 0..n {
        sketch.update_i32(i);
    }
    assert!(!sketch.is_empty());
    assert!(sketch.is_estimation_mode());
    assert!(sketch.theta() < 1.0);

    let estimate = sketch.estimate();
    let lower_bound_1 = sketch.lower_bound(NumStdDev::One);
    let upper_bound_1 = sketch.upper_bound(NumStdDev::One);
    let lower_bound_2 = sketch.lower_bound(NumStdDev::Two);
    let upper_bound_2 = sketch.upper_bound(NumStdDev::Two);
    let lower_bound_3 = sketch.lower_bound(NumStdDev::Three);
    let upper_bound_3 = sketch.upper_bound(NumStdDev::Three);

    // Check estimate is within a reasonable margin (3% to be safe)
    assert!(
        (estimate - n as f64).abs() < n as f64 * 0.03,
        "estimate {} is not within 3% of {}",
        estimate,
        n
    );

    // Check bounds are in correct order
    assert!(lower_bound_1 < estimate);
    assert!(estimate < upper_bound_1);
    assert!(lower_bound_2 < estimate);
    assert!(estimate < upper_bound_2);
    assert!(lower_bound_3 < estimate);
    assert!(estimate < upper_bound_3);

    // Check that wider confidence intervals are indeed wider
    assert!(lower_bound_3 < lower_bound_2);
    assert!(lower_bound_2 < lower_bound_1);
    assert!(upper_bound_1 < upper_bound_2);
    assert!(upper_bound_2 < upper_bound_3);
}

#[test]
fn test_bounds_with_sampling() {
    let mut sketch = ThetaSketch::builder()
        .lg_k(12)
        .sampling_probability(0.5)
        .build();

    for i in 0..1000 {
        sketch.update_i32(i);
    }

    assert!(!sketch.is_empty());
    assert!(sketch.is_estimation_mode());
    assert!(sketch.theta() < 1.0);

    let estimate = sketch.estimate();
    let lower_bound = sketch.lower_bound(NumStdDev::Two);
    let upper_bound = sketch.upper_bound(NumStdDev::Two);

    assert!(lower_bound <= estimate);
    assert!(estimate <= upper_bound);
}

#[test]
fn test_bounds_empty_estimation_mode() {
    // A sketch with sampling probability < 1.0 starts in estimation mode
    let sketch = ThetaSketch::builder()
        .lg_k(12)
        .sampling_probability(0.1)
        .build();

    // The sketch is empty even though theta < 1.0; when empty, both bounds
    // are zero
    assert!(sketch.is_empty());
    assert!(sketch.is_estimation_mode());
    assert_eq!(sketch.estimate(), 0.0);
    assert_eq!(sketch.lower_bound(NumStdDev::One), 0.0);
    assert_eq!(sketch.upper_bound(NumStdDev::One), 0.0);
}

#[test]
fn test_to_string_summary() {
    let mut sketch = ThetaSketch::builder().lg_k(12).build();
    sketch.update_str("apple");
    sketch.update_str("banana");

    let summary = sketch.to_string(false);
    assert!(summary.contains("Update Theta sketch summary"));
    assert!(summary.contains("num retained keys    : 2"));
    assert!(!summary.contains("Retained keys"));

    let with_items = sketch.to_string(true);
    assert!(with_items.contains("Retained keys"));
}
