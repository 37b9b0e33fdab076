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

//! Probabilistic distinct-count sketches.
//!
//! This crate implements two families of cardinality sketches over a stream
//! of hashed items:
//!
//! - [`theta`]: the Theta sketch, a generalization of the Kth Minimum Value
//!   (KMV) estimator. Provides a mutable update form, an immutable compact
//!   form with versioned binary serialization (including a bit-packed
//!   compressed format), and a zero-copy wrapped view over serialized images.
//! - [`cpc`]: the Compressed Probabilistic Counting sketch (FM85), which is
//!   more space-efficient than HyperLogLog when serialized.
//!
//! Both sketches hash their input with MurmurHash3 x64 128 under a
//! configurable seed. Sketches produced with different seeds are incompatible
//! and deserialization rejects mismatched seed hashes.
//!
//! Update methods widen narrow integers to `i64` and canonicalize floating
//! point values (`-0.0` to `+0.0`, all NaN patterns to one bit pattern) so
//! that sketches remain compatible across producers in other ecosystems.

pub mod common;
pub mod cpc;
pub mod error;
pub mod theta;

mod codec;
mod hash;
