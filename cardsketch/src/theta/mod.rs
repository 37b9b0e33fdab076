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

//! Theta sketch for cardinality estimation.
//!
//! The Theta sketch is a generalization of the Kth Minimum Value (KMV)
//! sketch. It hashes each input to a 64-bit key and retains the keys below a
//! sampling threshold theta, which shrinks as the stream grows so that the
//! retained set stays close to the configured nominal size K. The estimate
//! is simply the retained count divided by the effective sampling fraction.
//!
//! Three forms are provided:
//!
//! - [`ThetaSketch`]: the mutable update form built through
//!   [`ThetaSketch::builder`].
//! - [`CompactThetaSketch`]: an immutable snapshot with versioned binary
//!   serialization; ordered snapshots compress via delta bit-packing.
//! - [`WrappedCompactThetaSketch`]: a zero-copy read-only view over a
//!   serialized compact image.

mod bit_pack;
mod compact;
mod hash_table;
mod serialization;
mod sketch;
mod wrapper;

pub use self::compact::CompactThetaSketch;
pub use self::sketch::ThetaSketch;
pub use self::sketch::ThetaSketchBuilder;
pub use self::wrapper::WrappedCompactThetaSketch;
pub use self::wrapper::WrappedThetaEntries;
