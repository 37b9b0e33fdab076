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

//! Confidence bounds for the number of distinct inputs of a Theta sketch.
//!
//! A Theta sketch with threshold fraction `theta` retains each distinct input
//! independently with probability `theta`, so the retained count is a
//! binomial draw from the unknown cardinality `n`. These functions invert
//! that relationship: given the observed retained count they bound `n` at
//! the requested confidence level using the normal approximation of the
//! binomial, with a Clopper-Pearson style zero-count case.

use crate::common::NumStdDev;
use crate::error::Error;

/// Returns the lower confidence bound on the number of distinct inputs.
///
/// `num_retained` is the observed retained count and `theta` the sampling
/// fraction in (0, 1].
pub(crate) fn lower_bound(
    num_retained: u64,
    theta: f64,
    num_std_dev: NumStdDev,
) -> Result<f64, Error> {
    validate_theta(theta)?;
    let n = num_retained as f64;
    if num_retained == 0 || theta >= 1.0 {
        return Ok(n);
    }
    let estimate = n / theta;
    let std_dev = (n * (1.0 - theta)).sqrt() / theta;
    let bound = estimate - (num_std_dev.as_u8() as f64) * std_dev;
    // the true count is never less than what was actually observed
    Ok(bound.max(n))
}

/// Returns the upper confidence bound on the number of distinct inputs.
pub(crate) fn upper_bound(
    num_retained: u64,
    theta: f64,
    num_std_dev: NumStdDev,
    is_empty: bool,
) -> Result<f64, Error> {
    validate_theta(theta)?;
    let n = num_retained as f64;
    if theta >= 1.0 {
        return Ok(n);
    }
    if num_retained == 0 {
        if is_empty {
            return Ok(0.0);
        }
        // Zero retained under sampling: the largest n for which seeing no
        // entries is still plausible, i.e. (1 - theta)^n >= delta.
        let delta = num_std_dev.tail_probability();
        return Ok((delta.ln() / (1.0 - theta).ln()).ceil());
    }
    let estimate = n / theta;
    let std_dev = (n * (1.0 - theta)).sqrt() / theta;
    let bound = estimate + (num_std_dev.as_u8() as f64) * std_dev;
    Ok(bound.max(estimate))
}

fn validate_theta(theta: f64) -> Result<(), Error> {
    if theta > 0.0 && theta <= 1.0 {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "theta must be in (0, 1], got {theta}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_mode() {
        assert_eq!(lower_bound(100, 1.0, NumStdDev::Two).unwrap(), 100.0);
        assert_eq!(upper_bound(100, 1.0, NumStdDev::Two, false).unwrap(), 100.0);
    }

    #[test]
    fn test_bounds_bracket_estimate() {
        let n = 1000u64;
        let theta = 0.25;
        let estimate = n as f64 / theta;
        for nsd in [NumStdDev::One, NumStdDev::Two, NumStdDev::Three] {
            let lb = lower_bound(n, theta, nsd).unwrap();
            let ub = upper_bound(n, theta, nsd, false).unwrap();
            assert!(lb <= estimate, "lb {lb} > estimate {estimate}");
            assert!(ub >= estimate, "ub {ub} < estimate {estimate}");
        }
    }

    #[test]
    fn test_wider_intervals_for_more_std_devs() {
        let n = 1000u64;
        let theta = 0.25;
        let lb1 = lower_bound(n, theta, NumStdDev::One).unwrap();
        let lb3 = lower_bound(n, theta, NumStdDev::Three).unwrap();
        let ub1 = upper_bound(n, theta, NumStdDev::One, false).unwrap();
        let ub3 = upper_bound(n, theta, NumStdDev::Three, false).unwrap();
        assert!(lb3 < lb1);
        assert!(ub3 > ub1);
    }

    #[test]
    fn test_zero_retained_under_sampling() {
        let lb = lower_bound(0, 0.5, NumStdDev::Two).unwrap();
        let ub = upper_bound(0, 0.5, NumStdDev::Two, false).unwrap();
        assert_eq!(lb, 0.0);
        assert!(ub > 0.0);

        // an empty sketch has seen nothing at all
        let ub_empty = upper_bound(0, 0.5, NumStdDev::Two, true).unwrap();
        assert_eq!(ub_empty, 0.0);
    }

    #[test]
    fn test_invalid_theta() {
        assert!(lower_bound(1, 0.0, NumStdDev::One).is_err());
        assert!(lower_bound(1, 1.5, NumStdDev::One).is_err());
    }
}
