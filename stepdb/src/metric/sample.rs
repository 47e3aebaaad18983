// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use approx::abs_diff_eq;
use serde::{Deserialize, Serialize};

/// Represents a sample in a time series.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Sample {
  /// Milliseconds from epoch.
  time: i64,

  /// Value for this sample.
  value: f64,
}

impl Sample {
  /// Create a new Sample from given time and value.
  pub fn new(time: i64, value: f64) -> Self {
    Sample { time, value }
  }

  /// Get time.
  pub fn get_time(&self) -> i64 {
    self.time
  }

  /// Get value.
  pub fn get_value(&self) -> f64 {
    self.value
  }

  /// Whether both time and the exact bit pattern of the value match.
  pub fn is_identical(&self, other: &Sample) -> bool {
    self.time == other.time && self.value.to_bits() == other.value.to_bits()
  }
}

impl PartialEq for Sample {
  #[inline]
  fn eq(&self, other: &Sample) -> bool {
    // Two samples are equal if their times are equal, and their values are either equal or are NaN.
    if self.time == other.time {
      if self.value.is_nan() {
        return other.value.is_nan();
      } else {
        return abs_diff_eq!(self.value, other.value);
      }
    }
    false
  }
}
