// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! Functions evaluated over the samples of one series window.
//!
//! Every function is pure: it sees the window samples (oldest first) together with the window
//! bounds, and returns None when there is not enough data to produce a value.

use std::fmt;
use std::str::FromStr;

use crate::metric::sample::Sample;
use crate::utils::error::QueryError;
use crate::utils::time::millis_to_seconds;

/// Bounds `(start, end]` of the window a function is evaluated over, in milliseconds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WindowBounds {
  start: i64,
  end: i64,
}

impl WindowBounds {
  pub fn new(start: i64, end: i64) -> Self {
    WindowBounds { start, end }
  }

  /// Bounds of the window of the given range ending at `end`. The start saturates at i64::MIN.
  pub fn ending_at(end: i64, range: i64) -> Self {
    WindowBounds {
      start: end.saturating_sub(range),
      end,
    }
  }

  pub fn get_start(&self) -> i64 {
    self.start
  }

  pub fn get_end(&self) -> i64 {
    self.end
  }

  pub fn get_range(&self) -> i64 {
    self.end - self.start
  }
}

/// The functions that can be applied to a range vector.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Function {
  Rate,
  Increase,
  Delta,
  Irate,
  Idelta,
  Changes,
  Resets,
  AvgOverTime,
  MinOverTime,
  MaxOverTime,
  SumOverTime,
  CountOverTime,
  LastOverTime,
  StddevOverTime,
  StdvarOverTime,
}

impl Function {
  pub fn name(&self) -> &'static str {
    match self {
      Function::Rate => "rate",
      Function::Increase => "increase",
      Function::Delta => "delta",
      Function::Irate => "irate",
      Function::Idelta => "idelta",
      Function::Changes => "changes",
      Function::Resets => "resets",
      Function::AvgOverTime => "avg_over_time",
      Function::MinOverTime => "min_over_time",
      Function::MaxOverTime => "max_over_time",
      Function::SumOverTime => "sum_over_time",
      Function::CountOverTime => "count_over_time",
      Function::LastOverTime => "last_over_time",
      Function::StddevOverTime => "stddev_over_time",
      Function::StdvarOverTime => "stdvar_over_time",
    }
  }

  /// Evaluate this function over the given window. `window` is None when the window is empty.
  pub fn evaluate(&self, window: Option<&[Sample]>, bounds: &WindowBounds) -> Option<f64> {
    let samples = window.filter(|samples| !samples.is_empty())?;

    match self {
      Function::Rate => extrapolated_rate(samples, bounds, true, true),
      Function::Increase => extrapolated_rate(samples, bounds, true, false),
      Function::Delta => extrapolated_rate(samples, bounds, false, false),
      Function::Irate => instant_value(samples, true),
      Function::Idelta => instant_value(samples, false),
      Function::Changes => Some(changes(samples)),
      Function::Resets => Some(resets(samples)),
      Function::AvgOverTime => Some(avg_kahan(samples)),
      Function::MinOverTime => Some(min_value(samples)),
      Function::MaxOverTime => Some(max_value(samples)),
      Function::SumOverTime => Some(sum_kahan(samples)),
      Function::CountOverTime => Some(samples.len() as f64),
      Function::LastOverTime => samples.last().map(|sample| sample.get_value()),
      Function::StddevOverTime => Some(variance_kahan(samples).sqrt()),
      Function::StdvarOverTime => Some(variance_kahan(samples)),
    }
  }
}

impl FromStr for Function {
  type Err = QueryError;

  fn from_str(name: &str) -> Result<Self, Self::Err> {
    let function = match name {
      "rate" => Function::Rate,
      "increase" => Function::Increase,
      "delta" => Function::Delta,
      "irate" => Function::Irate,
      "idelta" => Function::Idelta,
      "changes" => Function::Changes,
      "resets" => Function::Resets,
      "avg_over_time" => Function::AvgOverTime,
      "min_over_time" => Function::MinOverTime,
      "max_over_time" => Function::MaxOverTime,
      "sum_over_time" => Function::SumOverTime,
      "count_over_time" => Function::CountOverTime,
      "last_over_time" => Function::LastOverTime,
      "stddev_over_time" => Function::StddevOverTime,
      "stdvar_over_time" => Function::StdvarOverTime,
      _ => {
        return Err(QueryError::InvalidQuery(format!(
          "unknown function with name {:?}",
          name
        )))
      }
    };
    Ok(function)
  }
}

impl fmt::Display for Function {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Rate of change over the window, extrapolated towards the window bounds.
///
/// The extrapolation covers the gap to a window bound when it is less than 110% of the
/// average sample interval, and half an average interval otherwise. A counter is never
/// extrapolated below zero. With `is_rate` the result is per second of the window range.
fn extrapolated_rate(
  samples: &[Sample],
  bounds: &WindowBounds,
  is_counter: bool,
  is_rate: bool,
) -> Option<f64> {
  if samples.len() < 2 {
    return None;
  }
  let first = samples[0];
  let last = samples[samples.len() - 1];

  let mut delta = last.get_value() - first.get_value();
  if is_counter {
    for pair in samples.windows(2) {
      if pair[1].get_value() < pair[0].get_value() {
        delta += pair[0].get_value();
      }
    }
  }

  let sampled = millis_to_seconds(last.get_time() - first.get_time());
  if sampled <= 0.0 {
    return None;
  }
  let average_interval = sampled / (samples.len() - 1) as f64;

  let mut to_start = millis_to_seconds(first.get_time() - bounds.get_start());
  let to_end = millis_to_seconds(bounds.get_end() - last.get_time());

  if is_counter && delta > 0.0 && first.get_value() >= 0.0 {
    let to_zero = sampled * (first.get_value() / delta);
    if to_zero < to_start {
      to_start = to_zero;
    }
  }

  let threshold = average_interval * 1.1;
  let mut interval = sampled;
  interval += if to_start < threshold {
    to_start
  } else {
    average_interval / 2.0
  };
  interval += if to_end < threshold {
    to_end
  } else {
    average_interval / 2.0
  };

  delta *= interval / sampled;
  if is_rate {
    let range = millis_to_seconds(bounds.get_range());
    if range <= 0.0 {
      return None;
    }
    delta /= range;
  }
  Some(delta)
}

/// Per-second rate (`irate`) or plain difference (`idelta`) of the last two samples.
fn instant_value(samples: &[Sample], is_rate: bool) -> Option<f64> {
  if samples.len() < 2 {
    return None;
  }
  let last = samples[samples.len() - 1];
  let previous = samples[samples.len() - 2];

  let mut difference = last.get_value() - previous.get_value();
  if !is_rate {
    return Some(difference);
  }
  if last.get_value() < previous.get_value() {
    difference = last.get_value();
  }

  let elapsed = millis_to_seconds(last.get_time() - previous.get_time());
  if elapsed <= 0.0 {
    return None;
  }
  Some(difference / elapsed)
}

fn changes(samples: &[Sample]) -> f64 {
  samples
    .windows(2)
    .filter(|pair| {
      let (previous, current) = (pair[0].get_value(), pair[1].get_value());
      !(current == previous || (current.is_nan() && previous.is_nan()))
    })
    .count() as f64
}

fn resets(samples: &[Sample]) -> f64 {
  samples
    .windows(2)
    .filter(|pair| pair[1].get_value() < pair[0].get_value())
    .count() as f64
}

// NaN is replaced by any real value; an all-NaN window yields NaN.
fn min_value(samples: &[Sample]) -> f64 {
  samples.iter().fold(f64::NAN, |min, sample| {
    let value = sample.get_value();
    if value < min || min.is_nan() {
      value
    } else {
      min
    }
  })
}

fn max_value(samples: &[Sample]) -> f64 {
  samples.iter().fold(f64::NAN, |max, sample| {
    let value = sample.get_value();
    if value > max || max.is_nan() {
      value
    } else {
      max
    }
  })
}

/// Compensated (Kahan-Neumaier) summation step. Returns the new sum and compensation.
#[inline(never)]
fn kahan_inc(inc: f64, sum: f64, c: f64) -> (f64, f64) {
  let t = sum + inc;
  let c = if t.is_infinite() {
    0.0
  } else if sum.abs() >= inc.abs() {
    c + ((sum - t) + inc)
  } else {
    c + ((inc - t) + sum)
  };
  (t, c)
}

fn sum_kahan(samples: &[Sample]) -> f64 {
  let (sum, c) = samples
    .iter()
    .fold((0.0, 0.0), |(sum, c), sample| kahan_inc(sample.get_value(), sum, c));
  if sum.is_infinite() {
    sum
  } else {
    sum + c
  }
}

// Switches to an incremental mean once the running sum overflows.
fn avg_kahan(samples: &[Sample]) -> f64 {
  if samples.len() == 1 {
    return samples[0].get_value();
  }

  let mut sum = samples[0].get_value();
  let mut c = 0.0;
  let mut mean = 0.0;
  let mut incremental = false;

  for (i, sample) in samples.iter().enumerate().skip(1) {
    let count = (i + 1) as f64;

    if !incremental {
      let (new_sum, new_c) = kahan_inc(sample.get_value(), sum, c);
      if !new_sum.is_infinite() {
        sum = new_sum;
        c = new_c;
        continue;
      }
      incremental = true;
      mean = sum / (count - 1.0);
      c /= count - 1.0;
    }

    let q = (count - 1.0) / count;
    (mean, c) = kahan_inc(sample.get_value() / count, q * mean, q * c);
  }

  if incremental {
    mean + c
  } else {
    let count = samples.len() as f64;
    sum / count + c / count
  }
}

/// Population variance using Welford's algorithm with compensated accumulators.
fn variance_kahan(samples: &[Sample]) -> f64 {
  let mut count = 0.0;
  let mut mean = 0.0;
  let mut c_mean = 0.0;
  let mut m2 = 0.0;
  let mut c_m2 = 0.0;

  for sample in samples {
    count += 1.0;
    let delta = sample.get_value() - (mean + c_mean);
    (mean, c_mean) = kahan_inc(delta / count, mean, c_mean);
    let new_delta = sample.get_value() - (mean + c_mean);
    (m2, c_m2) = kahan_inc(delta * new_delta, m2, c_m2);
  }

  if count == 0.0 {
    return f64::NAN;
  }
  (m2 + c_m2) / count
}

#[cfg(test)]
mod tests {
  use super::*;

  use approx::assert_abs_diff_eq;
  use test_case::test_case;

  fn samples(points: &[(i64, f64)]) -> Vec<Sample> {
    points
      .iter()
      .map(|(time, value)| Sample::new(*time, *value))
      .collect()
  }

  fn evaluate(function: Function, points: &[(i64, f64)], start: i64, end: i64) -> Option<f64> {
    let samples = samples(points);
    function.evaluate(Some(&samples), &WindowBounds::new(start, end))
  }

  #[test]
  fn test_rate_linear() {
    let rate = evaluate(Function::Rate, &[(0, 0.0), (60_000, 60.0)], 0, 60_000).unwrap();
    assert_abs_diff_eq!(rate, 1.0, epsilon = 1e-9);
  }

  #[test]
  fn test_rate_counter_reset() {
    // The drop from 100 to 5 is a reset: the counter increased by 5 over 10s.
    let rate = evaluate(Function::Rate, &[(0, 100.0), (10_000, 5.0)], 0, 10_000).unwrap();
    assert!(rate >= 0.0);
    assert_abs_diff_eq!(rate, 0.5, epsilon = 1e-9);

    let increase = evaluate(Function::Increase, &[(0, 100.0), (10_000, 5.0)], 0, 10_000).unwrap();
    assert_abs_diff_eq!(increase, 5.0, epsilon = 1e-9);
  }

  #[test]
  fn test_rate_extrapolation() {
    // Samples every 10s, 5s away from both window bounds: extrapolated by 5s on each side.
    let points: Vec<(i64, f64)> = (0..6)
      .map(|i| (5_000 + i * 10_000, 100.0 + i as f64 * 10.0))
      .collect();
    let increase = evaluate(Function::Increase, &points, 0, 60_000).unwrap();
    assert_abs_diff_eq!(increase, 60.0, epsilon = 1e-9);

    // Gaps larger than 110% of the average interval are extrapolated by half an interval.
    let points = [(20_000, 100.0), (30_000, 110.0), (40_000, 120.0)];
    let increase = evaluate(Function::Increase, &points, 0, 60_000).unwrap();
    assert_abs_diff_eq!(increase, 30.0, epsilon = 1e-9);
  }

  #[test]
  fn test_rate_not_extrapolated_below_zero() {
    // Extrapolating 10s back at 1/s would reach -5; it stops at zero instead.
    let points = [(10_000, 5.0), (20_000, 15.0), (30_000, 25.0)];
    let increase = evaluate(Function::Increase, &points, 0, 30_000).unwrap();
    assert_abs_diff_eq!(increase, 25.0, epsilon = 1e-9);

    // Delta is not a counter function and is not clamped.
    let delta = evaluate(Function::Delta, &points, 0, 30_000).unwrap();
    assert_abs_diff_eq!(delta, 30.0, epsilon = 1e-9);
  }

  #[test]
  fn test_delta_gauge() {
    let delta = evaluate(Function::Delta, &[(0, 100.0), (10_000, 5.0)], 0, 10_000).unwrap();
    assert_abs_diff_eq!(delta, -95.0, epsilon = 1e-9);
  }

  #[test_case(Function::Rate; "rate")]
  #[test_case(Function::Increase; "increase")]
  #[test_case(Function::Delta; "delta")]
  #[test_case(Function::Irate; "irate")]
  #[test_case(Function::Idelta; "idelta")]
  fn test_needs_two_samples(function: Function) {
    assert_eq!(evaluate(function, &[(10_000, 1.0)], 0, 60_000), None);
  }

  #[test_case(Function::Rate; "rate")]
  #[test_case(Function::Changes; "changes")]
  #[test_case(Function::CountOverTime; "count_over_time")]
  #[test_case(Function::LastOverTime; "last_over_time")]
  fn test_empty_window(function: Function) {
    let bounds = WindowBounds::ending_at(60_000, 60_000);
    assert_eq!(function.evaluate(None, &bounds), None);
    assert_eq!(function.evaluate(Some(&[]), &bounds), None);
  }

  #[test]
  fn test_bounds_saturate() {
    let bounds = WindowBounds::ending_at(i64::MIN + 1000, 60_000);
    assert_eq!(bounds.get_start(), i64::MIN);
    assert_eq!(bounds.get_end(), i64::MIN + 1000);
    assert_eq!(bounds.get_range(), 1000);

    let samples = samples(&[(i64::MIN + 10, 1.0), (i64::MIN + 500, 2.0)]);
    assert!(Function::Rate.evaluate(Some(&samples), &bounds).is_some());
  }

  #[test]
  fn test_irate_and_idelta() {
    let points = [(0, 1.0), (10_000, 5.0), (20_000, 25.0)];
    assert_abs_diff_eq!(evaluate(Function::Irate, &points, 0, 20_000).unwrap(), 2.0);
    assert_abs_diff_eq!(evaluate(Function::Idelta, &points, 0, 20_000).unwrap(), 20.0);

    let reset = [(0, 10.0), (10_000, 20.0), (20_000, 4.0)];
    assert_abs_diff_eq!(evaluate(Function::Irate, &reset, 0, 20_000).unwrap(), 0.4);
    assert_abs_diff_eq!(evaluate(Function::Idelta, &reset, 0, 20_000).unwrap(), -16.0);
  }

  #[test_case(Function::Changes, 3.0; "changes")]
  #[test_case(Function::Resets, 1.0; "resets")]
  #[test_case(Function::AvgOverTime, 2.5; "avg_over_time")]
  #[test_case(Function::MinOverTime, 1.0; "min_over_time")]
  #[test_case(Function::MaxOverTime, 4.0; "max_over_time")]
  #[test_case(Function::SumOverTime, 10.0; "sum_over_time")]
  #[test_case(Function::CountOverTime, 4.0; "count_over_time")]
  #[test_case(Function::LastOverTime, 2.0; "last_over_time")]
  #[test_case(Function::StdvarOverTime, 1.25; "stdvar_over_time")]
  fn test_over_time(function: Function, expected: f64) {
    let points = [(1000, 1.0), (2000, 3.0), (3000, 4.0), (4000, 2.0)];
    let value = evaluate(function, &points, 0, 4000).unwrap();
    assert_abs_diff_eq!(value, expected, epsilon = 1e-12);
  }

  #[test]
  fn test_stddev_over_time() {
    let points: Vec<(i64, f64)> = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]
      .iter()
      .enumerate()
      .map(|(i, value)| ((i as i64 + 1) * 1000, *value))
      .collect();
    let value = evaluate(Function::StddevOverTime, &points, 0, 8000).unwrap();
    assert_abs_diff_eq!(value, 2.0, epsilon = 1e-12);

    let value = evaluate(Function::StddevOverTime, &[(1000, 3.0)], 0, 8000).unwrap();
    assert_abs_diff_eq!(value, 0.0);
  }

  #[test]
  fn test_nan_handling() {
    let points = [(1000, f64::NAN), (2000, 5.0), (3000, 3.0)];
    assert_eq!(evaluate(Function::MaxOverTime, &points, 0, 3000), Some(5.0));
    assert_eq!(evaluate(Function::MinOverTime, &points, 0, 3000), Some(3.0));

    let all_nan = [(1000, f64::NAN), (2000, f64::NAN)];
    assert!(evaluate(Function::MaxOverTime, &all_nan, 0, 3000).unwrap().is_nan());
    assert_eq!(evaluate(Function::Changes, &all_nan, 0, 3000), Some(0.0));
    assert!(evaluate(Function::SumOverTime, &points, 0, 3000).unwrap().is_nan());
  }

  #[test]
  fn test_sum_compensation() {
    let points = [(1000, 1e100), (2000, 1.0), (3000, -1e100)];
    assert_eq!(evaluate(Function::SumOverTime, &points, 0, 3000), Some(1.0));
  }

  #[test]
  fn test_avg_overflow() {
    let points = [(1000, f64::MAX), (2000, f64::MAX)];
    let value = evaluate(Function::AvgOverTime, &points, 0, 3000).unwrap();
    assert_eq!(value, f64::MAX);
  }

  #[test]
  fn test_from_str() {
    for function in [Function::Rate, Function::Idelta, Function::StdvarOverTime] {
      assert_eq!(function.name().parse::<Function>().unwrap(), function);
      assert_eq!(function.to_string(), function.name());
    }
    assert!(matches!(
      "histogram_quantile".parse::<Function>(),
      Err(QueryError::InvalidQuery(_))
    ));
  }
}
