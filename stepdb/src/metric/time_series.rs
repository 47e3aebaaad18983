// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use crate::metric::constants::BLOCK_SIZE_FOR_TIME_SERIES;
use crate::metric::sample::Sample;
use crate::utils::error::StorageError;

/// A block of at most BLOCK_SIZE_FOR_TIME_SERIES samples, sorted by time.
#[derive(Debug, Default, PartialEq)]
struct TimeSeriesBlock {
  samples: Vec<Sample>,
}

impl TimeSeriesBlock {
  fn new() -> Self {
    // Allocate the full capacity up front, so that the vector isn't reallocated during appends.
    TimeSeriesBlock {
      samples: Vec::with_capacity(BLOCK_SIZE_FOR_TIME_SERIES),
    }
  }

  fn is_full(&self) -> bool {
    self.samples.len() >= BLOCK_SIZE_FOR_TIME_SERIES
  }

  /// Append the samples in the given (inclusive) range to `retval`.
  fn extend_with_range(&self, range_start_time: i64, range_end_time: i64, retval: &mut Vec<Sample>) {
    let start = self
      .samples
      .partition_point(|sample| sample.get_time() < range_start_time);
    let end = self
      .samples
      .partition_point(|sample| sample.get_time() <= range_end_time);
    if start < end {
      retval.extend_from_slice(&self.samples[start..end]);
    }
  }
}

/// Represents the samples of one series. Samples are held in blocks of BLOCK_SIZE_FOR_TIME_SERIES,
/// and the initial time of each block is stored (also called 'skip pointer' in literature), so that
/// a range lookup binary-searches for its first block rather than scanning all of them.
#[derive(Debug, Default, PartialEq)]
pub struct TimeSeries {
  blocks: Vec<TimeSeriesBlock>,

  /// The initial timestamps in the blocks. Always the same length as `blocks`.
  initial_times: Vec<i64>,
}

impl TimeSeries {
  /// Create a new empty time series.
  pub fn new() -> Self {
    TimeSeries {
      blocks: Vec::new(),
      initial_times: Vec::new(),
    }
  }

  /// Get the time of the latest sample.
  pub fn get_last_time(&self) -> Option<i64> {
    self
      .blocks
      .last()
      .and_then(|block| block.samples.last())
      .map(|sample| sample.get_time())
  }

  /// Check that a sample at `time` may be appended after a sample at `last_time`. Errors
  /// carry an empty series name, for the caller to fill in.
  pub fn check_append(last_time: Option<i64>, time: i64) -> Result<(), StorageError> {
    match last_time {
      Some(last_time) if time == last_time => Err(StorageError::DuplicateSample(time, String::new())),
      Some(last_time) if time < last_time => Err(StorageError::OutOfOrderSample(
        time,
        last_time,
        String::new(),
      )),
      _ => Ok(()),
    }
  }

  /// Append the given time and value to the time series. The time must be after the last time.
  pub fn append(&mut self, time: i64, value: f64) -> Result<(), StorageError> {
    Self::check_append(self.get_last_time(), time)?;

    if self.blocks.last().map_or(true, |block| block.is_full()) {
      self.blocks.push(TimeSeriesBlock::new());
      self.initial_times.push(time);
    }

    // The check above guarantees a last block with capacity left.
    if let Some(block) = self.blocks.last_mut() {
      block.samples.push(Sample::new(time, value));
    }

    Ok(())
  }

  /// Get the blocks starting from the first one that can hold samples at or after `range_start_time`.
  fn get_blocks_from(&self, range_start_time: i64) -> impl Iterator<Item = (&TimeSeriesBlock, i64)> {
    // The first block that can overlap is the last one starting at or before range_start_time.
    let first_block = self
      .initial_times
      .partition_point(|time| *time <= range_start_time)
      .saturating_sub(1);

    self.blocks[first_block..]
      .iter()
      .zip(self.initial_times[first_block..].iter().copied())
  }

  /// Get the samples between given start and end time (both inclusive), sorted by time.
  pub fn get_samples(&self, range_start_time: i64, range_end_time: i64) -> Vec<Sample> {
    let mut retval = Vec::new();
    if range_start_time > range_end_time {
      return retval;
    }

    for (block, initial_time) in self.get_blocks_from(range_start_time) {
      if initial_time > range_end_time {
        break;
      }
      block.extend_with_range(range_start_time, range_end_time, &mut retval);
    }

    retval
  }

  /// Get the samples of the first block that has any between given start and end time (both
  /// inclusive). Empty once no block has samples in the range.
  pub fn get_block_samples(&self, range_start_time: i64, range_end_time: i64) -> Vec<Sample> {
    let mut retval = Vec::new();
    if range_start_time > range_end_time {
      return retval;
    }

    // Only the first block can end before range_start_time, so at most two blocks are visited.
    for (block, initial_time) in self.get_blocks_from(range_start_time) {
      if initial_time > range_end_time || !retval.is_empty() {
        break;
      }
      block.extend_with_range(range_start_time, range_end_time, &mut retval);
    }

    retval
  }

  /// Get the number of samples in this time series.
  pub fn len(&self) -> usize {
    self.blocks.iter().map(|block| block.samples.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }
}
