// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use std::collections::VecDeque;

use crate::metric::sample::Sample;
use crate::storage::SampleCursor;

/// The samples of one series within a trailing window `(step - range, step]`.
///
/// The window is advanced incrementally: every sample is admitted from the cursor
/// and evicted from the front at most once.
pub struct WindowBuffer {
  cursor: Box<dyn SampleCursor>,
  samples: VecDeque<Sample>,
  range: i64,
}

impl WindowBuffer {
  pub fn new(cursor: Box<dyn SampleCursor>, range: i64) -> Self {
    WindowBuffer {
      cursor,
      samples: VecDeque::new(),
      range,
    }
  }

  /// Move the end of the window to `step`. Steps must not decrease between calls.
  pub fn advance_to(&mut self, step: i64) {
    let window_start = step.saturating_sub(self.range);

    // Samples at or before the window start would be evicted right away.
    self.cursor.seek(window_start.saturating_add(1));
    while let Some(sample) = self.cursor.peek() {
      if sample.get_time() > step {
        break;
      }
      self.samples.push_back(sample);
      self.cursor.next();
    }

    while let Some(sample) = self.samples.front() {
      if sample.get_time() > window_start {
        break;
      }
      self.samples.pop_front();
    }
  }

  /// Get the samples in the window, or None when it is empty.
  pub fn window(&mut self) -> Option<&[Sample]> {
    if self.samples.is_empty() {
      return None;
    }
    Some(self.samples.make_contiguous())
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }
}
