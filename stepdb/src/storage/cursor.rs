// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use crate::metric::sample::Sample;
use crate::storage::SampleCursor;

/// A cursor over a time-sorted snapshot of samples.
#[derive(Debug, Default)]
pub struct SliceCursor {
  samples: Vec<Sample>,
  position: usize,
}

impl SliceCursor {
  pub fn new(samples: Vec<Sample>) -> Self {
    debug_assert!(samples
      .windows(2)
      .all(|pair| pair[0].get_time() < pair[1].get_time()));
    SliceCursor {
      samples,
      position: 0,
    }
  }

  /// A cursor without any samples.
  pub fn empty() -> Self {
    Self::default()
  }
}

impl Iterator for SliceCursor {
  type Item = Sample;

  fn next(&mut self) -> Option<Sample> {
    let sample = self.samples.get(self.position).copied();
    if sample.is_some() {
      self.position += 1;
    }
    sample
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    let remaining = self.samples.len() - self.position;
    (remaining, Some(remaining))
  }
}

impl SampleCursor for SliceCursor {
  fn peek(&self) -> Option<Sample> {
    self.samples.get(self.position).copied()
  }

  fn seek(&mut self, time: i64) -> Option<Sample> {
    let remaining = &self.samples[self.position..];
    self.position += remaining.partition_point(|sample| sample.get_time() < time);
    self.peek()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn create_cursor() -> SliceCursor {
    SliceCursor::new((0..5).map(|i| Sample::new(i * 10, i as f64)).collect())
  }

  #[test]
  fn test_iterate() {
    let cursor = create_cursor();
    let times: Vec<i64> = cursor.map(|s| s.get_time()).collect();
    assert_eq!(times, vec![0, 10, 20, 30, 40]);
  }

  #[test]
  fn test_peek_does_not_consume() {
    let mut cursor = create_cursor();
    assert_eq!(cursor.peek(), Some(Sample::new(0, 0.0)));
    assert_eq!(cursor.peek(), Some(Sample::new(0, 0.0)));
    assert_eq!(cursor.next(), Some(Sample::new(0, 0.0)));
    assert_eq!(cursor.peek(), Some(Sample::new(10, 1.0)));
  }

  #[test]
  fn test_seek() {
    let mut cursor = create_cursor();
    assert_eq!(cursor.seek(15), Some(Sample::new(20, 2.0)));
    assert_eq!(cursor.seek(20), Some(Sample::new(20, 2.0)));

    // Seeking backwards never rewinds.
    assert_eq!(cursor.seek(0), Some(Sample::new(20, 2.0)));
    assert_eq!(cursor.size_hint(), (3, Some(3)));

    assert_eq!(cursor.seek(41), None);
    assert_eq!(cursor.next(), None);
  }

  #[test]
  fn test_empty() {
    let mut cursor = SliceCursor::empty();
    assert_eq!(cursor.peek(), None);
    assert_eq!(cursor.seek(0), None);
    assert_eq!(cursor.next(), None);
  }
}
