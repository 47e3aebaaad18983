// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! The storage boundary consumed by the query engine.
//!
//! The engine only ever talks to a [`Querier`] (label catalog, postings and sample cursors).
//! [`Appender`] is used to populate a store before querying. [`memory::MemStorage`] is an
//! in-memory implementation of both.

pub mod cursor;
pub mod memory;

use crate::metric::labels::Labels;
use crate::metric::sample::Sample;
use crate::utils::error::StorageError;

/// Identifier of a series within one store.
pub type SeriesId = u64;

/// A forward-only cursor over the samples of one series, in time order.
pub trait SampleCursor: Iterator<Item = Sample> + Send {
  /// Get the next sample without consuming it.
  fn peek(&self) -> Option<Sample>;

  /// Skip to the first sample with time >= `time`, and return it without consuming it.
  fn seek(&mut self, time: i64) -> Option<Sample>;
}

/// Read access to a store.
pub trait Querier: Send + Sync {
  /// Get every series in the store along with its label set.
  fn get_label_sets(&self) -> Vec<(SeriesId, Labels)>;

  /// Get the series carrying exactly the given label name and value.
  fn get_postings(&self, label_name: &str, label_value: &str) -> Vec<SeriesId>;

  /// Get the label set of a series.
  fn get_labels(&self, series_id: SeriesId) -> Option<Labels>;

  /// Open a cursor over the samples of a series within [from_time, to_time].
  fn cursor(
    &self,
    series_id: SeriesId,
    from_time: i64,
    to_time: i64,
  ) -> Result<Box<dyn SampleCursor>, StorageError>;
}

/// Write access to a store. Samples added are only visible after commit.
pub trait Appender {
  /// Add a sample to the series identified by `labels`, creating the series if needed.
  fn add(&mut self, labels: &Labels, time: i64, value: f64) -> Result<(), StorageError>;

  /// Make all added samples visible.
  fn commit(&mut self) -> Result<(), StorageError>;

  /// Discard all added samples.
  fn rollback(&mut self);
}
