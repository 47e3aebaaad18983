// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::debug;

use crate::metric::labels::{get_label_term, Labels};
use crate::metric::sample::Sample;
use crate::metric::time_series::TimeSeries;
use crate::storage::{Appender, Querier, SampleCursor, SeriesId};
use crate::utils::error::StorageError;
use crate::utils::sync::{Arc, AtomicCell, RwLock};

/// A series held in memory.
#[derive(Debug)]
struct MemSeries {
  labels: Labels,
  time_series: TimeSeries,
}

/// An in-memory store of series, indexed by label set and by label term.
#[derive(Debug)]
pub struct MemStorage {
  /// Map of series id to the series.
  series_map: DashMap<SeriesId, Arc<RwLock<MemSeries>>>,

  /// Map of label set to series id.
  series_ids: DashMap<Labels, SeriesId>,

  /// Map of label term (e.g. 'method~GET') to the ids of series carrying that label.
  postings: DashMap<String, Vec<SeriesId>>,

  next_series_id: AtomicCell<SeriesId>,
}

impl MemStorage {
  /// Create a new empty store.
  pub fn new() -> Self {
    MemStorage {
      series_map: DashMap::new(),
      series_ids: DashMap::new(),
      postings: DashMap::new(),
      next_series_id: AtomicCell::new(1),
    }
  }

  /// Get an appender to add samples to this store.
  pub fn appender(&self) -> MemAppender<'_> {
    MemAppender::new(self)
  }

  /// Get the number of series in this store.
  pub fn get_series_count(&self) -> usize {
    self.series_map.len()
  }

  /// Get the id of the series with the given label set.
  pub fn get_series_id(&self, labels: &Labels) -> Option<SeriesId> {
    self.series_ids.get(labels).map(|entry| *entry.value())
  }

  /// Remove the series with the given label set. Returns whether the series existed.
  pub fn remove_series(&self, labels: &Labels) -> bool {
    let Some((_, series_id)) = self.series_ids.remove(labels) else {
      return false;
    };
    self.series_map.remove(&series_id);
    for term in labels.get_label_terms() {
      if let Some(mut ids) = self.postings.get_mut(&term) {
        ids.retain(|id| *id != series_id);
      }
    }
    self.postings.retain(|_, ids| !ids.is_empty());

    debug!("Removed series {} with id {}", labels, series_id);
    true
  }

  /// Get the time of the latest sample of the given series.
  fn get_last_time(&self, labels: &Labels) -> Option<i64> {
    let series_id = self.get_series_id(labels)?;
    let series = self.series_map.get(&series_id)?.value().clone();
    let last_time = series.read().time_series.get_last_time();
    last_time
  }

  /// Get the series for the given label set, creating and indexing it if needed.
  fn get_or_create_series(&self, labels: &Labels) -> Arc<RwLock<MemSeries>> {
    // The entry keeps the shard of this label set locked until the series is published.
    let entry = self.series_ids.entry(labels.clone());
    if let Entry::Occupied(occupied) = &entry {
      if let Some(series) = self.series_map.get(occupied.get()) {
        return series.value().clone();
      }
    }

    let series_id = self.next_series_id.fetch_add(1);
    let series = Arc::new(RwLock::new(MemSeries {
      labels: labels.clone(),
      time_series: TimeSeries::new(),
    }));
    self.series_map.insert(series_id, series.clone());
    for term in labels.get_label_terms() {
      self.postings.entry(term).or_default().push(series_id);
    }
    entry.insert(series_id);

    debug!("Created series {} with id {}", labels, series_id);
    series
  }
}

/// Fill in the series name of an ordering error.
fn for_series(error: StorageError, labels: &Labels) -> StorageError {
  match error {
    StorageError::DuplicateSample(time, _) => StorageError::DuplicateSample(time, labels.to_string()),
    StorageError::OutOfOrderSample(time, last_time, _) => {
      StorageError::OutOfOrderSample(time, last_time, labels.to_string())
    }
    other => other,
  }
}

impl Default for MemStorage {
  fn default() -> Self {
    Self::new()
  }
}

impl Querier for MemStorage {
  fn get_label_sets(&self) -> Vec<(SeriesId, Labels)> {
    let mut label_sets: Vec<(SeriesId, Labels)> = self
      .series_map
      .iter()
      .map(|entry| (*entry.key(), entry.value().read().labels.clone()))
      .collect();
    label_sets.sort_by_key(|(series_id, _)| *series_id);
    label_sets
  }

  fn get_postings(&self, label_name: &str, label_value: &str) -> Vec<SeriesId> {
    let term = get_label_term(label_name, label_value);
    let mut ids = self
      .postings
      .get(&term)
      .map(|ids| ids.value().clone())
      .unwrap_or_default();
    ids.sort_unstable();
    ids
  }

  fn get_labels(&self, series_id: SeriesId) -> Option<Labels> {
    self
      .series_map
      .get(&series_id)
      .map(|series| series.value().read().labels.clone())
  }

  fn cursor(
    &self,
    series_id: SeriesId,
    from_time: i64,
    to_time: i64,
  ) -> Result<Box<dyn SampleCursor>, StorageError> {
    let series = self
      .series_map
      .get(&series_id)
      .map(|series| series.value().clone())
      .ok_or(StorageError::SeriesNotFound(series_id))?;

    Ok(Box::new(MemCursor::new(series, from_time, to_time)))
  }
}

/// A cursor over a [`MemSeries`] that copies out one block of samples at a time, holding the
/// read lock only for the copy. Samples committed while the cursor is open are returned once
/// the cursor reaches them.
struct MemCursor {
  series: Arc<RwLock<MemSeries>>,
  to_time: i64,

  /// Time from which the next block is read. None once the range is exhausted.
  next_time: Option<i64>,

  /// The in-range samples of the current block.
  samples: Vec<Sample>,
  position: usize,
}

impl MemCursor {
  fn new(series: Arc<RwLock<MemSeries>>, from_time: i64, to_time: i64) -> Self {
    let mut cursor = MemCursor {
      series,
      to_time,
      next_time: Some(from_time),
      samples: Vec::new(),
      position: 0,
    };
    cursor.fill();
    cursor
  }

  /// Read the next block once the current one is consumed.
  fn fill(&mut self) {
    while self.position >= self.samples.len() {
      let Some(from_time) = self.next_time else {
        return;
      };
      let samples = self
        .series
        .read()
        .time_series
        .get_block_samples(from_time, self.to_time);
      self.next_time = samples
        .last()
        .and_then(|sample| sample.get_time().checked_add(1));
      self.samples = samples;
      self.position = 0;
    }
  }
}

impl Iterator for MemCursor {
  type Item = Sample;

  fn next(&mut self) -> Option<Sample> {
    let sample = self.peek()?;
    self.position += 1;
    self.fill();
    Some(sample)
  }
}

impl SampleCursor for MemCursor {
  fn peek(&self) -> Option<Sample> {
    self.samples.get(self.position).copied()
  }

  fn seek(&mut self, time: i64) -> Option<Sample> {
    loop {
      let remaining = &self.samples[self.position..];
      match remaining.last() {
        None => return None,
        Some(last) if last.get_time() >= time => {
          self.position += remaining.partition_point(|sample| sample.get_time() < time);
          return self.peek();
        }
        Some(_) => {
          // The rest of this block is before `time`, so skip straight to it.
          self.position = self.samples.len();
          self.next_time = self.next_time.map(|next_time| next_time.max(time));
          self.fill();
        }
      }
    }
  }
}

/// Appender for [`MemStorage`]. Added samples are buffered until commit.
pub struct MemAppender<'a> {
  storage: &'a MemStorage,
  pending: Vec<(Labels, i64, f64)>,

  /// Latest pending time per label set, to validate ordering before commit.
  pending_last_times: HashMap<Labels, i64>,
}

impl<'a> MemAppender<'a> {
  fn new(storage: &'a MemStorage) -> Self {
    MemAppender {
      storage,
      pending: Vec::new(),
      pending_last_times: HashMap::new(),
    }
  }

  /// Get the number of samples waiting for commit.
  pub fn get_pending_count(&self) -> usize {
    self.pending.len()
  }
}

impl Appender for MemAppender<'_> {
  fn add(&mut self, labels: &Labels, time: i64, value: f64) -> Result<(), StorageError> {
    if labels.is_empty() {
      return Err(StorageError::EmptyLabelSet);
    }

    let last_time = match self.pending_last_times.get(labels) {
      Some(last_time) => Some(*last_time),
      None => self.storage.get_last_time(labels),
    };
    TimeSeries::check_append(last_time, time).map_err(|error| for_series(error, labels))?;

    self.pending_last_times.insert(labels.clone(), time);
    self.pending.push((labels.clone(), time, value));
    Ok(())
  }

  fn commit(&mut self) -> Result<(), StorageError> {
    self.pending_last_times.clear();
    let pending = std::mem::take(&mut self.pending);
    let count = pending.len();

    for (labels, time, value) in pending {
      let series = self.storage.get_or_create_series(&labels);
      let append_result = series.write().time_series.append(time, value);
      append_result.map_err(|error| for_series(error, &labels))?;
    }

    debug!("Committed {} samples", count);
    Ok(())
  }

  fn rollback(&mut self) {
    debug!("Rolling back {} samples", self.pending.len());
    self.pending.clear();
    self.pending_last_times.clear();
  }
}
