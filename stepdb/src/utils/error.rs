// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use thiserror::Error;

use crate::storage::SeriesId;

#[derive(Debug, Error, Eq, PartialEq)]
/// Enum for various errors in stepdb.
pub enum StepDBError {
  #[error("Invalid configuration. {0}")]
  InvalidConfiguration(String),

  #[error("Storage error: {0}")]
  StorageError(StorageError),

  #[error("Query error: {0}")]
  QueryError(QueryError),
}

#[derive(Debug, Error, Eq, PartialEq)]
/// Errors raised by the storage boundary (appenders and queriers).
pub enum StorageError {
  #[error("Series not found: {0}")]
  SeriesNotFound(SeriesId),

  #[error("Label set is empty.")]
  EmptyLabelSet,

  #[error("Out of order sample. Time {0} is before the last time {1} of series {2}.")]
  OutOfOrderSample(i64, i64, String),

  #[error("Duplicate sample for time {0} in series {1}.")]
  DuplicateSample(i64, String),
}

#[derive(Debug, Error, Eq, PartialEq)]
/// Errors surfaced by a range query.
pub enum QueryError {
  #[error("Invalid matcher: {0}")]
  InvalidMatcher(String),

  #[error("Invalid query: {0}")]
  InvalidQuery(String),

  #[error("Series not found: {0}")]
  SeriesNotFound(SeriesId),

  #[error("Evaluation error at step {step} for series {series}: {reason}")]
  EvaluationError {
    step: i64,
    series: String,
    reason: String,
  },

  #[error("Query canceled")]
  Canceled,

  #[error("Query timed out after {0} seconds")]
  QueryTimeout(u64),

  #[error("Storage error: {0}")]
  StorageError(String),
}

impl QueryError {
  /// Whether the query was stopped by the caller or its deadline rather than failing.
  pub fn is_interrupted(&self) -> bool {
    matches!(self, QueryError::Canceled | QueryError::QueryTimeout(_))
  }
}

impl From<StorageError> for QueryError {
  fn from(error: StorageError) -> Self {
    match error {
      StorageError::SeriesNotFound(series_id) => QueryError::SeriesNotFound(series_id),
      other => QueryError::StorageError(other.to_string()),
    }
  }
}

impl From<StorageError> for StepDBError {
  fn from(error: StorageError) -> Self {
    StepDBError::StorageError(error)
  }
}

impl From<QueryError> for StepDBError {
  fn from(error: QueryError) -> Self {
    StepDBError::QueryError(error)
  }
}

impl From<config::ConfigError> for StepDBError {
  fn from(error: config::ConfigError) -> Self {
    StepDBError::InvalidConfiguration(error.to_string())
  }
}
