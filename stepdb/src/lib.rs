// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

pub mod metric;
pub mod promql;
pub mod storage;
pub mod utils;

use std::collections::HashMap;

use log::{debug, info};

use crate::metric::labels::Labels;
use crate::promql::ast::Expr;
use crate::promql::cancel::CancellationToken;
use crate::promql::engine::Engine;
use crate::promql::matrix::Matrix;
use crate::storage::memory::{MemAppender, MemStorage};
use crate::storage::Appender;
use crate::utils::config::Settings;
use crate::utils::error::{QueryError, StepDBError};
use crate::utils::sync::Arc;

/// In-memory time series database with a range query engine.
pub struct StepDB {
  storage: Arc<MemStorage>,
  engine: Engine,
  settings: Settings,
}

impl StepDB {
  /// Create a new StepDB with the settings in the given config directory.
  pub fn new(config_dir_path: &str) -> Result<Self, StepDBError> {
    let settings = Settings::new(config_dir_path)?;

    let engine_settings = settings.get_engine_settings();
    if engine_settings.get_max_concurrent_queries() == 0 {
      return Err(StepDBError::InvalidConfiguration(
        "max_concurrent_queries must be at least 1".to_owned(),
      ));
    }
    if engine_settings.get_max_series_concurrency() == 0 {
      return Err(StepDBError::InvalidConfiguration(
        "max_series_concurrency must be at least 1".to_owned(),
      ));
    }

    info!("Creating StepDB from config directory {}", config_dir_path);
    let storage = Arc::new(MemStorage::new());
    let engine = Engine::new(storage.clone(), engine_settings.clone());

    Ok(StepDB {
      storage,
      engine,
      settings,
    })
  }

  /// Get an appender to add samples in a batch.
  pub fn appender(&self) -> MemAppender<'_> {
    self.storage.appender()
  }

  /// Append a single sample and commit it.
  pub fn append_metric_point(
    &self,
    metric_name: &str,
    labels: &HashMap<String, String>,
    time: i64,
    value: f64,
  ) -> Result<(), StepDBError> {
    debug!(
      "Appending metric point: metric name {}, labels {:?}, time {}, value {}",
      metric_name, labels, time, value
    );
    let mut appender = self.appender();
    appender.add(&Labels::from_metric(metric_name, labels), time, value)?;
    appender.commit()?;
    Ok(())
  }

  /// Evaluate `expr` over [start, end] at every `interval`. Times are in milliseconds.
  pub fn execute_range_query(
    &self,
    expr: &Expr,
    start: i64,
    end: i64,
    interval: i64,
  ) -> Result<Matrix, QueryError> {
    self.engine.execute_range_query(expr, start, end, interval)
  }

  /// Same as execute_range_query, but can be canceled through the given token.
  pub fn execute_range_query_with_cancel(
    &self,
    expr: &Expr,
    start: i64,
    end: i64,
    interval: i64,
    cancel: &CancellationToken,
  ) -> Result<Matrix, QueryError> {
    self
      .engine
      .execute_range_query_with_cancel(expr, start, end, interval, cancel)
  }

  pub fn get_storage(&self) -> &Arc<MemStorage> {
    &self.storage
  }

  pub fn get_engine(&self) -> &Engine {
    &self.engine
  }

  /// Get the settings for this stepdb.
  pub fn get_settings(&self) -> &Settings {
    &self.settings
  }
}
