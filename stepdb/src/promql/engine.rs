// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use std::time::Duration;

use log::{debug, info};

use super::ast::Expr;
use super::cancel::CancellationToken;
use super::evaluator::{QueryDeadline, StepEvaluator, StepRange};
use super::matrix::Matrix;
use super::plan::QueryPlan;
use crate::storage::Querier;
use crate::utils::config::EngineSettings;
use crate::utils::error::QueryError;
use crate::utils::sync::{Arc, Condvar, Mutex};
use crate::utils::time::MILLIS_PER_SECOND;

/// How often a query waiting for a slot checks for cancellation.
const GATE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Limits the number of queries executing at the same time.
struct QueryGate {
  max_running: usize,
  running: Mutex<usize>,
  available: Condvar,
}

/// A slot in the query gate, released when dropped.
struct QueryPermit<'a> {
  gate: &'a QueryGate,
}

impl QueryGate {
  fn new(max_running: usize) -> Self {
    QueryGate {
      max_running: max_running.max(1),
      running: Mutex::new(0),
      available: Condvar::new(),
    }
  }

  /// Wait for a free slot. Fails if the query is canceled or times out while waiting.
  fn acquire(
    &self,
    cancel: &CancellationToken,
    deadline: &QueryDeadline,
  ) -> Result<QueryPermit<'_>, QueryError> {
    let mut running = self.running.lock();
    while *running >= self.max_running {
      if cancel.is_canceled() {
        return Err(QueryError::Canceled);
      }
      deadline.check()?;
      let wait = GATE_POLL_INTERVAL.min(deadline.get_remaining());
      self.available.wait_for(&mut running, wait);
    }
    *running += 1;
    Ok(QueryPermit { gate: self })
  }

  fn get_running(&self) -> usize {
    *self.running.lock()
  }
}

impl Drop for QueryPermit<'_> {
  fn drop(&mut self) {
    *self.gate.running.lock() -= 1;
    self.gate.available.notify_one();
  }
}

/// Evaluates range queries against a store.
pub struct Engine {
  querier: Arc<dyn Querier>,
  settings: EngineSettings,
  gate: QueryGate,
}

impl Engine {
  /// Create an engine reading from the given querier.
  pub fn new(querier: Arc<dyn Querier>, settings: EngineSettings) -> Self {
    info!("Creating range query engine with settings {:?}", settings);
    let gate = QueryGate::new(settings.get_max_concurrent_queries());
    Engine {
      querier,
      settings,
      gate,
    }
  }

  pub fn get_settings(&self) -> &EngineSettings {
    &self.settings
  }

  /// Get the number of queries currently executing.
  pub fn get_running_queries(&self) -> usize {
    self.gate.get_running()
  }

  /// Evaluate `expr` at every step from `start` to `end` (inclusive), `interval` apart.
  /// All times are in milliseconds.
  pub fn execute_range_query(
    &self,
    expr: &Expr,
    start: i64,
    end: i64,
    interval: i64,
  ) -> Result<Matrix, QueryError> {
    self.execute_range_query_with_cancel(expr, start, end, interval, &CancellationToken::new())
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
    debug!(
      "Range query {} from {} to {} every {}ms",
      expr, start, end, interval
    );

    let steps = StepRange::new(start, end, interval)?;
    let lookback_delta = self.settings.get_lookback_delta_seconds() as i64 * MILLIS_PER_SECOND;
    let plan = QueryPlan::new(expr, lookback_delta)?;

    let deadline = QueryDeadline::new(self.settings.get_query_timeout_seconds());
    let _permit = self.gate.acquire(cancel, &deadline)?;

    let evaluator = StepEvaluator::new(
      self.querier.as_ref(),
      &plan,
      steps,
      cancel,
      deadline,
      &self.settings,
    );
    let result = evaluator.run();

    match &result {
      Ok(matrix) => debug!("Range query {} returned {} series", expr, matrix.len()),
      Err(error) => info!("Range query {} failed: {}", expr, error),
    }
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use std::thread;

  use crate::metric::labels::Labels;
  use crate::promql::ast::{LabelMatcher, MatchType, VectorSelector};
  use crate::storage::memory::MemStorage;
  use crate::storage::Appender;
  use crate::utils::sync::is_sync_send;

  fn create_engine(settings: EngineSettings) -> Engine {
    let storage = Arc::new(MemStorage::new());
    let mut appender = storage.appender();
    let labels = Labels::from_pairs([("__name__", "a_one"), ("l", "x")]);
    for i in 0..100 {
      appender.add(&labels, i * 10_000, i as f64).unwrap();
    }
    appender.commit().unwrap();
    Engine::new(storage, settings)
  }

  fn rate() -> Expr {
    Expr::call("rate", vec![Expr::matrix(VectorSelector::new("a_one"), 60_000)])
  }

  #[test]
  fn test_engine_is_sync_send() {
    is_sync_send::<Engine>();
  }

  #[test]
  fn test_execute_range_query() {
    let engine = create_engine(EngineSettings::default());
    let matrix = engine
      .execute_range_query(&rate(), 60_000, 300_000, 30_000)
      .unwrap();
    assert_eq!(matrix.len(), 1);
    assert_eq!(matrix.get_series()[0].get_points().len(), 9);
    assert_eq!(engine.get_running_queries(), 0);
  }

  #[test]
  fn test_invalid_queries() {
    let engine = create_engine(EngineSettings::default());

    for (start, end, interval) in [(0, 60_000, 0), (0, 60_000, -1), (60_000, 0, 1000)] {
      assert!(matches!(
        engine.execute_range_query(&rate(), start, end, interval),
        Err(QueryError::InvalidQuery(_))
      ));
    }

    let matrix = Expr::matrix(VectorSelector::new("a_one"), 60_000);
    assert!(matches!(
      engine.execute_range_query(&matrix, 0, 60_000, 1000),
      Err(QueryError::InvalidQuery(_))
    ));

    let all = VectorSelector::new_with_matchers(vec![LabelMatcher::new(
      MatchType::RegexMatch,
      "l",
      ".*",
    )]);
    assert!(matches!(
      engine.execute_range_query(&Expr::vector(all), 0, 60_000, 1000),
      Err(QueryError::InvalidQuery(_))
    ));
  }

  #[test]
  fn test_canceled_while_waiting_for_slot() {
    let mut settings = EngineSettings::default();
    settings.set_max_concurrent_queries(1);
    let engine = create_engine(settings);

    let deadline = QueryDeadline::new(10);
    let holder = engine.gate.acquire(&CancellationToken::new(), &deadline).unwrap();
    assert_eq!(engine.get_running_queries(), 1);

    let cancel = CancellationToken::new();
    thread::scope(|scope| {
      let waiter = scope.spawn(|| engine.execute_range_query_with_cancel(&rate(), 0, 60_000, 1000, &cancel));
      thread::sleep(Duration::from_millis(50));
      cancel.cancel();
      assert_eq!(waiter.join().unwrap(), Err(QueryError::Canceled));
    });

    drop(holder);
    assert_eq!(engine.get_running_queries(), 0);
    assert!(engine.execute_range_query(&rate(), 0, 60_000, 1000).is_ok());
  }

  #[test]
  fn test_timeout_while_waiting_for_slot() {
    let mut settings = EngineSettings::default();
    settings.set_max_concurrent_queries(1);
    settings.set_query_timeout_seconds(0);
    let engine = create_engine(settings);

    let _holder = engine
      .gate
      .acquire(&CancellationToken::new(), &QueryDeadline::new(10))
      .unwrap();
    assert_eq!(
      engine.execute_range_query(&rate(), 0, 60_000, 1000),
      Err(QueryError::QueryTimeout(0))
    );
  }

  #[test]
  fn test_concurrent_queries() {
    let mut settings = EngineSettings::default();
    settings.set_max_concurrent_queries(2);
    let engine = Arc::new(create_engine(settings));

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let engine = engine.clone();
        thread::spawn(move || engine.execute_range_query(&rate(), 60_000, 900_000, 10_000))
      })
      .collect();
    let results: Vec<Matrix> = handles
      .into_iter()
      .map(|handle| handle.join().unwrap().unwrap())
      .collect();

    for matrix in &results {
      assert!(matrix.is_identical(&results[0]));
    }
    assert_eq!(engine.get_running_queries(), 0);
  }

  #[test]
  fn test_unbounded_timeout() {
    let mut settings = EngineSettings::default();
    settings.set_max_concurrent_queries(1);
    settings.set_query_timeout_seconds(u64::MAX);
    let engine = create_engine(settings);

    assert!(engine.execute_range_query(&rate(), 60_000, 300_000, 30_000).is_ok());

    // Waiting for a slot is not cut short either.
    let holder = engine
      .gate
      .acquire(&CancellationToken::new(), &QueryDeadline::new(u64::MAX))
      .unwrap();
    thread::scope(|scope| {
      let waiter = scope.spawn(|| engine.execute_range_query(&rate(), 60_000, 300_000, 30_000));
      thread::sleep(Duration::from_millis(50));
      drop(holder);
      let matrix = waiter.join().unwrap().unwrap();
      assert_eq!(matrix.get_series()[0].get_points().len(), 9);
    });
  }

  #[test]
  fn test_extreme_timestamps() {
    let engine = create_engine(EngineSettings::default());

    let matrix = engine
      .execute_range_query(&rate(), i64::MIN + 1000, i64::MIN + 1000, 1000)
      .unwrap();
    assert!(matrix.is_empty());

    let offset = Expr::vector(VectorSelector::new("a_one").with_offset(i64::MAX));
    let matrix = engine.execute_range_query(&offset, -60_000, 0, 10_000).unwrap();
    assert!(matrix.is_empty());

    let matrix = engine
      .execute_range_query(&rate(), i64::MAX - 1000, i64::MAX, 1)
      .unwrap();
    assert!(matrix.is_empty());
  }

  #[test]
  fn test_nan_samples_pass_through() {
    let storage = Arc::new(MemStorage::new());
    let mut appender = storage.appender();
    let labels = Labels::from_pairs([("__name__", "b_nan"), ("l", "x")]);
    appender.add(&labels, 0, 1.0).unwrap();
    appender.add(&labels, 10_000, f64::NAN).unwrap();
    appender.add(&labels, 20_000, 2.0).unwrap();
    appender.commit().unwrap();
    let engine = Engine::new(storage, EngineSettings::default());

    let selector = Expr::vector(VectorSelector::new("b_nan"));
    let matrix = engine.execute_range_query(&selector, 10_000, 20_000, 10_000).unwrap();
    let points = matrix.get_series()[0].get_points();
    assert_eq!(points.len(), 2);
    assert!(points[0].get_value().is_nan());
    assert_eq!(points[1].get_value(), 2.0);

    for (function, expect_nan) in [("last_over_time", true), ("count_over_time", false)] {
      let expr = Expr::call(
        function,
        vec![Expr::matrix(VectorSelector::new("b_nan"), 15_000)],
      );
      let matrix = engine.execute_range_query(&expr, 10_000, 10_000, 1000).unwrap();
      let point = matrix.get_series()[0].get_points()[0];
      assert_eq!(point.get_time(), 10_000);
      assert_eq!(point.get_value().is_nan(), expect_nan, "{}", function);
    }
  }
}
