// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! The step driver of a range query.
//!
//! A [`StepEvaluator`] goes through three states. In `Init` the selector is resolved once and a
//! cursor with its [`WindowBuffer`] is opened per matching series. In `Stepping` every step of
//! the range advances each window and evaluates it, appending a point to the series output when
//! the evaluation yields a value. In `Done` the outputs are assembled into a [`Matrix`].
//!
//! Each series exclusively owns its cursor, window and output. Above the parallel threshold the
//! series are split into one chunk per worker, and each worker steps its chunk through the whole
//! grid inside a single thread scope. Duplicate output label sets are detected once all points
//! are computed, at the earliest step where they occur.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use super::cancel::CancellationToken;
use super::functions::WindowBounds;
use super::matcher::select_series;
use super::matrix::{Matrix, MatrixBuilder};
use super::plan::{Evaluation, QueryPlan};
use super::window::WindowBuffer;
use crate::metric::labels::Labels;
use crate::metric::sample::Sample;
use crate::storage::cursor::SliceCursor;
use crate::storage::{Querier, SampleCursor, SeriesId};
use crate::utils::config::EngineSettings;
use crate::utils::error::{QueryError, StorageError};
use crate::utils::sync::{scoped_thread, AtomicCell};

/// Number of series evaluated between two cancellation checks when evaluating sequentially.
const SERIES_CHUNK_SIZE: usize = 256;

const DUPLICATE_LABELSET_REASON: &str = "vector cannot contain metrics with the same labelset";

/// The evaluation timestamps `start, start + interval, ...` up to and including `end`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StepRange {
  start: i64,
  end: i64,
  interval: i64,
}

impl StepRange {
  pub fn new(start: i64, end: i64, interval: i64) -> Result<Self, QueryError> {
    if interval <= 0 {
      return Err(QueryError::InvalidQuery(
        "zero or negative query resolution step widths are not accepted".to_owned(),
      ));
    }
    if end < start {
      return Err(QueryError::InvalidQuery(
        "end timestamp must not be before start time".to_owned(),
      ));
    }
    Ok(StepRange {
      start,
      end,
      interval,
    })
  }

  pub fn get_start(&self) -> i64 {
    self.start
  }

  pub fn get_end(&self) -> i64 {
    self.end
  }

  pub fn get_interval(&self) -> i64 {
    self.interval
  }

  /// Number of steps in the range. The widest range, `i64::MIN..=i64::MAX` at interval 1, has 2^64.
  pub fn get_num_steps(&self) -> u128 {
    let span = (self.end as i128 - self.start as i128) as u128;
    span / self.interval as u128 + 1
  }

  pub fn iter(&self) -> impl Iterator<Item = i64> {
    let StepRange {
      start,
      end,
      interval,
    } = *self;
    std::iter::successors(Some(start), move |step| {
      step.checked_add(interval).filter(|next| *next <= end)
    })
  }
}

/// The point in time by which a query has to complete.
#[derive(Clone, Copy, Debug)]
pub struct QueryDeadline {
  /// None when the timeout is too large to be represented as an instant, i.e. never expires.
  deadline: Option<Instant>,
  timeout_seconds: u64,
}

impl QueryDeadline {
  pub fn new(timeout_seconds: u64) -> Self {
    QueryDeadline {
      deadline: Instant::now().checked_add(Duration::from_secs(timeout_seconds)),
      timeout_seconds,
    }
  }

  pub fn get_remaining(&self) -> Duration {
    match self.deadline {
      Some(deadline) => deadline.saturating_duration_since(Instant::now()),
      None => Duration::MAX,
    }
  }

  /// Fail with QueryTimeout if the deadline has passed.
  pub fn check(&self) -> Result<(), QueryError> {
    match self.deadline {
      Some(deadline) if Instant::now() >= deadline => {
        Err(QueryError::QueryTimeout(self.timeout_seconds))
      }
      _ => Ok(()),
    }
  }
}

fn check_canceled(cancel: &CancellationToken) -> Result<(), QueryError> {
  if cancel.is_canceled() {
    return Err(QueryError::Canceled);
  }
  Ok(())
}

fn get_panic_reason(payload: &(dyn Any + Send)) -> String {
  if let Some(reason) = payload.downcast_ref::<&str>() {
    (*reason).to_owned()
  } else if let Some(reason) = payload.downcast_ref::<String>() {
    reason.clone()
  } else {
    "evaluation panicked".to_owned()
  }
}

#[derive(Clone, Copy, Debug)]
struct WindowParams {
  evaluation: Evaluation,
  range: i64,
  offset: i64,
}

struct SeriesState {
  labels: Labels,
  output_labels: Labels,
  buffer: WindowBuffer,
  points: Vec<Sample>,
}

impl SeriesState {
  fn evaluate_at(&mut self, step: i64, params: &WindowParams) -> Result<(), QueryError> {
    debug_assert!(self.points.last().map_or(true, |point| point.get_time() < step));

    let window_end = step.saturating_sub(params.offset);
    let bounds = WindowBounds::ending_at(window_end, params.range);
    let buffer = &mut self.buffer;
    // Reading the cursor runs storage code, so it is guarded together with the function.
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
      buffer.advance_to(window_end);
      params.evaluation.evaluate(buffer.window(), &bounds)
    }));

    match result {
      Ok(Some(value)) => {
        self.points.push(Sample::new(step, value));
        Ok(())
      }
      Ok(None) => Ok(()),
      Err(payload) => Err(QueryError::EvaluationError {
        step,
        series: self.labels.to_string(),
        reason: get_panic_reason(payload.as_ref()),
      }),
    }
  }
}

/// Step the given series through every step of the range.
///
/// Stops early once another worker failed at an earlier step, since that failure takes
/// precedence over anything this chunk could still produce.
fn evaluate_chunk(
  chunk: &mut [SeriesState],
  steps: StepRange,
  params: &WindowParams,
  cancel: &CancellationToken,
  deadline: &QueryDeadline,
  failed_step: &AtomicCell<i64>,
) -> Result<(), QueryError> {
  for step in steps.iter() {
    if step > failed_step.load() {
      return Ok(());
    }
    deadline.check()?;
    for series_chunk in chunk.chunks_mut(SERIES_CHUNK_SIZE) {
      check_canceled(cancel)?;
      for series in series_chunk {
        if let Err(error) = series.evaluate_at(step, params) {
          record_failed_step(failed_step, step);
          return Err(error);
        }
      }
    }
  }
  Ok(())
}

fn record_failed_step(failed_step: &AtomicCell<i64>, step: i64) {
  let mut current = failed_step.load();
  while step < current {
    match failed_step.compare_exchange(current, step) {
      Ok(_) => break,
      Err(actual) => current = actual,
    }
  }
}

/// Earliest step at which at least two of the given series have a point.
fn get_first_shared_step(series: &[SeriesState], group: &[usize]) -> Option<i64> {
  let mut times: Vec<i64> = group
    .iter()
    .flat_map(|index| series[*index].points.iter().map(|point| point.get_time()))
    .collect();
  times.sort_unstable();
  // Times of a single series are strictly increasing, so an equal pair comes from two series.
  times
    .windows(2)
    .find(|pair| pair[0] == pair[1])
    .map(|pair| pair[0])
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
  Init,
  Stepping,
  Done,
}

/// Evaluates one planned range query against a querier.
pub struct StepEvaluator<'a> {
  querier: &'a dyn Querier,
  plan: &'a QueryPlan,
  steps: StepRange,
  cancel: &'a CancellationToken,
  deadline: QueryDeadline,
  max_series_concurrency: usize,
  parallel_series_threshold: usize,
  state: State,
  series: Vec<SeriesState>,

  /// Indexes of series sharing an output label set.
  collisions: Vec<Vec<usize>>,
}

impl<'a> StepEvaluator<'a> {
  pub fn new(
    querier: &'a dyn Querier,
    plan: &'a QueryPlan,
    steps: StepRange,
    cancel: &'a CancellationToken,
    deadline: QueryDeadline,
    settings: &EngineSettings,
  ) -> Self {
    StepEvaluator {
      querier,
      plan,
      steps,
      cancel,
      deadline,
      max_series_concurrency: settings.get_max_series_concurrency().max(1),
      parallel_series_threshold: settings.get_parallel_series_threshold(),
      state: State::Init,
      series: Vec::new(),
      collisions: Vec::new(),
    }
  }

  /// Run the query to completion.
  pub fn run(mut self) -> Result<Matrix, QueryError> {
    self.init()?;
    if let Err(error) = self.evaluate_steps() {
      info!("Stopping range query: {}", error);
      return Err(error);
    }
    Ok(self.finish())
  }

  fn init(&mut self) -> Result<(), QueryError> {
    debug_assert_eq!(self.state, State::Init);
    check_canceled(self.cancel)?;

    let selected = select_series(self.querier, self.plan.get_matchers());
    let range = self.plan.get_range();
    let offset = self.plan.get_offset();
    let evaluation = self.plan.get_evaluation();

    // Windows are open on the left, so the first sample of interest is just after the first window start.
    let from_time = self
      .steps
      .get_start()
      .saturating_sub(offset)
      .saturating_sub(range)
      .saturating_add(1);
    let to_time = self.steps.get_end().saturating_sub(offset);

    let mut series = Vec::with_capacity(selected.len());
    for (series_id, labels) in selected {
      let cursor = self.open_cursor(series_id, &labels, from_time, to_time)?;
      series.push(SeriesState {
        output_labels: evaluation.get_output_labels(&labels),
        labels,
        buffer: WindowBuffer::new(cursor, range),
        points: Vec::new(),
      });
    }
    self.series = series;

    let mut groups: HashMap<&Labels, Vec<usize>> = HashMap::new();
    for (index, state) in self.series.iter().enumerate() {
      groups.entry(&state.output_labels).or_default().push(index);
    }
    let mut collisions: Vec<Vec<usize>> = groups.into_values().filter(|g| g.len() > 1).collect();
    collisions.sort();
    self.collisions = collisions;

    debug!(
      "Evaluating {} series over {} steps",
      self.series.len(),
      self.steps.get_num_steps()
    );
    Ok(())
  }

  fn open_cursor(
    &self,
    series_id: SeriesId,
    labels: &Labels,
    from_time: i64,
    to_time: i64,
  ) -> Result<Box<dyn SampleCursor>, QueryError> {
    match self.querier.cursor(series_id, from_time, to_time) {
      Ok(cursor) => Ok(cursor),
      Err(StorageError::SeriesNotFound(_)) => {
        warn!(
          "Series {} with labels {} no longer exists, treating it as empty",
          series_id, labels
        );
        Ok(Box::new(SliceCursor::empty()))
      }
      Err(error) => Err(error.into()),
    }
  }

  fn get_num_workers(&self) -> usize {
    if self.series.len() < self.parallel_series_threshold {
      1
    } else {
      self.max_series_concurrency.min(self.series.len()).max(1)
    }
  }

  fn evaluate_steps(&mut self) -> Result<(), QueryError> {
    debug_assert_eq!(self.state, State::Init);
    self.state = State::Stepping;

    let params = WindowParams {
      evaluation: self.plan.get_evaluation(),
      range: self.plan.get_range(),
      offset: self.plan.get_offset(),
    };
    let steps = self.steps;
    let cancel = self.cancel;
    let deadline = &self.deadline;
    let failed_step = AtomicCell::new(i64::MAX);
    let workers = self.get_num_workers();

    let results = if workers == 1 {
      vec![evaluate_chunk(
        &mut self.series,
        steps,
        &params,
        cancel,
        deadline,
        &failed_step,
      )]
    } else {
      let chunk_size = self.series.len().div_ceil(workers);
      let failed_step = &failed_step;
      let params = &params;
      scoped_thread::scope(|scope| {
        let handles: Vec<_> = self
          .series
          .chunks_mut(chunk_size)
          .map(|chunk| {
            scope.spawn(move |_| {
              evaluate_chunk(chunk, steps, params, cancel, deadline, failed_step)
            })
          })
          .collect();

        handles
          .into_iter()
          .map(|handle| {
            handle.join().unwrap_or_else(|payload| {
              Err(QueryError::EvaluationError {
                step: steps.get_start(),
                series: String::new(),
                reason: get_panic_reason(payload.as_ref()),
              })
            })
          })
          .collect::<Vec<Result<(), QueryError>>>()
      })
      .map_err(|payload| QueryError::EvaluationError {
        step: steps.get_start(),
        series: String::new(),
        reason: get_panic_reason(payload.as_ref()),
      })?
    };

    // Chunks are in series order, so the first error at the earliest step is the one a
    // sequential pass would have hit first.
    let mut evaluation_error: Option<(i64, QueryError)> = None;
    let mut interrupt: Option<QueryError> = None;
    for error in results.into_iter().filter_map(Result::err) {
      match error {
        QueryError::EvaluationError { step, .. } => {
          if evaluation_error
            .as_ref()
            .map_or(true, |(first_step, _)| step < *first_step)
          {
            evaluation_error = Some((step, error));
          }
        }
        _ => {
          interrupt.get_or_insert(error);
        }
      }
    }

    // Within a step, series are evaluated before label sets are compared.
    if let Some(collision) = self.find_collision() {
      let collides_first = match (&evaluation_error, &collision) {
        (Some((error_step, _)), QueryError::EvaluationError { step, .. }) => step < error_step,
        _ => true,
      };
      if collides_first {
        return Err(collision);
      }
    }
    match (evaluation_error, interrupt) {
      (Some((_, error)), _) => Err(error),
      (None, Some(error)) => Err(error),
      (None, None) => Ok(()),
    }
  }

  /// The duplicate label set error at the earliest step where two series share an output label set.
  fn find_collision(&self) -> Option<QueryError> {
    let (step, group) = self
      .collisions
      .iter()
      .filter_map(|group| get_first_shared_step(&self.series, group).map(|step| (step, group)))
      .min_by_key(|(step, _)| *step)?;
    Some(QueryError::EvaluationError {
      step,
      series: self.series[group[0]].output_labels.to_string(),
      reason: DUPLICATE_LABELSET_REASON.to_owned(),
    })
  }

  fn finish(mut self) -> Matrix {
    self.state = State::Done;

    let num_series = self.series.len();
    let mut builder = MatrixBuilder::new();
    for state in self.series.drain(..) {
      builder.add(state.output_labels, state.points);
    }
    let matrix = builder.build();

    debug!(
      "Range query over {} series returned {} series",
      num_series,
      matrix.len()
    );
    matrix
  }
}
