// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use std::str::FromStr;

use super::ast::{Expr, VectorSelector};
use super::functions::{Function, WindowBounds};
use super::matcher::{compile_matchers, CompiledMatcher};
use crate::metric::labels::Labels;
use crate::metric::sample::Sample;
use crate::utils::error::QueryError;

/// What is computed from the window of each series at every step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Evaluation {
  /// A function over a range vector.
  Function(Function),

  /// The newest sample within the lookback window of a plain vector selector.
  LastSample,
}

impl Evaluation {
  pub fn evaluate(&self, window: Option<&[Sample]>, bounds: &WindowBounds) -> Option<f64> {
    match self {
      Evaluation::Function(function) => function.evaluate(window, bounds),
      Evaluation::LastSample => window
        .and_then(|samples| samples.last())
        .map(|sample| sample.get_value()),
    }
  }

  /// Get the label set of the output series for an input series.
  pub fn get_output_labels(&self, labels: &Labels) -> Labels {
    match self {
      Evaluation::Function(_) => labels.without_metric_name(),
      Evaluation::LastSample => labels.clone(),
    }
  }
}

/// A validated range query expression.
#[derive(Debug)]
pub struct QueryPlan {
  matchers: Vec<CompiledMatcher>,
  range: i64,
  offset: i64,
  evaluation: Evaluation,
}

impl QueryPlan {
  /// Plan the given expression. A plain vector selector looks back `lookback_delta` milliseconds.
  pub fn new(expr: &Expr, lookback_delta: i64) -> Result<Self, QueryError> {
    match expr {
      Expr::Paren(inner) => Self::new(inner, lookback_delta),
      Expr::VectorSelector(selector) => {
        Self::for_selector(selector, lookback_delta, Evaluation::LastSample)
      }
      Expr::MatrixSelector(_) => Err(QueryError::InvalidQuery(
        "invalid expression type \"range vector\" for range query, must be instant vector"
          .to_owned(),
      )),
      Expr::Call(call) => {
        let function = Function::from_str(call.get_function_name())?;
        let args = call.get_args();
        if args.len() != 1 {
          return Err(QueryError::InvalidQuery(format!(
            "expected 1 argument in call to {:?}, got {}",
            function.name(),
            args.len()
          )));
        }

        match strip_parens(&args[0]) {
          Expr::MatrixSelector(matrix) => {
            if matrix.get_range() <= 0 {
              return Err(QueryError::InvalidQuery(format!(
                "range in {} must be positive",
                expr
              )));
            }
            Self::for_selector(
              matrix.get_selector(),
              matrix.get_range(),
              Evaluation::Function(function),
            )
          }
          other => Err(QueryError::InvalidQuery(format!(
            "expected range vector in call to {:?}, got {}",
            function.name(),
            other
          ))),
        }
      }
    }
  }

  fn for_selector(
    selector: &VectorSelector,
    range: i64,
    evaluation: Evaluation,
  ) -> Result<Self, QueryError> {
    Ok(QueryPlan {
      matchers: compile_matchers(selector.get_matchers())?,
      range,
      offset: selector.get_offset(),
      evaluation,
    })
  }

  pub fn get_matchers(&self) -> &[CompiledMatcher] {
    &self.matchers
  }

  /// Get the window duration in milliseconds.
  pub fn get_range(&self) -> i64 {
    self.range
  }

  pub fn get_offset(&self) -> i64 {
    self.offset
  }

  pub fn get_evaluation(&self) -> Evaluation {
    self.evaluation
  }
}

fn strip_parens(expr: &Expr) -> &Expr {
  let mut expr = expr;
  while let Expr::Paren(inner) = expr {
    expr = inner;
  }
  expr
}

#[cfg(test)]
mod tests {
  use super::*;

  use crate::promql::ast::MatchType;

  const LOOKBACK_DELTA: i64 = 300_000;

  fn plan(expr: Expr) -> Result<QueryPlan, QueryError> {
    QueryPlan::new(&expr, LOOKBACK_DELTA)
  }

  #[test]
  fn test_plan_function() {
    let selector = VectorSelector::new("a_one").with_offset(60_000);
    let query_plan = plan(Expr::call(
      "increase",
      vec![Expr::paren(Expr::matrix(selector, 120_000))],
    ))
    .unwrap();

    assert_eq!(query_plan.get_evaluation(), Evaluation::Function(Function::Increase));
    assert_eq!(query_plan.get_range(), 120_000);
    assert_eq!(query_plan.get_offset(), 60_000);
    assert_eq!(query_plan.get_matchers().len(), 1);
  }

  #[test]
  fn test_plan_vector_selector() {
    let query_plan = plan(Expr::paren(Expr::vector(VectorSelector::new("a_one")))).unwrap();
    assert_eq!(query_plan.get_evaluation(), Evaluation::LastSample);
    assert_eq!(query_plan.get_range(), LOOKBACK_DELTA);
  }

  #[test]
  fn test_invalid_plans() {
    let matrix = || Expr::matrix(VectorSelector::new("a_one"), 60_000);
    let vector = || Expr::vector(VectorSelector::new("a_one"));

    let invalid = vec![
      matrix(),
      Expr::call("rate", vec![vector()]),
      Expr::call("rate", vec![matrix(), matrix()]),
      Expr::call("rate", vec![]),
      Expr::call("no_such_function", vec![matrix()]),
      Expr::call("rate", vec![Expr::matrix(VectorSelector::new("a_one"), 0)]),
      Expr::vector(VectorSelector::new_with_matchers(Vec::new())),
    ];
    for expr in invalid {
      assert!(
        matches!(plan(expr.clone()), Err(QueryError::InvalidQuery(_))),
        "{} should be invalid",
        expr
      );
    }

    let bad_regex = VectorSelector::new("a_one").with_matcher(MatchType::RegexMatch, "l", "[");
    assert!(matches!(
      plan(Expr::vector(bad_regex)),
      Err(QueryError::InvalidMatcher(_))
    ));
  }

  #[test]
  fn test_output_labels() {
    let labels = Labels::from_pairs([("__name__", "a_one"), ("l", "x")]);
    assert_eq!(
      Evaluation::Function(Function::Rate).get_output_labels(&labels),
      Labels::from_pairs([("l", "x")])
    );
    assert_eq!(Evaluation::LastSample.get_output_labels(&labels), labels);
  }
}
