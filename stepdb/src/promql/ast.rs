// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! The pre-parsed expression tree accepted by the engine.

use std::fmt;

use crate::metric::constants::METRIC_NAME_LABEL;
use crate::utils::time::format_duration;

/// Represents a condition to be used in a label matcher.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatchType {
  Equal,
  NotEqual,
  RegexMatch,
  RegexNoMatch,
}

impl MatchType {
  fn as_str(&self) -> &'static str {
    match self {
      MatchType::Equal => "=",
      MatchType::NotEqual => "!=",
      MatchType::RegexMatch => "=~",
      MatchType::RegexNoMatch => "!~",
    }
  }
}

/// A label constraint, e.g. `job=~"api.*"`. Regex patterns are compiled when the query is planned.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LabelMatcher {
  label_name: String,
  match_type: MatchType,
  value: String,
}

impl LabelMatcher {
  pub fn new(match_type: MatchType, label_name: &str, value: &str) -> Self {
    LabelMatcher {
      label_name: label_name.to_owned(),
      match_type,
      value: value.to_owned(),
    }
  }

  pub fn get_label_name(&self) -> &str {
    &self.label_name
  }

  pub fn get_match_type(&self) -> MatchType {
    self.match_type
  }

  pub fn get_value(&self) -> &str {
    &self.value
  }
}

impl fmt::Display for LabelMatcher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}{}{:?}",
      self.label_name,
      self.match_type.as_str(),
      self.value
    )
  }
}

/// Selects series by label matchers, e.g. `http_requests_total{method="GET"} offset 5m`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VectorSelector {
  matchers: Vec<LabelMatcher>,

  /// Milliseconds to shift the evaluation time back by.
  offset: i64,
}

impl VectorSelector {
  /// Create a selector for the given metric name.
  pub fn new(metric_name: &str) -> Self {
    VectorSelector {
      matchers: vec![LabelMatcher::new(
        MatchType::Equal,
        METRIC_NAME_LABEL,
        metric_name,
      )],
      offset: 0,
    }
  }

  /// Create a selector from the given matchers only.
  pub fn new_with_matchers(matchers: Vec<LabelMatcher>) -> Self {
    VectorSelector { matchers, offset: 0 }
  }

  /// Add a matcher.
  pub fn with_matcher(mut self, match_type: MatchType, label_name: &str, value: &str) -> Self {
    self
      .matchers
      .push(LabelMatcher::new(match_type, label_name, value));
    self
  }

  /// Set the offset, in milliseconds.
  pub fn with_offset(mut self, offset: i64) -> Self {
    self.offset = offset;
    self
  }

  pub fn get_matchers(&self) -> &[LabelMatcher] {
    &self.matchers
  }

  pub fn get_offset(&self) -> i64 {
    self.offset
  }
}

impl fmt::Display for VectorSelector {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name_position = self.matchers.iter().position(|m| {
      m.label_name == METRIC_NAME_LABEL && m.match_type == MatchType::Equal
    });
    if let Some(position) = name_position {
      write!(f, "{}", self.matchers[position].value)?;
    }

    let others: Vec<String> = self
      .matchers
      .iter()
      .enumerate()
      .filter(|(i, _)| Some(*i) != name_position)
      .map(|(_, m)| m.to_string())
      .collect();
    if !others.is_empty() || name_position.is_none() {
      write!(f, "{{{}}}", others.join(", "))?;
    }
    Ok(())
  }
}

/// A selector over a trailing window, e.g. `http_requests_total[5m]`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MatrixSelector {
  selector: VectorSelector,

  /// Window duration in milliseconds.
  range: i64,
}

impl MatrixSelector {
  pub fn new(selector: VectorSelector, range: i64) -> Self {
    MatrixSelector { selector, range }
  }

  pub fn get_selector(&self) -> &VectorSelector {
    &self.selector
  }

  pub fn get_range(&self) -> i64 {
    self.range
  }
}

/// A function call, e.g. `rate(http_requests_total[5m])`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
  function_name: String,
  args: Vec<Expr>,
}

impl Call {
  pub fn get_function_name(&self) -> &str {
    &self.function_name
  }

  pub fn get_args(&self) -> &[Expr] {
    &self.args
  }
}

/// An expression tree node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Expr {
  VectorSelector(VectorSelector),
  MatrixSelector(MatrixSelector),
  Call(Call),
  Paren(Box<Expr>),
}

impl Expr {
  /// `selector`
  pub fn vector(selector: VectorSelector) -> Self {
    Expr::VectorSelector(selector)
  }

  /// `selector[range]`
  pub fn matrix(selector: VectorSelector, range: i64) -> Self {
    Expr::MatrixSelector(MatrixSelector::new(selector, range))
  }

  /// `function_name(args...)`
  pub fn call(function_name: &str, args: Vec<Expr>) -> Self {
    Expr::Call(Call {
      function_name: function_name.to_owned(),
      args,
    })
  }

  /// `(expr)`
  pub fn paren(expr: Expr) -> Self {
    Expr::Paren(Box::new(expr))
  }
}

impl fmt::Display for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fn write_offset(f: &mut fmt::Formatter<'_>, offset: i64) -> fmt::Result {
      if offset != 0 {
        write!(f, " offset {}", format_duration(offset))?;
      }
      Ok(())
    }

    match self {
      Expr::VectorSelector(selector) => {
        write!(f, "{}", selector)?;
        write_offset(f, selector.offset)
      }
      Expr::MatrixSelector(matrix) => {
        write!(f, "{}[{}]", matrix.selector, format_duration(matrix.range))?;
        write_offset(f, matrix.selector.offset)
      }
      Expr::Call(call) => {
        let args: Vec<String> = call.args.iter().map(|arg| arg.to_string()).collect();
        write!(f, "{}({})", call.function_name, args.join(", "))
      }
      Expr::Paren(expr) => write!(f, "({})", expr),
    }
  }
}
