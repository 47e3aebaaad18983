// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use log::debug;
use regex::Regex;

use super::ast::{LabelMatcher, MatchType};
use crate::metric::labels::Labels;
use crate::storage::{Querier, SeriesId};
use crate::utils::error::QueryError;

#[derive(Debug)]
enum Condition {
  Equal(String),
  NotEqual(String),
  RegexMatch(Regex),
  RegexNoMatch(Regex),
}

/// A label matcher ready to be applied to label sets. Regexes are anchored to the full value.
#[derive(Debug)]
pub struct CompiledMatcher {
  label_name: String,
  condition: Condition,
}

impl CompiledMatcher {
  pub fn new(matcher: &LabelMatcher) -> Result<Self, QueryError> {
    let value = matcher.get_value();
    let condition = match matcher.get_match_type() {
      MatchType::Equal => Condition::Equal(value.to_owned()),
      MatchType::NotEqual => Condition::NotEqual(value.to_owned()),
      MatchType::RegexMatch => Condition::RegexMatch(compile_anchored(matcher)?),
      MatchType::RegexNoMatch => Condition::RegexNoMatch(compile_anchored(matcher)?),
    };

    Ok(CompiledMatcher {
      label_name: matcher.get_label_name().to_owned(),
      condition,
    })
  }

  pub fn get_label_name(&self) -> &str {
    &self.label_name
  }

  /// Check whether the given label value satisfies this matcher.
  pub fn matches(&self, value: &str) -> bool {
    match &self.condition {
      Condition::Equal(expected) => value == expected,
      Condition::NotEqual(expected) => value != expected,
      Condition::RegexMatch(regex) => regex.is_match(value),
      Condition::RegexNoMatch(regex) => !regex.is_match(value),
    }
  }

  /// Check whether the given label set satisfies this matcher. An absent label matches as "".
  pub fn matches_labels(&self, labels: &Labels) -> bool {
    self.matches(labels.get(&self.label_name).unwrap_or(""))
  }

  /// The label value usable as a postings lookup, if any.
  fn get_postings_value(&self) -> Option<&str> {
    match &self.condition {
      Condition::Equal(value) if !value.is_empty() => Some(value),
      _ => None,
    }
  }
}

fn compile_anchored(matcher: &LabelMatcher) -> Result<Regex, QueryError> {
  Regex::new(&format!("^(?:{})$", matcher.get_value()))
    .map_err(|error| QueryError::InvalidMatcher(format!("{}: {}", matcher, error)))
}

/// Compile the matchers of one selector.
///
/// Fails with InvalidMatcher if a regex does not compile, and with InvalidQuery if every
/// matcher matches the empty string, since such a selector would select the whole store.
pub fn compile_matchers(matchers: &[LabelMatcher]) -> Result<Vec<CompiledMatcher>, QueryError> {
  let compiled = matchers
    .iter()
    .map(CompiledMatcher::new)
    .collect::<Result<Vec<CompiledMatcher>, QueryError>>()?;

  if compiled.iter().all(|matcher| matcher.matches("")) {
    let matchers: Vec<String> = matchers.iter().map(|m| m.to_string()).collect();
    return Err(QueryError::InvalidQuery(format!(
      "vector selector {{{}}} must contain at least one non-empty matcher",
      matchers.join(", ")
    )));
  }

  Ok(compiled)
}

/// Get the series satisfying every matcher, ordered by series id.
pub fn select_series(querier: &dyn Querier, matchers: &[CompiledMatcher]) -> Vec<(SeriesId, Labels)> {
  let postings = matchers
    .iter()
    .find_map(|matcher| matcher.get_postings_value().map(|value| (matcher, value)));

  let candidates: Vec<(SeriesId, Labels)> = match postings {
    Some((matcher, value)) => querier
      .get_postings(matcher.get_label_name(), value)
      .into_iter()
      .filter_map(|series_id| {
        querier
          .get_labels(series_id)
          .map(|labels| (series_id, labels))
      })
      .collect(),
    None => querier.get_label_sets(),
  };
  let num_candidates = candidates.len();

  let mut selected: Vec<(SeriesId, Labels)> = candidates
    .into_iter()
    .filter(|(_, labels)| matchers.iter().all(|matcher| matcher.matches_labels(labels)))
    .collect();
  selected.sort_by_key(|(series_id, _)| *series_id);

  debug!(
    "Selected {} of {} candidate series",
    selected.len(),
    num_candidates
  );
  selected
}
