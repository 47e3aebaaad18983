// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::constants::{LABEL_SEPARATOR, METRIC_NAME_LABEL};

/// A single label name/value pair.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Label {
  name: String,
  value: String,
}

impl Label {
  pub fn get_name(&self) -> &str {
    &self.name
  }

  pub fn get_value(&self) -> &str {
    &self.value
  }
}

/// An immutable label set identifying a series.
///
/// Labels are kept sorted by name with unique names, so the derived ordering
/// compares label sets pairwise by name and then value - the canonical order
/// used for sorting query results. Labels with an empty value are dropped, as
/// an empty value is indistinguishable from an absent label.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(
  from = "BTreeMap<String, String>",
  into = "BTreeMap<String, String>"
)]
pub struct Labels {
  labels: Vec<Label>,
}

impl Labels {
  /// Create a label set from name/value pairs. A later pair wins over an earlier
  /// pair with the same name.
  pub fn from_pairs<N, V, I>(pairs: I) -> Self
  where
    N: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (N, V)>,
  {
    let map: BTreeMap<String, String> = pairs
      .into_iter()
      .map(|(name, value)| (name.into(), value.into()))
      .collect();
    Labels::from(map)
  }

  /// Create a label set for the given metric name and name-value labels.
  pub fn from_metric(metric_name: &str, name_value_labels: &HashMap<String, String>) -> Self {
    let mut map: BTreeMap<String, String> = name_value_labels
      .iter()
      .map(|(name, value)| (name.clone(), value.clone()))
      .collect();
    map.insert(METRIC_NAME_LABEL.to_owned(), metric_name.to_owned());
    Labels::from(map)
  }

  /// Get the value of the given label, if present.
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .labels
      .binary_search_by(|label| label.name.as_str().cmp(name))
      .ok()
      .map(|index| self.labels[index].value.as_str())
  }

  /// Get the metric name.
  pub fn get_metric_name(&self) -> Option<&str> {
    self.get(METRIC_NAME_LABEL)
  }

  /// Get a copy of this label set without the metric name.
  pub fn without_metric_name(&self) -> Labels {
    Labels {
      labels: self
        .labels
        .iter()
        .filter(|label| label.name != METRIC_NAME_LABEL)
        .cloned()
        .collect(),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = &Label> {
    self.labels.iter()
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  /// Get the label terms (e.g. 'method~GET') under which this label set is indexed.
  pub fn get_label_terms(&self) -> Vec<String> {
    self
      .labels
      .iter()
      .map(|label| get_label_term(&label.name, &label.value))
      .collect()
  }
}

/// Get the label term used for given label name and label value.
pub fn get_label_term(label_name: &str, label_value: &str) -> String {
  format!("{label_name}{LABEL_SEPARATOR}{label_value}")
}

impl From<BTreeMap<String, String>> for Labels {
  fn from(map: BTreeMap<String, String>) -> Self {
    Labels {
      labels: map
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| Label { name, value })
        .collect(),
    }
  }
}

impl From<Labels> for BTreeMap<String, String> {
  fn from(labels: Labels) -> Self {
    labels
      .labels
      .into_iter()
      .map(|label| (label.name, label.value))
      .collect()
  }
}

impl fmt::Display for Labels {
  /// Formats as `metric_name{name="value", ...}`.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(metric_name) = self.get_metric_name() {
      write!(f, "{}", metric_name)?;
    }
    write!(f, "{{")?;
    let mut first = true;
    for label in self.labels.iter().filter(|l| l.name != METRIC_NAME_LABEL) {
      if !first {
        write!(f, ", ")?;
      }
      write!(f, "{}={:?}", label.name, label.value)?;
      first = false;
    }
    write!(f, "}}")
  }
}
