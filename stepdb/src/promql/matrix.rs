// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::metric::labels::Labels;
use crate::metric::sample::Sample;
use crate::utils::time::millis_to_seconds;

/// One series of a range query result.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MatrixSeries {
  labels: Labels,

  /// Points in strictly increasing time order.
  points: Vec<Sample>,
}

impl MatrixSeries {
  pub fn get_labels(&self) -> &Labels {
    &self.labels
  }

  pub fn get_points(&self) -> &[Sample] {
    &self.points
  }

  fn to_prometheus_json(&self) -> Value {
    let values: Vec<Value> = self
      .points
      .iter()
      .map(|point| {
        json!([
          millis_to_seconds(point.get_time()),
          format_value(point.get_value())
        ])
      })
      .collect();
    json!({ "metric": self.labels, "values": values })
  }
}

/// The result of a range query: series ordered by their label sets.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Matrix {
  series: Vec<MatrixSeries>,
}

impl Matrix {
  pub fn get_series(&self) -> &[MatrixSeries] {
    &self.series
  }

  pub fn len(&self) -> usize {
    self.series.len()
  }

  pub fn is_empty(&self) -> bool {
    self.series.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &MatrixSeries> {
    self.series.iter()
  }

  /// Whether both matrices hold the same series with bit-identical points.
  pub fn is_identical(&self, other: &Matrix) -> bool {
    self.series.len() == other.series.len()
      && self.series.iter().zip(&other.series).all(|(a, b)| {
        a.labels == b.labels
          && a.points.len() == b.points.len()
          && a.points.iter().zip(&b.points).all(|(p, q)| p.is_identical(q))
      })
  }

  /// Render as the `data` object of a Prometheus range query response.
  pub fn to_prometheus_json(&self) -> Value {
    let result: Vec<Value> = self
      .series
      .iter()
      .map(MatrixSeries::to_prometheus_json)
      .collect();
    json!({ "resultType": "matrix", "result": result })
  }
}

// Sample values are rendered as strings, with Go's spelling of non-finite values.
fn format_value(value: f64) -> String {
  if value.is_nan() {
    "NaN".to_owned()
  } else if value == f64::INFINITY {
    "+Inf".to_owned()
  } else if value == f64::NEG_INFINITY {
    "-Inf".to_owned()
  } else {
    value.to_string()
  }
}

/// Accumulates the points of each output series and assembles the final matrix.
#[derive(Debug, Default)]
pub struct MatrixBuilder {
  series: BTreeMap<Labels, Vec<Sample>>,
}

impl MatrixBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add the points of a series. Points of series sharing a label set are merged.
  pub fn add(&mut self, labels: Labels, points: Vec<Sample>) {
    if points.is_empty() {
      return;
    }

    match self.series.get_mut(&labels) {
      Some(existing) => {
        existing.extend(points);
        existing.sort_by_key(|point| point.get_time());
      }
      None => {
        self.series.insert(labels, points);
      }
    }
  }

  /// Build the matrix, ordered by label set. Series without points are omitted.
  pub fn build(self) -> Matrix {
    Matrix {
      series: self
        .series
        .into_iter()
        .map(|(labels, points)| MatrixSeries { labels, points })
        .collect(),
    }
  }
}
