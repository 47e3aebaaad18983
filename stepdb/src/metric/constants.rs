// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

/// Number of entries per time series block.
pub(crate) static BLOCK_SIZE_FOR_TIME_SERIES: usize = 128;

/// Separator between the label name and label value to create a label term. For example,
/// if the label name is 'method' and the value is 'GET', and the LABEL_SEPARATOR is '~',
/// the postings for this label are stored under 'method~GET'.
pub const LABEL_SEPARATOR: &str = "~";

/// The reserved label name holding the metric name.
pub const METRIC_NAME_LABEL: &str = "__name__";
