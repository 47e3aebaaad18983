// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use chrono::Duration;

use crate::utils::error::QueryError;

/// Sample timestamps are milliseconds since epoch.
pub const MILLIS_PER_SECOND: i64 = 1000;

/// Convert a millisecond duration to (fractional) seconds.
pub fn millis_to_seconds(millis: i64) -> f64 {
  millis as f64 / MILLIS_PER_SECOND as f64
}

/// Parse a Prometheus duration string (e.g. "500ms", "15s", "2h") into milliseconds.
pub fn parse_duration(duration_str: &str) -> Result<i64, QueryError> {
  let invalid = || QueryError::InvalidQuery(format!("Invalid duration: {:?}", duration_str));

  let (number, unit) = match duration_str.strip_suffix("ms") {
    Some(number) => (number, "ms"),
    None => {
      let split_at = duration_str
        .char_indices()
        .last()
        .map(|(index, _)| index)
        .ok_or_else(invalid)?;
      duration_str.split_at(split_at)
    }
  };

  if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
    return Err(invalid());
  }
  let value = number.parse::<i64>().map_err(|_| invalid())?;

  let duration = match unit {
    "ms" => Duration::try_milliseconds(value),
    "s" => Duration::try_seconds(value),
    "m" => Duration::try_minutes(value),
    "h" => Duration::try_hours(value),
    "d" => Duration::try_days(value),
    "w" => Duration::try_weeks(value),
    "y" => value.checked_mul(365).and_then(Duration::try_days),
    _ => None,
  };

  duration
    .map(|duration| duration.num_milliseconds())
    .ok_or_else(invalid)
}

/// Render a millisecond duration using the largest unit that divides it evenly.
pub fn format_duration(millis: i64) -> String {
  const UNITS: [(&str, i64); 6] = [
    ("w", 7 * 24 * 60 * 60 * MILLIS_PER_SECOND),
    ("d", 24 * 60 * 60 * MILLIS_PER_SECOND),
    ("h", 60 * 60 * MILLIS_PER_SECOND),
    ("m", 60 * MILLIS_PER_SECOND),
    ("s", MILLIS_PER_SECOND),
    ("ms", 1),
  ];

  if millis == 0 {
    return "0s".to_owned();
  }
  for (unit, size) in UNITS {
    if millis % size == 0 {
      return format!("{}{}", millis / size, unit);
    }
  }
  format!("{}ms", millis)
}

#[cfg(test)]
mod tests {
  use super::*;

  use test_case::test_case;

  #[test_case("500ms", 500; "milliseconds")]
  #[test_case("10s", 10_000; "seconds")]
  #[test_case("1m", 60_000; "minutes")]
  #[test_case("2h", 7_200_000; "hours")]
  #[test_case("1d", 86_400_000; "days")]
  #[test_case("1w", 604_800_000; "weeks")]
  #[test_case("1y", 31_536_000_000; "years")]
  fn test_parse_duration(input: &str, expected: i64) {
    assert_eq!(parse_duration(input).unwrap(), expected);
  }

  #[test_case(""; "empty")]
  #[test_case("m"; "missing number")]
  #[test_case("-1m"; "negative")]
  #[test_case("1x"; "unknown unit")]
  #[test_case("1.5m"; "fraction")]
  fn test_parse_duration_invalid(input: &str) {
    assert!(matches!(
      parse_duration(input),
      Err(QueryError::InvalidQuery(_))
    ));
  }

  #[test]
  fn test_format_duration() {
    assert_eq!(format_duration(0), "0s");
    assert_eq!(format_duration(60_000), "1m");
    assert_eq!(format_duration(90_000), "90s");
    assert_eq!(format_duration(1_500), "1500ms");
    assert_eq!(format_duration(7 * 86_400_000), "1w");
  }
}
