// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

const DEFAULT_CONFIG_FILE_NAME: &str = "default.toml";

const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 10;
const DEFAULT_QUERY_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_LOOKBACK_DELTA_SECONDS: u64 = 300;
const DEFAULT_MAX_SERIES_CONCURRENCY: usize = 4;
const DEFAULT_PARALLEL_SERIES_THRESHOLD: usize = 64;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
/// Settings for the range query engine.
pub struct EngineSettings {
  max_concurrent_queries: usize,
  query_timeout_seconds: u64,
  lookback_delta_seconds: u64,
  max_series_concurrency: usize,
  parallel_series_threshold: usize,
}

impl EngineSettings {
  /// Get the maximum number of queries that may execute at the same time.
  pub fn get_max_concurrent_queries(&self) -> usize {
    self.max_concurrent_queries
  }

  pub fn set_max_concurrent_queries(&mut self, max_concurrent_queries: usize) {
    self.max_concurrent_queries = max_concurrent_queries;
  }

  /// Get the per-query timeout, in seconds.
  pub fn get_query_timeout_seconds(&self) -> u64 {
    self.query_timeout_seconds
  }

  pub fn set_query_timeout_seconds(&mut self, query_timeout_seconds: u64) {
    self.query_timeout_seconds = query_timeout_seconds;
  }

  /// Get how far back a plain vector selector looks for a sample, in seconds.
  pub fn get_lookback_delta_seconds(&self) -> u64 {
    self.lookback_delta_seconds
  }

  pub fn set_lookback_delta_seconds(&mut self, lookback_delta_seconds: u64) {
    self.lookback_delta_seconds = lookback_delta_seconds;
  }

  /// Get the number of worker threads used to evaluate the series of one step.
  pub fn get_max_series_concurrency(&self) -> usize {
    self.max_series_concurrency
  }

  pub fn set_max_series_concurrency(&mut self, max_series_concurrency: usize) {
    self.max_series_concurrency = max_series_concurrency;
  }

  /// Get the series count from which a step is split across worker threads.
  pub fn get_parallel_series_threshold(&self) -> usize {
    self.parallel_series_threshold
  }

  pub fn set_parallel_series_threshold(&mut self, parallel_series_threshold: usize) {
    self.parallel_series_threshold = parallel_series_threshold;
  }
}

impl Default for EngineSettings {
  fn default() -> Self {
    EngineSettings {
      max_concurrent_queries: DEFAULT_MAX_CONCURRENT_QUERIES,
      query_timeout_seconds: DEFAULT_QUERY_TIMEOUT_SECONDS,
      lookback_delta_seconds: DEFAULT_LOOKBACK_DELTA_SECONDS,
      max_series_concurrency: DEFAULT_MAX_SERIES_CONCURRENCY,
      parallel_series_threshold: DEFAULT_PARALLEL_SERIES_THRESHOLD,
    }
  }
}

#[derive(Debug, Default, Deserialize)]
/// Settings for stepdb, read from config file.
pub struct Settings {
  #[serde(default)]
  engine: EngineSettings,
}

impl Settings {
  /// Create Settings from given configuration directory path.
  pub fn new(config_dir_path: &str) -> Result<Self, ConfigError> {
    let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
    let config_default_file_name = format!("{}/{}", config_dir_path, DEFAULT_CONFIG_FILE_NAME);
    let config_environment_file_name = format!("{}/{}.toml", config_dir_path, run_mode);

    let config = Config::builder()
      // Start off by merging in the "default" configuration file
      .add_source(File::with_name(&config_default_file_name))
      // Add in the current environment file
      // Default to 'development' env
      // Note that this file is _optional_
      .add_source(File::with_name(&config_environment_file_name).required(false))
      // Add in settings from the environment (with a prefix of STEPDB)
      .add_source(Environment::with_prefix("stepdb"))
      .build()?;

    config.try_deserialize()
  }

  pub fn get_default_config_file_name() -> &'static str {
    DEFAULT_CONFIG_FILE_NAME
  }

  /// Get engine settings.
  pub fn get_engine_settings(&self) -> &EngineSettings {
    &self.engine
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use std::fs::File;
  use std::io::Write;
  use std::path::Path;

  use tempdir::TempDir;

  #[test]
  fn test_default_engine_settings() {
    let engine_settings = EngineSettings::default();
    assert_eq!(engine_settings.get_max_concurrent_queries(), 10);
    assert_eq!(engine_settings.get_query_timeout_seconds(), 10);
    assert_eq!(engine_settings.get_lookback_delta_seconds(), 300);
    assert_eq!(engine_settings.get_max_series_concurrency(), 4);
    assert_eq!(engine_settings.get_parallel_series_threshold(), 64);
  }

  #[test]
  fn test_settings() {
    let config_dir = TempDir::new("config_test").unwrap();
    let config_dir_path = config_dir.path().to_str().unwrap();

    // Reading from an empty directory should be an error.
    assert!(Settings::new(config_dir_path).is_err());

    let config_file_path = Path::new(config_dir_path).join(DEFAULT_CONFIG_FILE_NAME);
    {
      let mut file = File::create(&config_file_path).unwrap();
      file.write_all(b"[engine]\n").unwrap();
      file.write_all(b"max_concurrent_queries = 2\n").unwrap();
      file.write_all(b"query_timeout_seconds = 30\n").unwrap();
      file.write_all(b"lookback_delta_seconds = 60\n").unwrap();
      file.write_all(b"max_series_concurrency = 8\n").unwrap();
      file.write_all(b"parallel_series_threshold = 16\n").unwrap();
    }

    let settings = Settings::new(config_dir_path).unwrap();
    let engine_settings = settings.get_engine_settings();
    assert_eq!(engine_settings.get_max_concurrent_queries(), 2);
    assert_eq!(engine_settings.get_query_timeout_seconds(), 30);
    assert_eq!(engine_settings.get_lookback_delta_seconds(), 60);
    assert_eq!(engine_settings.get_max_series_concurrency(), 8);
    assert_eq!(engine_settings.get_parallel_series_threshold(), 16);
  }

  #[test]
  fn test_partial_settings_use_defaults() {
    let config_dir = TempDir::new("config_partial_test").unwrap();
    let config_dir_path = config_dir.path().to_str().unwrap();

    let config_file_path = Path::new(config_dir_path).join(DEFAULT_CONFIG_FILE_NAME);
    {
      let mut file = File::create(&config_file_path).unwrap();
      file.write_all(b"[engine]\n").unwrap();
      file.write_all(b"query_timeout_seconds = 3\n").unwrap();
    }

    let settings = Settings::new(config_dir_path).unwrap();
    let engine_settings = settings.get_engine_settings();
    assert_eq!(engine_settings.get_query_timeout_seconds(), 3);
    assert_eq!(engine_settings.get_max_concurrent_queries(), 10);
    assert_eq!(engine_settings.get_lookback_delta_seconds(), 300);
  }
}
