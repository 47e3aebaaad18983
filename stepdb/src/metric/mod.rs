// This code is licensed under Elastic License 2.0
// https://www.elastic.co/licensing/elastic-license

//! Samples, label sets and the per-series sample store.
//!
//! A series is identified by its label set and holds samples in fixed-size blocks,
//! each block holding strictly increasing timestamps. The initial timestamp of every
//! block is kept alongside (a 'skip pointer') so that range lookups go straight to
//! the first overlapping block.

pub mod constants;
pub mod labels;
pub mod sample;
pub mod time_series;
