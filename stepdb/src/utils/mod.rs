//! Utilities for managing stepdb.

pub mod config;
pub mod error;
pub mod sync;
pub mod time;
