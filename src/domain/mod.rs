//! Core domain types and query logic.

pub mod downsample;
pub mod engine_config;
pub mod error;
pub mod executor;
pub mod interval;
pub mod locator;
pub mod manifest;
pub mod metric;
pub mod pivot;
pub mod query;
pub mod record;
