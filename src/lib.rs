//! barscope: range queries over precomputed OHLCV rollups.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`]. [`service::QueryService`] is the
//! boundary a transport layer drives.

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod logging;
pub mod ports;
pub mod service;
