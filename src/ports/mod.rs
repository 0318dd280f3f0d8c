//! Port traits: the seams between domain logic and concrete adapters.

pub mod config_port;
pub mod export_port;
pub mod manifest_port;
pub mod storage_port;
