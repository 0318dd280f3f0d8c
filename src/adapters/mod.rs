//! Concrete adapter implementations for ports.

pub mod csv_export_adapter;
pub mod csv_store_adapter;
pub mod file_config_adapter;
pub mod json_manifest_adapter;
#[cfg(feature = "sqlite")]
pub mod sqlite_catalog_adapter;
