//! Configuration access port trait.

use crate::domain::error::BarscopeError;
use std::path::PathBuf;

/// Read access to `[section] key` settings.
///
/// Typed getters return `Ok(None)` for an absent key and `ConfigInvalid`
/// for a present value that does not parse.
pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str) -> Result<Option<i64>, BarscopeError>;

    /// Directory relative paths in the configuration are resolved against.
    fn base_dir(&self) -> Option<PathBuf> {
        None
    }
}
