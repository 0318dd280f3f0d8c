//! INI file configuration adapter.

use crate::domain::error::BarscopeError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::{Path, PathBuf};

pub struct FileConfigAdapter {
    config: Ini,
    base_dir: Option<PathBuf>,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, BarscopeError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config.load(path).map_err(|reason| BarscopeError::ConfigParse {
            file: path.display().to_string(),
            reason,
        })?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .or_else(|| Some(PathBuf::from(".")));
        Ok(Self { config, base_dir })
    }

    pub fn from_string(content: &str) -> Result<Self, BarscopeError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| BarscopeError::ConfigParse {
                file: "<string>".to_string(),
                reason,
            })?;
        Ok(Self {
            config,
            base_dir: None,
        })
    }

    fn non_empty(&self, section: &str, key: &str) -> Option<String> {
        self.config
            .get(section, key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.non_empty(section, key)
    }

    fn get_int(&self, section: &str, key: &str) -> Result<Option<i64>, BarscopeError> {
        self.non_empty(section, key)
            .map(|v| {
                v.parse::<i64>().map_err(|_| BarscopeError::ConfigInvalid {
                    section: section.to_string(),
                    key: key.to_string(),
                    reason: format!("expected an integer, got {v:?}"),
                })
            })
            .transpose()
    }

    fn base_dir(&self) -> Option<PathBuf> {
        self.base_dir.clone()
    }
}
