//! Domain error types.

use std::fmt;

/// Stable error classification handed to transport layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ManifestUnavailable,
    NotFound,
    UnknownMetric,
    StorageUnavailable,
    EmptySymbolSet,
    InvalidRequest,
    Cancelled,
    Timeout,
    Config,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ManifestUnavailable => "manifest_unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::UnknownMetric => "unknown_metric",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::EmptySymbolSet => "empty_symbol_set",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type for barscope.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BarscopeError {
    #[error("manifest unavailable ({source_name}): {reason}")]
    ManifestUnavailable { source_name: String, reason: String },

    #[error("no {interval} data for {symbol}")]
    NotFound { symbol: String, interval: String },

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("storage unavailable at {path}: {reason}")]
    StorageUnavailable { path: String, reason: String },

    #[error("no symbols requested")]
    EmptySymbolSet,

    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("invalid timestamp {value:?}: expected YYYY-MM-DD[ HH:MM:SS]")]
    InvalidTimestamp { value: String },

    #[error("query cancelled")]
    Cancelled,

    #[error("timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("export failed: {reason}")]
    Export { reason: String },

    #[error("i/o error: {reason}")]
    Io { reason: String },
}

impl BarscopeError {
    pub fn storage(path: impl fmt::Display, reason: impl fmt::Display) -> Self {
        BarscopeError::StorageUnavailable {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BarscopeError::ManifestUnavailable { .. } => ErrorKind::ManifestUnavailable,
            BarscopeError::NotFound { .. } => ErrorKind::NotFound,
            BarscopeError::UnknownMetric(_) => ErrorKind::UnknownMetric,
            BarscopeError::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
            BarscopeError::EmptySymbolSet => ErrorKind::EmptySymbolSet,
            BarscopeError::InvalidInterval(_) | BarscopeError::InvalidTimestamp { .. } => {
                ErrorKind::InvalidRequest
            }
            BarscopeError::Cancelled => ErrorKind::Cancelled,
            BarscopeError::Timeout { .. } => ErrorKind::Timeout,
            BarscopeError::ConfigParse { .. }
            | BarscopeError::ConfigMissing { .. }
            | BarscopeError::ConfigInvalid { .. } => ErrorKind::Config,
            BarscopeError::Export { .. } | BarscopeError::Io { .. } => ErrorKind::Io,
        }
    }

    /// True for errors caused by the request itself rather than by storage or infrastructure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UnknownMetric | ErrorKind::EmptySymbolSet | ErrorKind::InvalidRequest
        )
    }
}

impl From<std::io::Error> for BarscopeError {
    fn from(err: std::io::Error) -> Self {
        BarscopeError::Io {
            reason: err.to_string(),
        }
    }
}

impl From<&BarscopeError> for std::process::ExitCode {
    fn from(err: &BarscopeError) -> Self {
        let code: u8 = match err.kind() {
            ErrorKind::Io => 1,
            ErrorKind::Config
            | ErrorKind::UnknownMetric
            | ErrorKind::EmptySymbolSet
            | ErrorKind::InvalidRequest => 2,
            ErrorKind::ManifestUnavailable | ErrorKind::StorageUnavailable => 3,
            ErrorKind::NotFound => 5,
            ErrorKind::Cancelled | ErrorKind::Timeout => 6,
        };
        std::process::ExitCode::from(code)
    }
}
