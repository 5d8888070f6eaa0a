use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    DataLoad(#[from] DataLoadError),
    #[error("Could not write schedule output '{location_key}': {error}")]
    Io {
        location_key: String,
        error: anyhow::Error,
    },
    #[error("Schedule column '{column}' has {actual} rows but {expected} were expected")]
    RowCount {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("Request was considered invalid due to error: {0}")]
    InvalidRequest(anyhow::Error),
}

impl ScheduleError {
    pub(crate) fn io(location_key: &str, error: anyhow::Error) -> Self {
        Self::Io {
            location_key: location_key.to_string(),
            error,
        }
    }
}

/// An invalid value in the household/run configuration. Always fatal, and always raised before
/// any simulation work is done.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("Invalid configuration for '{field}': {message}")]
pub struct ConfigurationError {
    pub field: String,
    pub message: String,
}

impl ConfigurationError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// A calibration table that is missing, malformed or inconsistent.
#[derive(Clone, Debug, Error, PartialEq)]
#[error("Could not load calibration table '{table}': {message}")]
pub struct DataLoadError {
    pub table: String,
    pub message: String,
}

impl DataLoadError {
    pub fn new(table: &str, message: impl Into<String>) -> Self {
        Self {
            table: table.to_string(),
            message: message.into(),
        }
    }
}
