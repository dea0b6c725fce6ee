use stattrack_core::{CoreError, MetricType};
use thiserror::Error;

/// Errors raised by the persistence backends.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Layout error: {0}")]
    Layout(String),
}

pub type Result<T> = std::result::Result<T, PersistError>;

impl PersistError {
    pub fn layout<S: Into<String>>(msg: S) -> Self {
        Self::Layout(msg.into())
    }

    /// Reports this failure as a sink error for `metric`.
    pub fn into_core(self, metric: MetricType) -> CoreError {
        CoreError::sink(metric, self.to_string())
    }
}
