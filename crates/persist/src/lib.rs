//! CSV and SQLite backends for recorded measurements.

pub mod csv;
pub mod error;
pub mod layout;
pub mod sqlite;

pub use crate::csv::CsvSink;
pub use error::{PersistError, Result};
pub use layout::{Field, Layout};
pub use sqlite::SqliteSink;

use stattrack_core::{MetricType, OutputFormat, Sink};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// A fresh `output-<uuid>` path under `base`. Nothing is created.
pub fn run_directory(base: &Path) -> PathBuf {
    base.join(format!("output-{}", Uuid::new_v4()))
}

/// Creates a new run directory (and any missing parents) under `base`.
pub fn create_run_directory(base: &Path) -> Result<PathBuf> {
    let dir = run_directory(base);
    std::fs::create_dir_all(&dir)?;
    info!(path = %dir.display(), "output directory created");
    Ok(dir)
}

/// Opens the sink for `metric` in `run_dir` using the requested backend.
pub fn open_sink(
    format: OutputFormat,
    run_dir: &Path,
    metric: MetricType,
) -> stattrack_core::Result<Box<dyn Sink>> {
    let sink: Box<dyn Sink> = match format {
        OutputFormat::Csv => Box::new(CsvSink::create(run_dir, metric).map_err(|e| e.into_core(metric))?),
        OutputFormat::Sqlite => {
            Box::new(SqliteSink::open(run_dir, metric).map_err(|e| e.into_core(metric))?)
        }
    };
    Ok(sink)
}
