use crate::error::{PersistError, Result};
use crate::layout::{Field, Layout};
use stattrack_core::{Measurement, MetricType, Sink};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Appends one row per measurement to `<run dir>/<metric file>.csv`.
pub struct CsvSink {
    layout: &'static Layout,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    rows: u64,
}

impl CsvSink {
    /// Creates the file and writes the header row.
    pub fn create(dir: &Path, metric: MetricType) -> Result<Self> {
        let layout = Layout::for_metric(metric);
        let path = dir.join(layout.file_name);
        let mut writer = BufWriter::new(File::create(&path)?);

        let header: Vec<&str> = layout.column_names().collect();
        writeln!(writer, "{}", header.join(","))?;
        debug!(metric = %metric, path = %path.display(), "csv file created");

        Ok(Self {
            layout,
            path,
            writer: Some(writer),
            rows: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, measurement: &Measurement) -> Result<()> {
        let fields = self.layout.fields(measurement)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| PersistError::layout("csv file already closed"))?;

        let line: Vec<String> = fields.iter().map(render).collect();
        writeln!(writer, "{}", line.join(","))?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        debug!(path = %self.path.display(), rows = self.rows, "csv file closed");
        Ok(())
    }
}

impl Sink for CsvSink {
    fn metric(&self) -> MetricType {
        self.layout.metric
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn write(&mut self, measurement: &Measurement) -> stattrack_core::Result<()> {
        self.append(measurement).map_err(|e| e.into_core(self.layout.metric))
    }

    fn close(&mut self) -> stattrack_core::Result<()> {
        self.finish().map_err(|e| e.into_core(self.layout.metric))
    }
}

fn render(field: &Field) -> String {
    match field {
        Field::Int(v) => v.to_string(),
        Field::UInt(v) => v.to_string(),
        Field::Real(v) => format!("{:.4}", v),
        Field::Text(s) => quote(s),
        Field::Null => String::new(),
    }
}

fn quote(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
