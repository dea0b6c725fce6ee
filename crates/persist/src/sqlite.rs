use crate::error::{PersistError, Result};
use crate::layout::{Field, Layout};
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use stattrack_core::{Measurement, MetricType, Sink};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Database file shared by every metric of a run.
pub const DATABASE_FILE: &str = "data.db";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Inserts one row per measurement into the metric's table in
/// `<run dir>/data.db`. Each sink owns its own connection.
pub struct SqliteSink {
    layout: &'static Layout,
    path: PathBuf,
    insert_sql: String,
    conn: Option<Connection>,
}

impl SqliteSink {
    /// Opens (or creates) the database and the metric's table.
    pub fn open(dir: &Path, metric: MetricType) -> Result<Self> {
        let layout = Layout::for_metric(metric);
        let path = dir.join(DATABASE_FILE);

        let conn = Connection::open(&path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(&layout.create_table_sql())?;
        debug!(metric = %metric, path = %path.display(), table = layout.table, "sqlite table ready");

        Ok(Self {
            layout,
            path,
            insert_sql: layout.insert_sql(),
            conn: Some(conn),
        })
    }

    fn insert(&mut self, measurement: &Measurement) -> Result<()> {
        let fields = self.layout.fields(measurement)?;
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| PersistError::layout("database already closed"))?;

        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&self.insert_sql)?;
            stmt.execute(params_from_iter(fields.iter()))?;
        }
        tx.commit()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, e)| {
            warn!(path = %self.path.display(), error = %e, "database did not close cleanly");
            PersistError::Sqlite(e)
        })
    }
}

impl Sink for SqliteSink {
    fn metric(&self) -> MetricType {
        self.layout.metric
    }

    fn location(&self) -> String {
        format!("{}#{}", self.path.display(), self.layout.table)
    }

    fn write(&mut self, measurement: &Measurement) -> stattrack_core::Result<()> {
        self.insert(measurement).map_err(|e| e.into_core(self.layout.metric))
    }

    fn close(&mut self) -> stattrack_core::Result<()> {
        self.finish().map_err(|e| e.into_core(self.layout.metric))
    }
}

impl ToSql for Field {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self {
            Field::Int(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            Field::UInt(v) => {
                let v = i64::try_from(*v)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                ToSqlOutput::Owned(Value::Integer(v))
            }
            Field::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Field::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Field::Null => ToSqlOutput::Owned(Value::Null),
        };
        Ok(output)
    }
}
