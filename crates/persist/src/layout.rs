//! Fixed on-disk shape of each metric type: file name, table name and the
//! ordered column list shared by the CSV and SQLite backends.

use crate::error::{PersistError, Result};
use stattrack_core::{CpuUsage, Measurement, MetricType};
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
        }
    }
}

#[derive(Debug)]
pub struct Layout {
    pub metric: MetricType,
    pub file_name: &'static str,
    pub table: &'static str,
    pub columns: &'static [(&'static str, ColumnType)],
}

static CPU: Layout = Layout {
    metric: MetricType::Cpu,
    file_name: "cpu.csv",
    table: "cpu",
    columns: &[
        ("timestamp", ColumnType::Integer),
        ("user", ColumnType::Integer),
        ("system", ColumnType::Integer),
        ("idle", ColumnType::Integer),
        ("nice", ColumnType::Integer),
        ("total", ColumnType::Integer),
        ("userp", ColumnType::Real),
        ("systemp", ColumnType::Real),
        ("idlep", ColumnType::Real),
    ],
};

static MEMORY: Layout = Layout {
    metric: MetricType::Mem,
    file_name: "memory.csv",
    table: "memory",
    columns: &[
        ("timestamp", ColumnType::Integer),
        ("free", ColumnType::Integer),
        ("total", ColumnType::Integer),
        ("active", ColumnType::Integer),
        ("cached", ColumnType::Integer),
        ("inactive", ColumnType::Integer),
        ("swapFree", ColumnType::Integer),
        ("swapTotal", ColumnType::Integer),
        ("swapUsed", ColumnType::Integer),
        ("used", ColumnType::Integer),
        ("freep", ColumnType::Real),
    ],
};

static NETWORK: Layout = Layout {
    metric: MetricType::Net,
    file_name: "network.csv",
    table: "network",
    columns: &[
        ("timestamp", ColumnType::Integer),
        ("name", ColumnType::Text),
        ("RxBytes", ColumnType::Integer),
        ("TxBytes", ColumnType::Integer),
        ("kind", ColumnType::Text),
    ],
};

impl Layout {
    pub fn for_metric(metric: MetricType) -> &'static Layout {
        match metric {
            MetricType::Cpu => &CPU,
            MetricType::Mem => &MEMORY,
            MetricType::Net => &NETWORK,
        }
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|(name, _)| *name)
    }

    pub fn create_table_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|(name, ty)| format!("    \"{}\" {}", name, ty.sql()))
            .collect();
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n{}\n);",
            self.table,
            columns.join(",\n")
        )
    }

    pub fn insert_sql(&self) -> String {
        let mut names = String::new();
        let mut placeholders = String::new();
        for (i, name) in self.column_names().enumerate() {
            if i > 0 {
                names.push_str(", ");
                placeholders.push_str(", ");
            }
            let _ = write!(names, "\"{}\"", name);
            let _ = write!(placeholders, "?{}", i + 1);
        }
        format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            self.table, names, placeholders
        )
    }

    /// Flattens `measurement` into this layout's column order.
    pub fn fields(&self, measurement: &Measurement) -> Result<Vec<Field>> {
        if measurement.metric() != self.metric {
            return Err(PersistError::layout(format!(
                "{} measurement does not fit the {} layout",
                measurement.metric(),
                self.metric
            )));
        }

        let fields = match measurement {
            Measurement::Cpu(m) => {
                let pct = |f: fn(&CpuUsage) -> f64| m.usage.as_ref().map(f).map_or(Field::Null, Field::Real);
                vec![
                    Field::Int(m.timestamp),
                    Field::UInt(m.user),
                    Field::UInt(m.system),
                    Field::UInt(m.idle),
                    Field::UInt(m.nice),
                    Field::UInt(m.total),
                    pct(|u| u.user_pct),
                    pct(|u| u.system_pct),
                    pct(|u| u.idle_pct),
                ]
            }
            Measurement::Mem(m) => vec![
                Field::Int(m.timestamp),
                Field::UInt(m.free),
                Field::UInt(m.total),
                Field::UInt(m.active),
                Field::UInt(m.cached),
                Field::UInt(m.inactive),
                Field::UInt(m.swap_free),
                Field::UInt(m.swap_total),
                Field::UInt(m.swap_used),
                Field::UInt(m.used),
                Field::Real(m.free_pct),
            ],
            Measurement::Net(m) => vec![
                Field::Int(m.timestamp),
                Field::Text(m.interface.clone()),
                Field::UInt(m.rx_bytes),
                Field::UInt(m.tx_bytes),
                Field::Text(m.kind.as_str().to_string()),
            ],
        };
        debug_assert_eq!(fields.len(), self.columns.len());
        Ok(fields)
    }
}

/// One cell of a persisted row.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Int(i64),
    UInt(u64),
    Real(f64),
    Text(String),
    /// No value, e.g. CPU percentages before a baseline exists.
    Null,
}
