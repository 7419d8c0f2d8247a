use std::fmt;

use crate::metrics::MetricProfile;
use crate::pmu::record::EngineKind;

/// Storage type of one output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Float64,
    UInt64,
    UInt32,
    UInt8,
    String,
}

impl ColumnType {
    /// ClickHouse column type.
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::Float64 => "Float64",
            Self::UInt64 => "UInt64",
            Self::UInt32 => "UInt32",
            Self::UInt8 => "UInt8",
            Self::String => "LowCardinality(String)",
        }
    }
}

/// A named, typed output column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

impl Column {
    fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.ty.sql_type())
    }
}

/// Identifying columns that follow both engine blocks, in order.
pub const KEY_COLUMNS: [(&str, ColumnType); 9] = [
    ("task_id", ColumnType::UInt32),
    ("stream_id", ColumnType::UInt32),
    ("subtask_id", ColumnType::UInt32),
    ("subtask_type", ColumnType::UInt8),
    ("start_time", ColumnType::UInt64),
    ("end_time", ColumnType::UInt64),
    ("ffts_type", ColumnType::UInt8),
    ("task_type", ColumnType::String),
    ("batch_id", ColumnType::UInt32),
];

/// Output row layout, computed once per run from the metric profile.
///
/// Columns: `aic_total_time, aic_total_cycle, aic_<metric>...,
/// aiv_total_time, aiv_total_cycle, aiv_<metric>...`, then [`KEY_COLUMNS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSchema {
    columns: Vec<Column>,
    aic_metrics: usize,
    aiv_metrics: usize,
}

impl RowSchema {
    pub fn from_profile(profile: &MetricProfile) -> Self {
        let aic_metrics = profile.aic.len();
        let aiv_metrics = profile.aiv.len();
        let mut columns = Vec::with_capacity(4 + aic_metrics + aiv_metrics + KEY_COLUMNS.len());

        for engine in [EngineKind::Aic, EngineKind::Aiv] {
            let prefix = engine.as_str();
            columns.push(Column::new(
                format!("{prefix}_total_time"),
                ColumnType::Float64,
            ));
            columns.push(Column::new(
                format!("{prefix}_total_cycle"),
                ColumnType::UInt64,
            ));
            for spec in profile.metrics(engine) {
                columns.push(Column::new(
                    format!("{prefix}_{}", spec.name),
                    ColumnType::Float64,
                ));
            }
        }

        for (name, ty) in KEY_COLUMNS {
            columns.push(Column::new(name, ty));
        }

        Self {
            columns,
            aic_metrics,
            aiv_metrics,
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Number of derived metric values per engine.
    pub fn metric_count(&self, engine: EngineKind) -> usize {
        match engine {
            EngineKind::Aic => self.aic_metrics,
            EngineKind::Aiv => self.aiv_metrics,
        }
    }

    /// Comma-separated column names, for INSERT statements.
    pub fn column_list(&self) -> String {
        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        names.join(", ")
    }
}
