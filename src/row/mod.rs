pub mod schema;

use std::fmt;

use serde::ser::{Serialize, Serializer};

use crate::correlate::{EngineData, HostTaskMap, MergedSample};
use crate::metrics::{total_time, EngineInput, MetricDeriver, MetricProfile, TaskShapeTable, Topology};
use crate::pmu::record::EngineKind;

pub use self::schema::{Column, ColumnType, RowSchema, KEY_COLUMNS};

/// Classification of a row by which engines took part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    AiCore,
    AiVectorCore,
    MixAic,
    MixAiv,
}

impl TaskType {
    pub fn classify(primary: EngineKind, mixed: bool) -> Self {
        match (primary, mixed) {
            (EngineKind::Aic, false) => Self::AiCore,
            (EngineKind::Aiv, false) => Self::AiVectorCore,
            (EngineKind::Aic, true) => Self::MixAic,
            (EngineKind::Aiv, true) => Self::MixAiv,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AiCore => "AI_CORE",
            Self::AiVectorCore => "AI_VECTOR_CORE",
            Self::MixAic => "MIX_AIC",
            Self::MixAiv => "MIX_AIV",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column value of an [`OutputRow`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell {
    F64(f64),
    U64(u64),
    U32(u32),
    U8(u8),
    Str(&'static str),
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            Self::F64(v) => serializer.serialize_f64(v),
            Self::U64(v) => serializer.serialize_u64(v),
            Self::U32(v) => serializer.serialize_u32(v),
            Self::U8(v) => serializer.serialize_u8(v),
            Self::Str(v) => serializer.serialize_str(v),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F64(v) => write!(f, "{v}"),
            Self::U64(v) => write!(f, "{v}"),
            Self::U32(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
        }
    }
}

/// Final per-sample record.
///
/// `metrics` holds the AIC values followed by the AIV values, positionally
/// matching the metric columns of the [`RowSchema`] it was built with.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub aic_total_time: f64,
    pub aic_total_cycle: u64,
    pub aiv_total_time: f64,
    pub aiv_total_cycle: u64,
    pub metrics: Vec<f64>,
    pub aic_metric_count: usize,
    pub task_id: u32,
    pub stream_id: u32,
    pub subtask_id: u32,
    pub subtask_type: u8,
    pub start_time: u64,
    pub end_time: u64,
    pub ffts_type: u8,
    pub task_type: TaskType,
    pub batch_id: u32,
}

impl OutputRow {
    /// Empty when `aic_metric_count` exceeds `metrics`.
    pub fn aic_metrics(&self) -> &[f64] {
        self.metrics.get(..self.aic_metric_count).unwrap_or(&[])
    }

    pub fn aiv_metrics(&self) -> &[f64] {
        self.metrics.get(self.aic_metric_count..).unwrap_or(&[])
    }

    /// Values in schema column order.
    pub fn cells(&self) -> Vec<Cell> {
        let mut cells = Vec::with_capacity(4 + self.metrics.len() + KEY_COLUMNS.len());
        cells.push(Cell::F64(self.aic_total_time));
        cells.push(Cell::U64(self.aic_total_cycle));
        cells.extend(self.aic_metrics().iter().map(|v| Cell::F64(*v)));
        cells.push(Cell::F64(self.aiv_total_time));
        cells.push(Cell::U64(self.aiv_total_cycle));
        cells.extend(self.aiv_metrics().iter().map(|v| Cell::F64(*v)));
        cells.extend([
            Cell::U32(self.task_id),
            Cell::U32(self.stream_id),
            Cell::U32(self.subtask_id),
            Cell::U8(self.subtask_type),
            Cell::U64(self.start_time),
            Cell::U64(self.end_time),
            Cell::U8(self.ffts_type),
            Cell::Str(self.task_type.as_str()),
            Cell::U32(self.batch_id),
        ]);
        cells
    }
}

/// Read-only parameters shared by every stage of a device run.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub topology: &'a Topology,
    pub profile: &'a MetricProfile,
    pub shapes: &'a TaskShapeTable,
    pub host_map: &'a HostTaskMap,
    pub deriver: &'a dyn MetricDeriver,
}

/// Derives metrics for merged samples and assembles output rows.
pub struct RowBuilder<'a> {
    ctx: RunContext<'a>,
    schema: &'a RowSchema,
}

impl<'a> RowBuilder<'a> {
    pub fn new(ctx: RunContext<'a>, schema: &'a RowSchema) -> Self {
        Self { ctx, schema }
    }

    pub fn context(&self) -> RunContext<'a> {
        self.ctx
    }

    pub fn build(&self, sample: &MergedSample) -> OutputRow {
        let aic_count = self.schema.metric_count(EngineKind::Aic);
        let mut metrics =
            Vec::with_capacity(aic_count + self.schema.metric_count(EngineKind::Aiv));

        let aic_total_time = self.derive_engine(sample, EngineKind::Aic, &mut metrics);
        let aiv_total_time = self.derive_engine(sample, EngineKind::Aiv, &mut metrics);

        OutputRow {
            aic_total_time,
            aic_total_cycle: sample.aic.total_cycle,
            aiv_total_time,
            aiv_total_cycle: sample.aiv.total_cycle,
            metrics,
            aic_metric_count: aic_count,
            task_id: sample.task_id,
            stream_id: sample.stream_id,
            subtask_id: sample.subtask_id,
            subtask_type: sample.subtask_type,
            start_time: sample.start_time,
            end_time: sample.end_time,
            ffts_type: sample.ffts_type,
            task_type: TaskType::classify(sample.primary, sample.mixed),
            batch_id: self.ctx.host_map.batch_id(sample.task_id),
        }
    }

    /// Appends the engine's metric values and returns its total time.
    fn derive_engine(&self, sample: &MergedSample, engine: EngineKind, out: &mut Vec<f64>) -> f64 {
        let data: &EngineData = sample.engine(engine);
        let shape = self.ctx.shapes.get(&sample.key());
        let block_dim = shape.block_dim_for(sample.primary == engine, sample.mixed);
        let time = total_time(
            data.total_cycle,
            self.ctx.topology.frequency_mhz,
            block_dim,
            self.ctx.topology.core_num(engine),
        );

        let input = EngineInput {
            total_cycle: data.total_cycle,
            counters: data.counters.as_slice(),
            total_time_us: time,
        };
        self.ctx
            .deriver
            .derive(&input, self.ctx.profile.metrics(engine), out);

        time
    }
}
