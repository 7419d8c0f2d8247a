pub mod profile;

use std::collections::HashMap;

use serde::Deserialize;

use crate::pmu::record::{EngineKind, MixGroupKey};

pub use self::profile::{MetricEntry, MetricFormula, MetricProfile, MetricSpec, ProfilePreset};

/// Nanoseconds to microseconds.
const NS_TO_US: f64 = 0.001;

/// Bytes moved per counted bandwidth event.
const BANDWIDTH_BYTES_PER_EVENT: f64 = 64.0;

/// Hardware topology of the profiled chip.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct Topology {
    /// AI core clock frequency in MHz.
    #[serde(default)]
    pub frequency_mhz: f64,
    /// Number of scalar/matrix engine cores.
    #[serde(default)]
    pub aic_core_num: u32,
    /// Number of vector engine cores.
    #[serde(default)]
    pub aiv_core_num: u32,
}

impl Topology {
    pub fn core_num(&self, engine: EngineKind) -> u32 {
        match engine {
            EngineKind::Aic => self.aic_core_num,
            EngineKind::Aiv => self.aiv_core_num,
        }
    }
}

/// Launch shape of one task, taken from the execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskShape {
    pub block_dim: u32,
    pub mix_block_dim: u32,
}

impl TaskShape {
    /// Parallelism used for one engine's time: the non-primary engine of a
    /// mixed operator runs with `mix_block_dim`.
    pub fn block_dim_for(&self, primary: bool, mixed: bool) -> u32 {
        if mixed && !primary {
            self.mix_block_dim
        } else {
            self.block_dim
        }
    }
}

/// Row of a task shape file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TaskShapeEntry {
    pub stream_id: u32,
    pub task_id: u32,
    #[serde(default)]
    pub subtask_id: u32,
    pub block_dim: u32,
    #[serde(default)]
    pub mix_block_dim: u32,
}

/// Opaque `(stream, task, subtask) -> shape` lookup.
#[derive(Debug, Clone, Default)]
pub struct TaskShapeTable {
    shapes: HashMap<MixGroupKey, TaskShape>,
}

impl TaskShapeTable {
    pub fn from_entries(entries: impl IntoIterator<Item = TaskShapeEntry>) -> Self {
        let shapes = entries
            .into_iter()
            .map(|e| {
                let key = MixGroupKey {
                    stream_id: e.stream_id,
                    task_id: e.task_id,
                    subtask_id: e.subtask_id,
                };
                let shape = TaskShape {
                    block_dim: e.block_dim,
                    mix_block_dim: e.mix_block_dim,
                };
                (key, shape)
            })
            .collect();
        Self { shapes }
    }

    /// Unknown keys yield a zero shape, which makes every derived time 0.
    pub fn get(&self, key: &MixGroupKey) -> TaskShape {
        self.shapes.get(key).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

/// Engine execution time in microseconds, rounded to two decimals.
///
/// `total_cycle` is summed over all `block_dim` blocks, which run in
/// `ceil(block_dim / core_num)` waves. Any zero parameter yields 0.
pub fn total_time(total_cycle: u64, frequency_mhz: f64, block_dim: u32, core_num: u32) -> f64 {
    if !frequency_mhz.is_finite() || frequency_mhz <= 0.0 || block_dim == 0 || core_num == 0 {
        return 0.0;
    }
    let waves = block_dim.div_ceil(core_num);
    let time = total_cycle as f64 * 1000.0 * NS_TO_US / frequency_mhz / f64::from(block_dim)
        * f64::from(waves);
    round_to(time, 2)
}

/// Input handed to a [`MetricDeriver`] for one engine of one sample.
#[derive(Debug, Clone, Copy)]
pub struct EngineInput<'a> {
    pub total_cycle: u64,
    pub counters: &'a [u64],
    pub total_time_us: f64,
}

/// Turns raw counters into named metric values.
pub trait MetricDeriver: Send + Sync {
    /// Appends exactly one value per entry of `metrics` to `out`, in order.
    /// Metrics that cannot be computed from `input` yield 0.
    fn derive(&self, input: &EngineInput<'_>, metrics: &[MetricSpec], out: &mut Vec<f64>);
}

/// Default deriver: one counter slot per metric, formula chosen by name.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterFormulaDeriver;

impl MetricDeriver for CounterFormulaDeriver {
    fn derive(&self, input: &EngineInput<'_>, metrics: &[MetricSpec], out: &mut Vec<f64>) {
        out.reserve(metrics.len());
        for spec in metrics {
            let Some(raw) = input.counters.get(spec.counter).copied() else {
                out.push(0.0);
                continue;
            };
            let value = match spec.formula {
                MetricFormula::Ratio => ratio(raw, input.total_cycle),
                MetricFormula::Time => round_to(
                    ratio_unrounded(raw, input.total_cycle) * input.total_time_us,
                    3,
                ),
                MetricFormula::Bandwidth => bandwidth_gbps(raw, input.total_time_us),
                MetricFormula::Raw => raw as f64,
            };
            out.push(value);
        }
    }
}

fn ratio_unrounded(numerator: u64, total_cycle: u64) -> f64 {
    if total_cycle == 0 {
        return 0.0;
    }
    numerator as f64 / total_cycle as f64
}

fn ratio(numerator: u64, total_cycle: u64) -> f64 {
    round_to(ratio_unrounded(numerator, total_cycle), 3)
}

fn bandwidth_gbps(events: u64, total_time_us: f64) -> f64 {
    if total_time_us <= 0.0 {
        return 0.0;
    }
    // bytes per microsecond is MB/s.
    round_to(
        events as f64 * BANDWIDTH_BYTES_PER_EVENT / total_time_us / 1000.0,
        3,
    )
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
