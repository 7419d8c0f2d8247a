pub mod block;
pub mod pairing;
pub mod resolve;

use crate::pmu::record::{ContextSample, CounterSet, EngineKind, MixGroupKey};

pub use self::block::{aggregate_blocks, merge_legacy, BlockAggregation, SyntheticSample};
pub use self::pairing::PairingCorrelator;
pub use self::resolve::{HostTask, HostTaskMap, ResolveSummary, StreamResolver};

/// Cycle and counter data attributed to one engine of a merged sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineData {
    pub total_cycle: u64,
    pub counters: CounterSet,
}

impl EngineData {
    /// Zero placeholder for an engine that did not take part.
    pub fn absent(width: usize) -> Self {
        Self {
            total_cycle: 0,
            counters: CounterSet::zeroed(width),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.total_cycle == 0 && self.counters.as_slice().iter().all(|v| *v == 0)
    }
}

impl From<&ContextSample> for EngineData {
    fn from(c: &ContextSample) -> Self {
        Self {
            total_cycle: c.total_cycle,
            counters: c.counters,
        }
    }
}

/// One logical sample per master context, carrying both engines' data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergedSample {
    pub stream_id: u32,
    pub task_id: u32,
    pub subtask_id: u32,
    pub subtask_type: u8,
    pub ffts_type: u8,
    pub start_time: u64,
    pub end_time: u64,
    /// Engine of the master sample.
    pub primary: EngineKind,
    /// Partner-engine data was found and merged.
    pub mixed: bool,
    pub aic: EngineData,
    pub aiv: EngineData,
}

impl MergedSample {
    /// Builds a merged sample from a master and optional partner-engine data.
    ///
    /// The master's data always lands on its own engine; `partner` lands on
    /// the other one, or a zero placeholder does.
    pub fn from_master(master: &ContextSample, partner: Option<EngineData>, width: usize) -> Self {
        let own = EngineData::from(master);
        let other = partner.unwrap_or_else(|| EngineData::absent(width));
        let (aic, aiv) = match master.engine {
            EngineKind::Aic => (own, other),
            EngineKind::Aiv => (other, own),
        };

        Self {
            stream_id: master.stream_id,
            task_id: master.task_id,
            subtask_id: master.subtask_id,
            subtask_type: master.subtask_type,
            ffts_type: master.ffts_type,
            start_time: master.start_time,
            end_time: master.end_time,
            primary: master.engine,
            mixed: partner.is_some(),
            aic,
            aiv,
        }
    }

    pub fn key(&self) -> MixGroupKey {
        MixGroupKey {
            stream_id: self.stream_id,
            task_id: self.task_id,
            subtask_id: self.subtask_id,
        }
    }

    pub fn engine(&self, kind: EngineKind) -> &EngineData {
        match kind {
            EngineKind::Aic => &self.aic,
            EngineKind::Aiv => &self.aiv,
        }
    }
}
