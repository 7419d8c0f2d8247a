use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use tracing::warn;

use crate::pmu::decode::DecodedBuffer;
use crate::pmu::record::{PmuRecord, UNRESOLVED_STREAM_ID};

/// One host-side task record: which stream a device task id was launched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HostTask {
    pub task_id: u32,
    pub stream_id: u32,
    #[serde(default)]
    pub batch_id: u32,
}

/// Read-only `task_id -> stream_id` mapping captured on the host.
#[derive(Debug, Clone, Default)]
pub struct HostTaskMap {
    tasks: HashMap<u32, HostTask>,
}

impl HostTaskMap {
    /// Builds a map from entries; a later entry for the same task id wins.
    pub fn from_entries(entries: impl IntoIterator<Item = HostTask>) -> Self {
        let tasks = entries.into_iter().map(|t| (t.task_id, t)).collect();
        Self { tasks }
    }

    pub fn get(&self, task_id: u32) -> Option<&HostTask> {
        self.tasks.get(&task_id)
    }

    pub fn stream_id(&self, task_id: u32) -> Option<u32> {
        self.tasks.get(&task_id).map(|t| t.stream_id)
    }

    /// Batch id for a task, 0 when the host did not record one.
    pub fn batch_id(&self, task_id: u32) -> u32 {
        self.tasks.get(&task_id).map_or(0, |t| t.batch_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Outcome of resolving one buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveSummary {
    /// Samples left at [`UNRESOLVED_STREAM_ID`].
    pub unresolved_samples: usize,
    /// Task ids seen unresolved for the first time by this resolver.
    pub new_unresolved_tasks: usize,
}

/// Backfills stream ids on decoded samples.
///
/// Warns once per missing task id for the lifetime of the resolver, which is
/// one device run.
pub struct StreamResolver<'a> {
    map: &'a HostTaskMap,
    warned: HashSet<u32>,
}

impl<'a> StreamResolver<'a> {
    pub fn new(map: &'a HostTaskMap) -> Self {
        Self {
            map,
            warned: HashSet::new(),
        }
    }

    pub fn map(&self) -> &'a HostTaskMap {
        self.map
    }

    /// Sets `stream_id` on every sample of `decoded`. No other field changes.
    pub fn resolve(&mut self, decoded: &mut DecodedBuffer) -> ResolveSummary {
        let mut summary = ResolveSummary::default();

        for c in &mut decoded.contexts {
            c.stream_id = self.lookup(c.task_id, &mut summary);
        }
        for b in &mut decoded.blocks {
            b.stream_id = self.lookup(b.task_id, &mut summary);
        }
        for record in &mut decoded.overflowed {
            match record {
                PmuRecord::Context(c) => c.stream_id = self.lookup(c.task_id, &mut summary),
                PmuRecord::Block(b) => b.stream_id = self.lookup(b.task_id, &mut summary),
            }
        }

        summary
    }

    fn lookup(&mut self, task_id: u32, summary: &mut ResolveSummary) -> u32 {
        if let Some(stream_id) = self.map.stream_id(task_id) {
            return stream_id;
        }

        summary.unresolved_samples += 1;
        if self.warned.insert(task_id) {
            summary.new_unresolved_tasks += 1;
            warn!(task_id, "no host stream id for task, keeping unresolved");
        }
        UNRESOLVED_STREAM_ID
    }
}
