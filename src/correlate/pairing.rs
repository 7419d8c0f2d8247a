use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::pmu::record::{ContextSample, MixGroupKey, WireFormat};

use super::{EngineData, MergedSample};

/// A queued slave. Overflowed slaves keep their place in the queue so the
/// master they belong to still consumes them.
#[derive(Debug, Clone, Copy)]
enum SlaveSlot {
    Sample(ContextSample),
    Overflowed,
}

/// Pairs master context samples with their slave-engine counterparts.
///
/// Slaves wait in per-key FIFO queues. A key can recur across iterations of
/// the same operator, so a master always consumes the oldest unmatched slave.
/// Queues outlive a single call: leftovers from one file stay matchable by
/// masters in later files of the same device.
///
/// Overflowed records take part in the matching but never produce output.
/// An overflowed mixed master discards the slave it would have consumed, and
/// a master whose slave overflowed is emitted with a zero partner.
pub struct PairingCorrelator {
    width: usize,
    slaves: HashMap<MixGroupKey, VecDeque<SlaveSlot>>,
    /// Slaves still owed to overflowed masters that found an empty queue.
    discard: HashMap<MixGroupKey, usize>,
}

impl PairingCorrelator {
    pub fn new(format: WireFormat) -> Self {
        Self {
            width: format.counter_width(),
            slaves: HashMap::new(),
            discard: HashMap::new(),
        }
    }

    /// Number of slaves still waiting for a master.
    pub fn pending_slaves(&self) -> usize {
        self.slaves.values().map(VecDeque::len).sum()
    }

    /// Produces one merged sample per non-overflowed master in `samples`, in
    /// input order. `samples` must be in buffer order with overflowed
    /// contexts included.
    pub fn correlate(&mut self, samples: &[ContextSample]) -> Vec<MergedSample> {
        let mut masters = Vec::with_capacity(samples.len());
        for sample in samples {
            if sample.is_master {
                masters.push(sample);
            } else {
                self.enqueue_slave(sample);
            }
        }

        let mut merged = Vec::with_capacity(masters.len());
        for master in masters {
            if master.overflow {
                if master.is_mix {
                    self.discard_slave(master.key());
                }
                continue;
            }

            let partner = if master.is_mix {
                self.take_slave(master)
            } else {
                None
            };
            merged.push(MergedSample::from_master(master, partner, self.width));
        }
        merged
    }

    fn enqueue_slave(&mut self, slave: &ContextSample) {
        let key = slave.key();
        if let Some(owed) = self.discard.get_mut(&key) {
            *owed -= 1;
            if *owed == 0 {
                self.discard.remove(&key);
            }
            debug!(%key, "dropping slave of an overflowed master");
            return;
        }

        let slot = if slave.overflow {
            SlaveSlot::Overflowed
        } else {
            SlaveSlot::Sample(*slave)
        };
        self.slaves.entry(key).or_default().push_back(slot);
    }

    fn pop_slave(&mut self, key: &MixGroupKey) -> Option<SlaveSlot> {
        let queue = self.slaves.get_mut(key)?;
        let slot = queue.pop_front();
        if queue.is_empty() {
            self.slaves.remove(key);
        }
        slot
    }

    fn discard_slave(&mut self, key: MixGroupKey) {
        if self.pop_slave(&key).is_none() {
            *self.discard.entry(key).or_default() += 1;
        }
    }

    fn take_slave(&mut self, master: &ContextSample) -> Option<EngineData> {
        let key = master.key();
        let slave = match self.pop_slave(&key)? {
            SlaveSlot::Sample(slave) => slave,
            SlaveSlot::Overflowed => {
                debug!(%key, "slave overflowed, emitting master without partner");
                return None;
            }
        };

        if slave.engine == master.engine {
            debug!(
                %key,
                engine = %slave.engine,
                "dropping slave that runs on the same engine as its master"
            );
            return None;
        }
        Some(EngineData::from(&slave))
    }
}
