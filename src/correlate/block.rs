//! Partner-engine reconstruction from legacy block fragments.
//!
//! Legacy hardware never emits a context sample for the secondary engine of
//! a mixed operator. Its per-core block fragments are bucketed by
//! [`MixGroupKey`] and summed into one synthetic sample per bucket.

use std::collections::BTreeMap;

use tracing::debug;

use crate::pmu::record::{
    BlockSample, ContextSample, CounterSet, EngineKind, MixGroupKey, MixType, WireFormat,
};

use super::{EngineData, MergedSample};

/// Summed fragments of one bucket, attributed to the engine they represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticSample {
    pub key: MixGroupKey,
    pub mix_type: MixType,
    pub represents: EngineKind,
    pub total_cycle: u64,
    pub counters: CounterSet,
    pub fragments: usize,
}

/// Result of aggregating one buffer's block fragments.
#[derive(Debug, Clone, Default)]
pub struct BlockAggregation {
    pub samples: BTreeMap<MixGroupKey, SyntheticSample>,
    /// Buckets dropped because their fragments disagree on `mix_type`.
    pub invalid: Vec<MixGroupKey>,
}

impl BlockAggregation {
    pub fn get(&self, key: &MixGroupKey) -> Option<&SyntheticSample> {
        self.samples.get(key)
    }
}

/// Buckets fragments by key and sums each valid bucket.
pub fn aggregate_blocks(blocks: &[BlockSample]) -> BlockAggregation {
    let mut buckets: BTreeMap<MixGroupKey, Vec<&BlockSample>> = BTreeMap::new();
    for b in blocks {
        buckets.entry(b.key()).or_default().push(b);
    }

    let mut out = BlockAggregation::default();
    for (key, fragments) in buckets {
        let Some(first) = fragments.first() else {
            continue;
        };
        let mix_type = first.mix_type;

        if fragments.iter().any(|f| f.mix_type != mix_type) {
            debug!(
                %key,
                fragments = fragments.len(),
                "dropping block bucket with mixed mix_type tags"
            );
            out.invalid.push(key);
            continue;
        }

        let Some(represents) = mix_type.represented_engine() else {
            debug!(%key, "block bucket is not part of a mixed operator");
            continue;
        };

        let mut total_cycle = 0u64;
        let mut counters = CounterSet::zeroed(first.counters.width());
        for f in &fragments {
            total_cycle = total_cycle.saturating_add(f.total_cycle);
            counters.accumulate(&f.counters);
        }

        out.samples.insert(
            key,
            SyntheticSample {
                key,
                mix_type,
                represents,
                total_cycle,
                counters,
                fragments: fragments.len(),
            },
        );
    }

    out
}

/// Merges legacy context samples with the synthetic partner data for their key.
pub fn merge_legacy(contexts: &[ContextSample], blocks: &BlockAggregation) -> Vec<MergedSample> {
    let width = WireFormat::Legacy.counter_width();

    contexts
        .iter()
        .map(|ctx| {
            let partner = blocks.get(&ctx.key()).and_then(|s| {
                if s.represents == ctx.engine {
                    debug!(
                        key = %s.key,
                        engine = %ctx.engine,
                        "ignoring block aggregate for the context's own engine"
                    );
                    return None;
                }
                Some(EngineData {
                    total_cycle: s.total_cycle,
                    counters: s.counters,
                })
            });
            MergedSample::from_master(ctx, partner, width)
        })
        .collect()
}
