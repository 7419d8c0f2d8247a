use std::fmt;

/// Stream id assigned to samples whose task id has no host-side mapping.
pub const UNRESOLVED_STREAM_ID: u32 = u32::MAX;

/// Widest counter vector any wire format carries.
pub const MAX_PMU_COUNTERS: usize = 10;

/// Wire generation of a PMU capture file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    /// FFTS PMU log: 128-byte records, 8 counters, context and block samples.
    Legacy,
    /// Unified log: 160-byte records, 10 counters, master/slave context samples.
    Unified,
}

impl WireFormat {
    /// Fixed size of one record in bytes.
    pub const fn record_size(self) -> usize {
        match self {
            Self::Legacy => 128,
            Self::Unified => 160,
        }
    }

    /// Number of PMU counters carried per record.
    pub const fn counter_width(self) -> usize {
        match self {
            Self::Legacy => 8,
            Self::Unified => 10,
        }
    }

    /// Generation bits stored in the top two bits of the tag byte.
    pub const fn generation(self) -> u8 {
        match self {
            Self::Legacy => 0,
            Self::Unified => 1,
        }
    }

    /// Returns the canonical config/log label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Unified => "unified",
        }
    }

    /// Convert from the canonical config/log label.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "legacy" => Some(Self::Legacy),
            "unified" => Some(Self::Unified),
            _ => None,
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RecordKind identifies what a record's tag byte says it carries.
/// Values must match the low six bits of the hardware tag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    LegacyContext = 0x28,
    LegacyBlock = 0x29,
    UnifiedContext = 0x30,
}

impl RecordKind {
    /// Convert from a raw kind value, scoped to the wire format that may emit it.
    pub fn from_u8(format: WireFormat, v: u8) -> Option<Self> {
        match (format, v) {
            (WireFormat::Legacy, 0x28) => Some(Self::LegacyContext),
            (WireFormat::Legacy, 0x29) => Some(Self::LegacyBlock),
            (WireFormat::Unified, 0x30) => Some(Self::UnifiedContext),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LegacyContext => "legacy_context",
            Self::LegacyBlock => "legacy_block",
            Self::UnifiedContext => "unified_context",
        }
    }
}

/// EngineKind identifies which execution engine of an accelerator core ran a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum EngineKind {
    /// Scalar/matrix engine.
    Aic = 0,
    /// Vector engine.
    Aiv = 1,
}

impl EngineKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Aic),
            1 => Some(Self::Aiv),
            _ => None,
        }
    }

    /// The engine that cooperates with this one in a mixed operator.
    pub const fn partner(self) -> Self {
        match self {
            Self::Aic => Self::Aiv,
            Self::Aiv => Self::Aic,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aic => "aic",
            Self::Aiv => "aiv",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which engine emitted the context a block fragment belongs to (legacy only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MixType {
    None = 0,
    MixAic = 1,
    MixAiv = 2,
}

impl MixType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::MixAic),
            2 => Some(Self::MixAiv),
            _ => None,
        }
    }

    /// Engine whose counters a bucket of fragments with this tag represents.
    ///
    /// Fragments tagged as emitted by one engine stand for the cooperating
    /// engine's contribution. `None` tags never synthesize a partner sample.
    pub const fn represented_engine(self) -> Option<EngineKind> {
        match self {
            Self::None => None,
            Self::MixAic => Some(EngineKind::Aiv),
            Self::MixAiv => Some(EngineKind::Aic),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::MixAic => "mix_aic",
            Self::MixAiv => "mix_aiv",
        }
    }
}

/// Fixed-capacity PMU counter vector; `width` is set by the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSet {
    values: [u64; MAX_PMU_COUNTERS],
    width: usize,
}

impl CounterSet {
    /// All-zero counters of the given width (clamped to [`MAX_PMU_COUNTERS`]).
    pub fn zeroed(width: usize) -> Self {
        Self {
            values: [0; MAX_PMU_COUNTERS],
            width: width.min(MAX_PMU_COUNTERS),
        }
    }

    /// Builds a counter set from a slice; extra values beyond capacity are ignored.
    pub fn from_slice(values: &[u64]) -> Self {
        let mut set = Self::zeroed(values.len());
        for (slot, v) in set.values.iter_mut().zip(values) {
            *slot = *v;
        }
        set
    }

    pub fn as_slice(&self) -> &[u64] {
        self.values.get(..self.width).unwrap_or(&[])
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Value of one counter slot, `None` outside the width.
    pub fn get(&self, slot: usize) -> Option<u64> {
        self.as_slice().get(slot).copied()
    }

    /// Element-wise saturating accumulation of `other` into `self`.
    pub fn accumulate(&mut self, other: &CounterSet) {
        let width = self.width.max(other.width);
        for (acc, v) in self.values.iter_mut().zip(other.as_slice()) {
            *acc = acc.saturating_add(*v);
        }
        self.width = width;
    }
}

/// Join key for master/slave pairing and block bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MixGroupKey {
    pub stream_id: u32,
    pub task_id: u32,
    pub subtask_id: u32,
}

impl fmt::Display for MixGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stream={} task={} subtask={}",
            self.stream_id, self.task_id, self.subtask_id
        )
    }
}

/// One PMU snapshot for one scheduled context on one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSample {
    /// Backfilled from the host task map; [`UNRESOLVED_STREAM_ID`] until then.
    pub stream_id: u32,
    pub task_id: u32,
    pub subtask_id: u32,
    pub subtask_type: u8,
    pub engine: EngineKind,
    pub is_master: bool,
    /// The operator runs on both engines.
    pub is_mix: bool,
    pub ffts_type: u8,
    pub start_time: u64,
    pub end_time: u64,
    pub total_cycle: u64,
    pub counters: CounterSet,
    pub overflow: bool,
}

impl ContextSample {
    pub fn key(&self) -> MixGroupKey {
        MixGroupKey {
            stream_id: self.stream_id,
            task_id: self.task_id,
            subtask_id: self.subtask_id,
        }
    }
}

/// Per-physical-core fragment of a context sample (legacy only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSample {
    pub stream_id: u32,
    pub task_id: u32,
    pub subtask_id: u32,
    pub subtask_type: u8,
    pub core_id: u16,
    pub engine: EngineKind,
    pub mix_type: MixType,
    pub ffts_type: u8,
    pub start_time: u64,
    pub end_time: u64,
    pub total_cycle: u64,
    pub counters: CounterSet,
    pub overflow: bool,
}

impl BlockSample {
    pub fn key(&self) -> MixGroupKey {
        MixGroupKey {
            stream_id: self.stream_id,
            task_id: self.task_id,
            subtask_id: self.subtask_id,
        }
    }
}

/// A decoded record of a recognized kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmuRecord {
    Context(ContextSample),
    Block(BlockSample),
}

impl PmuRecord {
    pub fn task_id(&self) -> u32 {
        match self {
            Self::Context(c) => c.task_id,
            Self::Block(b) => b.task_id,
        }
    }

    pub fn overflow(&self) -> bool {
        match self {
            Self::Context(c) => c.overflow,
            Self::Block(b) => b.overflow,
        }
    }
}
