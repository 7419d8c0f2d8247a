//! Record decoding for raw PMU capture buffers.
//!
//! Decodes byte buffers made of whole fixed-size records into typed
//! [`PmuRecord`] values. Decoding is a pure function of the buffer: records of
//! an unrecognized kind are counted and skipped, overflowed records are kept
//! apart for diagnostics, and only a structurally broken buffer is an error.

use thiserror::Error;

use super::record::{
    BlockSample, ContextSample, CounterSet, EngineKind, MixType, PmuRecord, RecordKind,
    WireFormat, UNRESOLVED_STREAM_ID,
};

/// Bytes of every record that precede the cycle and counter block.
pub(crate) const HEADER_SIZE: usize = 16;
/// Offset of `total_cycle`, shared by both wire formats.
pub(crate) const TOTAL_CYCLE_OFFSET: usize = 16;
/// Offset of the first counter, shared by both wire formats.
pub(crate) const COUNTERS_OFFSET: usize = 24;

pub(crate) const FLAG_OVERFLOW: u8 = 0x01;
pub(crate) const FLAG_FFTS_TYPE_SHIFT: u8 = 1;
pub(crate) const FLAG_FFTS_TYPE_MASK: u8 = 0x07;
pub(crate) const FLAG_CORE_TYPE: u8 = 0x10;
pub(crate) const FLAG_MASTER: u8 = 0x20;
pub(crate) const FLAG_MIX: u8 = 0x40;

pub(crate) const KIND_MASK: u8 = 0x3F;
pub(crate) const GENERATION_SHIFT: u8 = 6;

/// Errors that make a whole buffer undecodable.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer of {len} bytes is not a whole number of {record_size}-byte records")]
    LengthNotMultiple { len: usize, record_size: usize },

    #[error("record {index}: undecodable header: {reason} (raw {raw:#04x})")]
    Header {
        index: usize,
        reason: &'static str,
        raw: u8,
    },
}

/// Everything decoded from one buffer, split by routing bucket.
#[derive(Debug, Clone)]
pub struct DecodedBuffer {
    pub format: WireFormat,
    /// Non-overflowed context samples in buffer order.
    pub contexts: Vec<ContextSample>,
    /// Non-overflowed block samples in buffer order.
    pub blocks: Vec<BlockSample>,
    /// Overflowed records of either kind. They never produce metrics.
    pub overflowed: Vec<PmuRecord>,
    /// For each entry of `overflowed`, how many of `contexts` precede it.
    pub overflow_positions: Vec<usize>,
    /// Records whose kind tag is not valid for `format`.
    pub wrong_kind: u64,
    /// Total number of records in the buffer.
    pub record_count: u64,
}

impl DecodedBuffer {
    fn new(format: WireFormat, record_count: usize) -> Self {
        Self {
            format,
            contexts: Vec::with_capacity(record_count),
            blocks: Vec::new(),
            overflowed: Vec::new(),
            overflow_positions: Vec::new(),
            wrong_kind: 0,
            record_count: record_count as u64,
        }
    }

    /// The first overflowed record in buffer order, if any.
    pub fn first_overflow(&self) -> Option<&PmuRecord> {
        self.overflowed.first()
    }

    /// Every context sample, overflowed ones included, in buffer order.
    pub fn contexts_in_order(&self) -> Vec<ContextSample> {
        let mut out = Vec::with_capacity(self.contexts.len() + self.overflowed.len());
        let mut next = 0;
        for (record, &pos) in self.overflowed.iter().zip(&self.overflow_positions) {
            let PmuRecord::Context(c) = record else {
                continue;
            };
            let end = pos.clamp(next, self.contexts.len());
            out.extend_from_slice(&self.contexts[next..end]);
            next = end;
            out.push(*c);
        }
        out.extend_from_slice(&self.contexts[next..]);
        out
    }
}

/// Decode a buffer holding only whole records of `format`.
pub fn decode_buffer(format: WireFormat, data: &[u8]) -> Result<DecodedBuffer, DecodeError> {
    let record_size = format.record_size();
    if data.len() % record_size != 0 {
        return Err(DecodeError::LengthNotMultiple {
            len: data.len(),
            record_size,
        });
    }

    let mut out = DecodedBuffer::new(format, data.len() / record_size);

    for (index, chunk) in data.chunks_exact(record_size).enumerate() {
        match decode_record(format, index, chunk)? {
            Some(record) if record.overflow() => {
                out.overflow_positions.push(out.contexts.len());
                out.overflowed.push(record);
            }
            Some(PmuRecord::Context(c)) => out.contexts.push(c),
            Some(PmuRecord::Block(b)) => out.blocks.push(b),
            None => out.wrong_kind += 1,
        }
    }

    Ok(out)
}

/// Decode one record. `Ok(None)` means the kind tag is not valid for `format`.
///
/// `chunk` must be exactly `format.record_size()` bytes; `index` is only used
/// in error reports.
pub fn decode_record(
    format: WireFormat,
    index: usize,
    chunk: &[u8],
) -> Result<Option<PmuRecord>, DecodeError> {
    let tag = read_u8(chunk, 0);
    let generation = tag >> GENERATION_SHIFT;
    if generation != format.generation() {
        return Err(DecodeError::Header {
            index,
            reason: "wire generation does not match declared format",
            raw: tag,
        });
    }

    let Some(kind) = RecordKind::from_u8(format, tag & KIND_MASK) else {
        return Ok(None);
    };

    let record = match kind {
        RecordKind::LegacyContext => PmuRecord::Context(parse_legacy_context(chunk)),
        RecordKind::LegacyBlock => PmuRecord::Block(parse_legacy_block(index, chunk)?),
        RecordKind::UnifiedContext => PmuRecord::Context(parse_unified_context(chunk)),
    };

    Ok(Some(record))
}

// ---------------------------------------------------------------------------
// Byte-reading helpers (bounds-checked, never panic)
// ---------------------------------------------------------------------------

#[inline(always)]
fn read_u8(data: &[u8], offset: usize) -> u8 {
    data.get(offset).copied().unwrap_or(0)
}

#[inline(always)]
fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(read_fixed::<2>(data, offset))
}

#[inline(always)]
fn read_u64_le(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(read_fixed::<8>(data, offset))
}

#[inline(always)]
fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    let mut buf = [0u8; N];
    if let Some(src) = offset.checked_add(N).and_then(|end| data.get(offset..end)) {
        buf.copy_from_slice(src);
    }
    buf
}

fn read_counters(data: &[u8], width: usize) -> CounterSet {
    let mut values = [0u64; super::record::MAX_PMU_COUNTERS];
    for (i, slot) in values.iter_mut().take(width).enumerate() {
        *slot = read_u64_le(data, COUNTERS_OFFSET + i * 8);
    }
    CounterSet::from_slice(values.get(..width).unwrap_or(&[]))
}

fn ffts_type(flags: u8) -> u8 {
    (flags >> FLAG_FFTS_TYPE_SHIFT) & FLAG_FFTS_TYPE_MASK
}

fn engine(flags: u8) -> EngineKind {
    if flags & FLAG_CORE_TYPE != 0 {
        EngineKind::Aiv
    } else {
        EngineKind::Aic
    }
}

// ---------------------------------------------------------------------------
// Per-kind parsers
// ---------------------------------------------------------------------------

/// Legacy context sample. Legacy hardware only emits context samples for the
/// primary engine, so every one of them is a master.
fn parse_legacy_context(data: &[u8]) -> ContextSample {
    let flags = read_u8(data, 1);
    ContextSample {
        stream_id: UNRESOLVED_STREAM_ID,
        task_id: u32::from(read_u16_le(data, 4)),
        subtask_id: u32::from(read_u16_le(data, 6)),
        subtask_type: read_u8(data, 2),
        engine: engine(flags),
        is_master: true,
        is_mix: false,
        ffts_type: ffts_type(flags),
        total_cycle: read_u64_le(data, TOTAL_CYCLE_OFFSET),
        counters: read_counters(data, WireFormat::Legacy.counter_width()),
        // 8 counters end at 88.
        start_time: read_u64_le(data, 88),
        end_time: read_u64_le(data, 96),
        overflow: flags & FLAG_OVERFLOW != 0,
    }
}

/// Legacy per-core block fragment.
fn parse_legacy_block(index: usize, data: &[u8]) -> Result<BlockSample, DecodeError> {
    let flags = read_u8(data, 1);
    let mix_raw = read_u8(data, 3);
    let mix_type = MixType::from_u8(mix_raw).ok_or(DecodeError::Header {
        index,
        reason: "invalid mix_type",
        raw: mix_raw,
    })?;
    Ok(BlockSample {
        stream_id: UNRESOLVED_STREAM_ID,
        task_id: u32::from(read_u16_le(data, 4)),
        subtask_id: u32::from(read_u16_le(data, 6)),
        subtask_type: read_u8(data, 2),
        core_id: read_u16_le(data, 8),
        engine: engine(flags),
        mix_type,
        ffts_type: ffts_type(flags),
        total_cycle: read_u64_le(data, TOTAL_CYCLE_OFFSET),
        counters: read_counters(data, WireFormat::Legacy.counter_width()),
        start_time: read_u64_le(data, 88),
        end_time: read_u64_le(data, 96),
        overflow: flags & FLAG_OVERFLOW != 0,
    })
}

/// Unified context sample carrying its own master and mixed-operator flags.
fn parse_unified_context(data: &[u8]) -> ContextSample {
    let flags = read_u8(data, 1);
    ContextSample {
        stream_id: UNRESOLVED_STREAM_ID,
        task_id: u32::from(read_u16_le(data, 4)),
        subtask_id: u32::from(read_u16_le(data, 6)),
        subtask_type: read_u8(data, 2),
        engine: engine(flags),
        is_master: flags & FLAG_MASTER != 0,
        is_mix: flags & FLAG_MIX != 0,
        ffts_type: ffts_type(flags),
        total_cycle: read_u64_le(data, TOTAL_CYCLE_OFFSET),
        counters: read_counters(data, WireFormat::Unified.counter_width()),
        // 10 counters end at 104.
        start_time: read_u64_le(data, 104),
        end_time: read_u64_le(data, 112),
        overflow: flags & FLAG_OVERFLOW != 0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
