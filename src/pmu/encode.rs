//! Record encoding, the exact inverse of [`super::decode`].
//!
//! Used to build synthetic capture files for tests, benches and fixtures.
//! Stream ids are not part of the wire layout and are dropped.

use super::decode::{
    COUNTERS_OFFSET, FLAG_CORE_TYPE, FLAG_FFTS_TYPE_MASK, FLAG_FFTS_TYPE_SHIFT, FLAG_MASTER,
    FLAG_MIX, FLAG_OVERFLOW, GENERATION_SHIFT, TOTAL_CYCLE_OFFSET,
};
use super::record::{BlockSample, ContextSample, EngineKind, RecordKind, WireFormat};

/// Encode a context sample in the given wire format.
///
/// The legacy layout has no master or mixed-operator bits; those fields are
/// implied on decode (`is_master = true`, `is_mix = false`).
pub fn encode_context(format: WireFormat, sample: &ContextSample) -> Vec<u8> {
    let mut buf = vec![0u8; format.record_size()];
    let kind = match format {
        WireFormat::Legacy => RecordKind::LegacyContext,
        WireFormat::Unified => RecordKind::UnifiedContext,
    };

    let mut flags = common_flags(sample.overflow, sample.ffts_type, sample.engine);
    if format == WireFormat::Unified {
        if sample.is_master {
            flags |= FLAG_MASTER;
        }
        if sample.is_mix {
            flags |= FLAG_MIX;
        }
    }

    write_header(&mut buf, format, kind, flags, sample.subtask_type);
    write_ids(&mut buf, sample.task_id, sample.subtask_id);
    write_u64(&mut buf, TOTAL_CYCLE_OFFSET, sample.total_cycle);
    let times_at = write_counters(&mut buf, format, sample.counters.as_slice());
    write_u64(&mut buf, times_at, sample.start_time);
    write_u64(&mut buf, times_at + 8, sample.end_time);
    buf
}

/// Encode a legacy block fragment.
pub fn encode_block(sample: &BlockSample) -> Vec<u8> {
    let format = WireFormat::Legacy;
    let mut buf = vec![0u8; format.record_size()];
    let flags = common_flags(sample.overflow, sample.ffts_type, sample.engine);

    write_header(
        &mut buf,
        format,
        RecordKind::LegacyBlock,
        flags,
        sample.subtask_type,
    );
    if let Some(b) = buf.get_mut(3) {
        *b = sample.mix_type as u8;
    }
    write_ids(&mut buf, sample.task_id, sample.subtask_id);
    write_u16(&mut buf, 8, sample.core_id);
    write_u64(&mut buf, TOTAL_CYCLE_OFFSET, sample.total_cycle);
    let times_at = write_counters(&mut buf, format, sample.counters.as_slice());
    write_u64(&mut buf, times_at, sample.start_time);
    write_u64(&mut buf, times_at + 8, sample.end_time);
    buf
}

/// Task and subtask ids are 16 bits on the wire.
fn write_ids(buf: &mut [u8], task_id: u32, subtask_id: u32) {
    debug_assert!(task_id <= u32::from(u16::MAX), "task_id {task_id} exceeds the wire field");
    debug_assert!(
        subtask_id <= u32::from(u16::MAX),
        "subtask_id {subtask_id} exceeds the wire field"
    );
    write_u16(buf, 4, task_id as u16);
    write_u16(buf, 6, subtask_id as u16);
}

fn common_flags(overflow: bool, ffts_type: u8, engine: EngineKind) -> u8 {
    let mut flags = (ffts_type & FLAG_FFTS_TYPE_MASK) << FLAG_FFTS_TYPE_SHIFT;
    if overflow {
        flags |= FLAG_OVERFLOW;
    }
    if engine == EngineKind::Aiv {
        flags |= FLAG_CORE_TYPE;
    }
    flags
}

fn write_header(buf: &mut [u8], format: WireFormat, kind: RecordKind, flags: u8, subtask_type: u8) {
    let tag = (kind as u8) | (format.generation() << GENERATION_SHIFT);
    for (slot, v) in buf.iter_mut().zip([tag, flags, subtask_type]) {
        *slot = v;
    }
}

/// Writes the counter block and returns the offset right after it.
fn write_counters(buf: &mut [u8], format: WireFormat, counters: &[u64]) -> usize {
    let width = format.counter_width();
    for i in 0..width {
        let value = counters.get(i).copied().unwrap_or(0);
        write_u64(buf, COUNTERS_OFFSET + i * 8, value);
    }
    COUNTERS_OFFSET + width * 8
}

fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    if let Some(dst) = buf.get_mut(offset..offset + 2) {
        dst.copy_from_slice(&value.to_le_bytes());
    }
}

fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
    if let Some(dst) = buf.get_mut(offset..offset + 8) {
        dst.copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pmu::decode::decode_buffer;
    use crate::pmu::record::CounterSet;

    fn context(task_id: u32) -> ContextSample {
        ContextSample {
            stream_id: 0,
            task_id,
            subtask_id: 0,
            subtask_type: 0,
            engine: EngineKind::Aic,
            is_master: true,
            is_mix: false,
            ffts_type: 4,
            start_time: 1,
            end_time: 2,
            total_cycle: 3,
            counters: CounterSet::zeroed(10),
            overflow: false,
        }
    }

    #[test]
    fn test_max_wire_task_id_survives() {
        let sample = context(u32::from(u16::MAX));
        let data = encode_context(WireFormat::Unified, &sample);
        let decoded = decode_buffer(WireFormat::Unified, &data).unwrap();
        assert_eq!(decoded.contexts[0].task_id, u32::from(u16::MAX));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "task_id 65536 exceeds the wire field")]
    fn test_task_id_beyond_wire_field_rejected() {
        encode_context(WireFormat::Unified, &context(65_536));
    }
}
