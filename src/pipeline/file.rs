//! Per-file processing: decode, resolve, correlate, derive.
//!
//! Every file walks `Init -> Decoding -> Resolving -> Correlating -> Deriving
//! -> Emitting -> Done` exactly once. A failure before `Emitting` yields no
//! rows for that file; the device run moves on to the next one.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{trace, warn};

use crate::correlate::{aggregate_blocks, merge_legacy, MergedSample, PairingCorrelator, StreamResolver};
use crate::pmu::decode::{decode_buffer, DecodeError};
use crate::pmu::record::{PmuRecord, WireFormat};
use crate::pmu::stats::{Diagnostic, DiagnosticStats};
use crate::row::{OutputRow, RowBuilder};

/// Processing stage of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    Decoding,
    Resolving,
    Correlating,
    Deriving,
    Emitting,
    Done,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Decoding => "decoding",
            Self::Resolving => "resolving",
            Self::Correlating => "correlating",
            Self::Deriving => "deriving",
            Self::Emitting => "emitting",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File-level failure. Only these abort a file.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed record stream while {stage}: {source}")]
    MalformedRecord {
        stage: Stage,
        #[source]
        source: DecodeError,
    },
}

/// Rows and data-quality counts for one successfully processed file.
#[derive(Debug, Clone, Default)]
pub struct FileOutput {
    pub rows: Vec<OutputRow>,
    pub records: u64,
    pub wrong_kind: u64,
    pub overflowed: usize,
    pub unresolved_samples: usize,
    pub invalid_block_buckets: usize,
}

/// Sequential core for one device. Pairing and resolver state persist across
/// the files of the device, so files must be fed in sequence order.
pub struct DeviceProcessor<'a> {
    format: WireFormat,
    resolver: StreamResolver<'a>,
    pairing: PairingCorrelator,
    builder: RowBuilder<'a>,
    stats: &'a DiagnosticStats,
}

impl<'a> DeviceProcessor<'a> {
    pub fn new(format: WireFormat, builder: RowBuilder<'a>, stats: &'a DiagnosticStats) -> Self {
        let host_map = builder.context().host_map;
        Self {
            format,
            resolver: StreamResolver::new(host_map),
            pairing: PairingCorrelator::new(format),
            builder,
            stats,
        }
    }

    /// Slaves still waiting for a master from a later file.
    pub fn pending_slaves(&self) -> usize {
        self.pairing.pending_slaves()
    }

    /// Reads and processes one capture file.
    pub fn process_file(&mut self, path: &Path) -> Result<FileOutput, FileError> {
        let data = std::fs::read(path).map_err(|source| FileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        self.process_buffer(&name, &data)
    }

    /// Processes the bytes of one file. `file` only labels log lines.
    pub fn process_buffer(&mut self, file: &str, data: &[u8]) -> Result<FileOutput, FileError> {
        let mut stage = Stage::Init;
        let mut out = FileOutput::default();

        advance(file, &mut stage, Stage::Decoding);
        let mut decoded = decode_buffer(self.format, data)
            .map_err(|source| FileError::MalformedRecord { stage, source })?;
        out.records = decoded.record_count;
        out.wrong_kind = decoded.wrong_kind;
        out.overflowed = decoded.overflowed.len();
        self.stats.record_n(Diagnostic::RecordsDecoded, decoded.record_count);

        if decoded.wrong_kind > 0 {
            warn!(
                file,
                count = decoded.wrong_kind,
                format = %self.format,
                "dropping PMU records of unrecognized kind"
            );
            self.stats.record_n(Diagnostic::WrongKind, decoded.wrong_kind);
        }

        advance(file, &mut stage, Stage::Resolving);
        let summary = self.resolver.resolve(&mut decoded);
        out.unresolved_samples = summary.unresolved_samples;
        self.stats
            .record_n(Diagnostic::UnresolvedTask, summary.new_unresolved_tasks as u64);

        if let Some(first) = decoded.first_overflow() {
            let (stream_id, task_id) = match first {
                PmuRecord::Context(c) => (c.stream_id, c.task_id),
                PmuRecord::Block(b) => (b.stream_id, b.task_id),
            };
            warn!(
                file,
                stream_id,
                task_id,
                count = decoded.overflowed.len(),
                "PMU counters overflowed, samples from this point on may be unreliable"
            );
            self.stats
                .record_n(Diagnostic::Overflowed, decoded.overflowed.len() as u64);
        }

        advance(file, &mut stage, Stage::Correlating);
        let merged: Vec<MergedSample> = match self.format {
            WireFormat::Unified => self.pairing.correlate(&decoded.contexts_in_order()),
            WireFormat::Legacy => {
                let blocks = aggregate_blocks(&decoded.blocks);
                out.invalid_block_buckets = blocks.invalid.len();
                self.stats
                    .record_n(Diagnostic::InvalidBlockBucket, blocks.invalid.len() as u64);
                merge_legacy(&decoded.contexts, &blocks)
            }
        };

        advance(file, &mut stage, Stage::Deriving);
        out.rows = merged.iter().map(|m| self.builder.build(m)).collect();

        advance(file, &mut stage, Stage::Emitting);
        Ok(out)
    }
}

fn advance(file: &str, stage: &mut Stage, next: Stage) {
    debug_assert!(next > *stage, "stage {next} entered after {stage}");
    trace!(file, from = %stage, to = %next, "stage transition");
    *stage = next;
}
