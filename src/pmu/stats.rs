use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Diagnostic conditions counted while processing a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Diagnostic {
    RecordsDecoded = 0,
    WrongKind = 1,
    Overflowed = 2,
    UnresolvedTask = 3,
    InvalidBlockBucket = 4,
    RowsEmitted = 5,
    FilesProcessed = 6,
    FilesFailed = 7,
}

const DIAGNOSTIC_CARDINALITY: usize = 8;

impl Diagnostic {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RecordsDecoded => "records_decoded",
            Self::WrongKind => "wrong_kind",
            Self::Overflowed => "overflowed",
            Self::UnresolvedTask => "unresolved_task",
            Self::InvalidBlockBucket => "invalid_block_bucket",
            Self::RowsEmitted => "rows_emitted",
            Self::FilesProcessed => "files_processed",
            Self::FilesFailed => "files_failed",
        }
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::RecordsDecoded),
            1 => Some(Self::WrongKind),
            2 => Some(Self::Overflowed),
            3 => Some(Self::UnresolvedTask),
            4 => Some(Self::InvalidBlockBucket),
            5 => Some(Self::RowsEmitted),
            6 => Some(Self::FilesProcessed),
            7 => Some(Self::FilesFailed),
            _ => None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free per-[`Diagnostic`] counters.
///
/// One instance per device run, logged once when the device completes. The
/// counts are not part of any output row.
pub struct DiagnosticStats {
    counts: [AtomicU64; DIAGNOSTIC_CARDINALITY],
}

impl DiagnosticStats {
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Increment the counter for `d` by one.
    pub fn record(&self, d: Diagnostic) {
        self.record_n(d, 1);
    }

    /// Increment the counter for `d` by n.
    pub fn record_n(&self, d: Diagnostic, n: u64) {
        if n == 0 {
            return;
        }
        if let Some(counter) = self.counts.get(d as usize) {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Current value of one counter.
    pub fn get(&self, d: Diagnostic) -> u64 {
        self.counts
            .get(d as usize)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Atomically read and reset all counters, returning only non-zero entries.
    pub fn snapshot(&self) -> Vec<(Diagnostic, u64)> {
        let mut result = Vec::new();

        for (i, counter) in self.counts.iter().enumerate() {
            let v = counter.swap(0, Ordering::Relaxed);
            if v > 0 {
                if let Some(d) = Diagnostic::from_u8(i as u8) {
                    result.push((d, v));
                }
            }
        }

        result
    }
}

impl Default for DiagnosticStats {
    fn default() -> Self {
        Self::new()
    }
}
