pub mod clickhouse;
pub mod memory;
pub mod ndjson;

use anyhow::Result;

use crate::config::SinksConfig;
use crate::row::{OutputRow, RowSchema};

pub use self::clickhouse::{ClickHouseSink, ClickHouseWriter};
pub use self::memory::{MemorySink, MemoryStore};
pub use self::ndjson::NdjsonSink;

/// Per-device persistence backend.
///
/// Uses enum dispatch rather than trait objects so the async methods need no
/// boxing.
pub enum Sink {
    ClickHouse(ClickHouseSink),
    Ndjson(NdjsonSink),
    Memory(MemorySink),
}

impl Sink {
    /// Returns the sink name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::ClickHouse(s) => s.name(),
            Self::Ndjson(s) => s.name(),
            Self::Memory(s) => s.name(),
        }
    }

    /// Prepare storage for rows of `schema`. Called once per device run.
    pub async fn create_schema(&mut self, schema: &RowSchema) -> Result<()> {
        match self {
            Self::ClickHouse(s) => s.create_schema(schema).await,
            Self::Ndjson(s) => s.create_schema(schema).await,
            Self::Memory(s) => s.create_schema(schema).await,
        }
    }

    /// Buffer rows for writing.
    pub async fn insert_rows(&mut self, rows: &[OutputRow]) -> Result<()> {
        match self {
            Self::ClickHouse(s) => s.insert_rows(rows).await,
            Self::Ndjson(s) => s.insert_rows(rows).await,
            Self::Memory(s) => s.insert_rows(rows).await,
        }
    }

    /// Make all buffered rows durable.
    pub async fn flush(&mut self) -> Result<()> {
        match self {
            Self::ClickHouse(s) => s.flush().await,
            Self::Ndjson(s) => s.flush().await,
            Self::Memory(s) => s.flush().await,
        }
    }
}

/// Builds the configured sinks for one device.
pub fn device_sinks(
    cfg: &SinksConfig,
    clickhouse: Option<&ClickHouseWriter>,
    device_id: u32,
) -> Vec<Sink> {
    let mut sinks = Vec::with_capacity(2);

    if cfg.ndjson.enabled {
        sinks.push(Sink::Ndjson(NdjsonSink::new(&cfg.ndjson, device_id)));
    }

    if let Some(sink) = clickhouse.and_then(|w| w.device_sink(device_id)) {
        sinks.push(Sink::ClickHouse(sink));
    }

    sinks
}
