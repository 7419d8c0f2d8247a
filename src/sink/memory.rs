use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::Mutex;

use crate::row::{OutputRow, RowSchema};

/// Contents of a [`MemorySink`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub columns: Vec<String>,
    /// Rows made durable by a flush.
    pub rows: Vec<OutputRow>,
    /// Rows inserted since the last flush.
    pub pending: Vec<OutputRow>,
    pub flushes: usize,
}

/// In-process row store. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        "memory"
    }

    pub fn store(&self) -> Arc<Mutex<MemoryStore>> {
        Arc::clone(&self.store)
    }

    /// Flushed rows, in insertion order.
    pub fn rows(&self) -> Vec<OutputRow> {
        self.store.lock().rows.clone()
    }

    pub async fn create_schema(&mut self, schema: &RowSchema) -> Result<()> {
        let mut store = self.store.lock();
        store.columns = schema.columns().iter().map(|c| c.name.clone()).collect();
        Ok(())
    }

    pub async fn insert_rows(&mut self, rows: &[OutputRow]) -> Result<()> {
        let mut store = self.store.lock();
        if store.columns.is_empty() {
            bail!("insert into memory sink before create_schema");
        }
        store.pending.extend_from_slice(rows);
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        let mut store = self.store.lock();
        let pending = std::mem::take(&mut store.pending);
        store.rows.extend(pending);
        store.flushes += 1;
        Ok(())
    }
}
