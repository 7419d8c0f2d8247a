use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::config::NdjsonConfig;
use crate::row::{Cell, OutputRow, RowSchema};

/// Writes one device's rows as newline-delimited JSON objects.
///
/// Keys follow schema column order. With gzip enabled each flush appends one
/// gzip member, so the file reads back with a multi-member decoder.
pub struct NdjsonSink {
    path: PathBuf,
    gzip: bool,
    columns: Option<Vec<String>>,
    buf: Vec<u8>,
}

impl NdjsonSink {
    pub fn new(cfg: &NdjsonConfig, device_id: u32) -> Self {
        let gzip = cfg.compression == "gzip";
        let ext = if gzip { "ndjson.gz" } else { "ndjson" };
        let path = cfg
            .output_dir
            .join(format!("device_{device_id}"))
            .join(format!("{}.{ext}", cfg.file_name));

        Self {
            path,
            gzip,
            columns: None,
            buf: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        "ndjson"
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the device directory and truncates the output file.
    pub async fn create_schema(&mut self, schema: &RowSchema) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }

        tokio::fs::write(&self.path, b"")
            .await
            .with_context(|| format!("truncating {}", self.path.display()))?;

        self.columns = Some(schema.columns().iter().map(|c| c.name.clone()).collect());

        Ok(())
    }

    pub async fn insert_rows(&mut self, rows: &[OutputRow]) -> Result<()> {
        let Some(columns) = self.columns.as_deref() else {
            bail!("insert into {} before create_schema", self.path.display());
        };

        for row in rows {
            let record = RowRecord {
                columns,
                cells: row.cells(),
            };
            serde_json::to_writer(&mut self.buf, &record).context("serializing row to JSON")?;
            self.buf.push(b'\n');
        }

        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }

        let raw = std::mem::take(&mut self.buf);
        let raw_len = raw.len();
        let data = if self.gzip {
            compress_gzip(&raw).context("compressing NDJSON data")?
        } else {
            raw
        };

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening {}", self.path.display()))?;
        file.write_all(&data)
            .await
            .with_context(|| format!("writing {}", self.path.display()))?;
        file.flush().await.context("flushing NDJSON file")?;

        tracing::debug!(
            path = %self.path.display(),
            bytes = raw_len,
            written = data.len(),
            "flushed NDJSON rows",
        );

        Ok(())
    }
}

/// One row as a JSON object keyed by column name.
struct RowRecord<'a> {
    columns: &'a [String],
    cells: Vec<Cell>,
}

impl Serialize for RowRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (name, cell) in self.columns.iter().zip(&self.cells) {
            map.serialize_entry(name, cell)?;
        }
        map.end()
    }
}

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).context("gzip write")?;
    encoder.finish().context("gzip finish")
}
