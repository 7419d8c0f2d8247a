use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::correlate::{HostTask, HostTaskMap};
use crate::metrics::{TaskShapeEntry, TaskShapeTable};

/// Per-device lookup tables, loaded once before the device's first file.
#[derive(Debug, Clone, Default)]
pub struct DeviceTables {
    pub host_map: HostTaskMap,
    pub shapes: TaskShapeTable,
}

impl DeviceTables {
    pub fn load(device_id: u32, host_task_map: &Path, task_shapes: &Path) -> Result<Self> {
        let host: Vec<HostTask> = load_json_table(device_id, host_task_map, "host task map")?;
        let shapes: Vec<TaskShapeEntry> = load_json_table(device_id, task_shapes, "task shapes")?;

        let tables = Self {
            host_map: HostTaskMap::from_entries(host),
            shapes: TaskShapeTable::from_entries(shapes),
        };

        info!(
            device_id,
            host_tasks = tables.host_map.len(),
            task_shapes = tables.shapes.len(),
            "loaded device tables"
        );

        Ok(tables)
    }
}

/// Reads a JSON array file. A missing file is an empty table.
fn load_json_table<T: DeserializeOwned>(device_id: u32, path: &Path, what: &str) -> Result<Vec<T>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(device_id, path = %path.display(), "{what} file not found, using an empty table");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("reading {what} {}", path.display()));
        }
    };

    serde_json::from_slice(&data).with_context(|| format!("parsing {what} {}", path.display()))
}
