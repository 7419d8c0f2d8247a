use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::InputConfig;

/// Capture files and lookup table paths of one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInput {
    pub device_id: u32,
    pub dir: PathBuf,
    /// Capture files in ascending sequence-suffix order.
    pub files: Vec<PathBuf>,
    pub host_task_map: PathBuf,
    pub task_shapes: PathBuf,
}

/// Finds `<root>/device_<id>` directories and their capture files, ordered by
/// device id.
pub fn discover_devices(input: &InputConfig) -> Result<Vec<DeviceInput>> {
    let entries = std::fs::read_dir(&input.root)
        .with_context(|| format!("listing input root {}", input.root.display()))?;

    let mut devices = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("reading {}", input.root.display()))?;
        let name = entry.file_name();
        let Some(device_id) = name.to_str().and_then(parse_device_dir) else {
            continue;
        };
        if !input.devices.is_empty() && !input.devices.contains(&device_id) {
            continue;
        }

        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }

        let files = capture_files(&dir, &input.file_prefix)?;
        devices.push(DeviceInput {
            device_id,
            host_task_map: dir.join(&input.host_task_map),
            task_shapes: dir.join(&input.task_shapes),
            dir,
            files,
        });
    }

    devices.sort_by_key(|d| d.device_id);
    Ok(devices)
}

/// Lists `dir`'s files named `<prefix>...<n>`, ordered by `n`.
pub fn capture_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("listing device dir {}", dir.display()))?;

    let mut files: Vec<(u64, String, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("reading {}", dir.display()))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !name.starts_with(prefix) {
            continue;
        }
        let Some(seq) = sequence_suffix(&name[prefix.len()..]) else {
            debug!(file = %name, "skipping capture file without numeric suffix");
            continue;
        };
        let path = entry.path();
        if path.is_file() {
            files.push((seq, name, path));
        }
    }

    files.sort();
    Ok(files.into_iter().map(|(_, _, p)| p).collect())
}

fn parse_device_dir(name: &str) -> Option<u32> {
    name.strip_prefix("device_")?.parse().ok()
}

/// Trailing decimal digits of `rest`, which must be separated from what
/// precedes them by `.`, `_` or `-`, or make up all of `rest`.
fn sequence_suffix(rest: &str) -> Option<u64> {
    let digits_start = rest
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    let (head, digits) = rest.split_at(digits_start);
    if !head.is_empty() && !head.ends_with(['.', '_', '-']) {
        return None;
    }
    digits.parse().ok()
}
