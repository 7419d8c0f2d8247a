pub mod discover;
pub mod file;
pub mod tables;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::metrics::{CounterFormulaDeriver, MetricDeriver, MetricProfile, Topology};
use crate::pmu::record::WireFormat;
use crate::pmu::stats::{Diagnostic, DiagnosticStats};
use crate::row::{OutputRow, RowBuilder, RowSchema, RunContext};
use crate::sink::{self, ClickHouseWriter, Sink};

pub use self::discover::{capture_files, discover_devices, DeviceInput};
pub use self::file::{DeviceProcessor, FileError, FileOutput, Stage};
pub use self::tables::DeviceTables;

/// Files queued between the core and the sinks of one device.
const FILE_QUEUE_DEPTH: usize = 2;

/// Immutable run parameters shared by every device worker.
pub struct RunSettings {
    pub format: WireFormat,
    pub topology: Topology,
    pub profile: MetricProfile,
    pub schema: RowSchema,
    pub deriver: Box<dyn MetricDeriver>,
}

impl RunSettings {
    pub fn new(format: WireFormat, topology: Topology, profile: MetricProfile) -> Self {
        let schema = RowSchema::from_profile(&profile);
        Self {
            format,
            topology,
            profile,
            schema,
            deriver: Box::new(CounterFormulaDeriver),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Ok(Self::new(cfg.wire_format()?, cfg.topology, cfg.metric_profile()?))
    }

    /// Replaces the default counter-formula deriver.
    pub fn with_deriver(mut self, deriver: Box<dyn MetricDeriver>) -> Self {
        self.deriver = deriver;
        self
    }
}

/// Outcome of one device run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSummary {
    pub device_id: u32,
    pub files_processed: usize,
    pub files_failed: usize,
    pub rows: u64,
    /// Slaves never matched by a master by the end of the run.
    pub pending_slaves: usize,
    pub cancelled: bool,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub devices: Vec<DeviceSummary>,
    pub devices_failed: usize,
}

impl RunSummary {
    pub fn rows(&self) -> u64 {
        self.devices.iter().map(|d| d.rows).sum()
    }
}

struct FileBatch {
    path: PathBuf,
    rows: Vec<OutputRow>,
}

/// Processes one device's files in order and writes their rows to `sinks`.
///
/// The sequential core runs on a blocking thread and hands each file's rows
/// to this task, which inserts them into every sink and flushes. Once
/// `cancel` fires no further file is started.
pub async fn run_device(
    device: DeviceInput,
    settings: Arc<RunSettings>,
    mut sinks: Vec<Sink>,
    cancel: CancellationToken,
) -> Result<DeviceSummary> {
    let device_id = device.device_id;

    for sink in &mut sinks {
        sink.create_schema(&settings.schema)
            .await
            .with_context(|| format!("creating {} schema for device {device_id}", sink.name()))?;
    }

    let stats = Arc::new(DiagnosticStats::new());
    let (tx, mut rx) = mpsc::channel::<FileBatch>(FILE_QUEUE_DEPTH);

    let core = {
        let settings = Arc::clone(&settings);
        let stats = Arc::clone(&stats);
        tokio::task::spawn_blocking(move || process_device(&device, &settings, &stats, &tx, &cancel))
    };

    let mut emitted = 0u64;
    while let Some(batch) = rx.recv().await {
        for sink in &mut sinks {
            sink.insert_rows(&batch.rows).await.with_context(|| {
                format!("writing rows of {} to {}", batch.path.display(), sink.name())
            })?;
            sink.flush()
                .await
                .with_context(|| format!("flushing {}", sink.name()))?;
        }

        emitted += batch.rows.len() as u64;
        stats.record_n(Diagnostic::RowsEmitted, batch.rows.len() as u64);
        debug!(
            device_id,
            file = %batch.path.display(),
            rows = batch.rows.len(),
            stage = %Stage::Done,
            "file emitted"
        );
    }

    let mut summary = core
        .await
        .with_context(|| format!("device {device_id} worker panicked"))??;
    summary.rows = emitted;

    let counts = stats.snapshot();
    let counts: Vec<String> = counts.iter().map(|(d, n)| format!("{d}={n}")).collect();
    info!(
        device_id,
        files = summary.files_processed,
        failed = summary.files_failed,
        rows = summary.rows,
        pending_slaves = summary.pending_slaves,
        diagnostics = %counts.join(" "),
        "device complete"
    );

    Ok(summary)
}

fn process_device(
    device: &DeviceInput,
    settings: &RunSettings,
    stats: &DiagnosticStats,
    tx: &mpsc::Sender<FileBatch>,
    cancel: &CancellationToken,
) -> Result<DeviceSummary> {
    let device_id = device.device_id;
    let tables = DeviceTables::load(device_id, &device.host_task_map, &device.task_shapes)
        .with_context(|| format!("loading tables for device {device_id}"))?;

    let ctx = RunContext {
        topology: &settings.topology,
        profile: &settings.profile,
        shapes: &tables.shapes,
        host_map: &tables.host_map,
        deriver: settings.deriver.as_ref(),
    };
    let builder = RowBuilder::new(ctx, &settings.schema);
    let mut processor = DeviceProcessor::new(settings.format, builder, stats);

    let mut summary = DeviceSummary {
        device_id,
        ..Default::default()
    };

    for path in &device.files {
        if cancel.is_cancelled() {
            info!(device_id, "cancelled, not starting further files");
            summary.cancelled = true;
            break;
        }

        match processor.process_file(path) {
            Ok(out) => {
                summary.files_processed += 1;
                stats.record(Diagnostic::FilesProcessed);
                let batch = FileBatch {
                    path: path.clone(),
                    rows: out.rows,
                };
                if tx.blocking_send(batch).is_err() {
                    // Receiver gone: a sink failed and the device is aborting.
                    break;
                }
            }
            Err(e) => {
                summary.files_failed += 1;
                stats.record(Diagnostic::FilesFailed);
                warn!(device_id, file = %path.display(), error = %e, "skipping file");
            }
        }
    }

    summary.pending_slaves = processor.pending_slaves();
    Ok(summary)
}

/// Runs every discovered device, at most `cfg.workers` at a time.
pub async fn run(cfg: &Config, cancel: CancellationToken) -> Result<RunSummary> {
    let settings = Arc::new(RunSettings::from_config(cfg)?);
    let devices = discover_devices(&cfg.input)?;
    info!(
        devices = devices.len(),
        format = %settings.format,
        columns = settings.schema.len(),
        "discovered devices"
    );

    let mut clickhouse = None;
    if cfg.sinks.clickhouse.enabled {
        let mut writer = ClickHouseWriter::new(cfg.sinks.clickhouse.clone());
        writer.start().await?;
        clickhouse = Some(writer);
    }

    let semaphore = Arc::new(Semaphore::new(cfg.workers));
    let mut workers = JoinSet::new();

    for device in devices {
        let sinks = sink::device_sinks(&cfg.sinks, clickhouse.as_ref(), device.device_id);
        let settings = Arc::clone(&settings);
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.clone();

        workers.spawn(async move {
            let device_id = device.device_id;
            let _permit = semaphore
                .acquire_owned()
                .await
                .context("worker semaphore closed")?;
            run_device(device, settings, sinks, cancel)
                .await
                .with_context(|| format!("device {device_id}"))
        });
    }

    let mut summary = RunSummary::default();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(device)) => summary.devices.push(device),
            Ok(Err(e)) => {
                summary.devices_failed += 1;
                warn!(error = %format!("{e:#}"), "device failed");
            }
            Err(e) => {
                summary.devices_failed += 1;
                warn!(error = %e, "device worker join failed");
            }
        }
    }
    summary.devices.sort_by_key(|d| d.device_id);

    if let Some(mut writer) = clickhouse {
        writer.stop().await?;
    }

    Ok(summary)
}
