use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use pmuscope::config::{Config, InputConfig, NdjsonConfig, SinksConfig};
use pmuscope::correlate::{HostTask, HostTaskMap};
use pmuscope::metrics::{
    CounterFormulaDeriver, EngineInput, MetricDeriver, MetricProfile, MetricSpec, TaskShapeEntry,
    TaskShapeTable, Topology,
};
use pmuscope::pipeline::{self, capture_files, DeviceInput, DeviceProcessor, RunSettings};
use pmuscope::pmu::encode::{encode_block, encode_context};
use pmuscope::pmu::stats::{Diagnostic, DiagnosticStats};
use pmuscope::pmu::{BlockSample, ContextSample, CounterSet, EngineKind, MixType, WireFormat};
use pmuscope::row::{OutputRow, RowBuilder, RowSchema, RunContext, TaskType};
use pmuscope::sink::{MemorySink, Sink};
use tokio_util::sync::CancellationToken;

const STREAM: u32 = 5;

fn topology() -> Topology {
    Topology {
        frequency_mhz: 1000.0,
        aic_core_num: 1,
        aiv_core_num: 1,
    }
}

fn profile() -> MetricProfile {
    MetricProfile {
        aic: vec![MetricSpec::new("mac_ratio", 0), MetricSpec::new("scalar_time", 1)],
        aiv: vec![MetricSpec::new("vec_ratio", 0), MetricSpec::new("c0", 0)],
    }
}

fn host_tasks(task_ids: &[u32]) -> Vec<HostTask> {
    task_ids
        .iter()
        .map(|&task_id| HostTask {
            task_id,
            stream_id: STREAM,
            batch_id: 0,
        })
        .collect()
}

fn shapes(task_ids: &[u32]) -> Vec<TaskShapeEntry> {
    task_ids
        .iter()
        .map(|&task_id| TaskShapeEntry {
            stream_id: STREAM,
            task_id,
            subtask_id: 0,
            block_dim: 1,
            mix_block_dim: 1,
        })
        .collect()
}

fn context(
    format: WireFormat,
    task_id: u32,
    engine: EngineKind,
    is_master: bool,
    is_mix: bool,
    total_cycle: u64,
    counters: &[u64],
) -> ContextSample {
    let mut values = vec![0u64; format.counter_width()];
    values[..counters.len()].copy_from_slice(counters);
    ContextSample {
        stream_id: 0,
        task_id,
        subtask_id: 0,
        subtask_type: 0,
        engine,
        is_master,
        is_mix,
        ffts_type: 4,
        start_time: 1_000 + u64::from(task_id),
        end_time: 2_000 + u64::from(task_id),
        total_cycle,
        counters: CounterSet::from_slice(&values),
        overflow: false,
    }
}

fn unified(task_id: u32, engine: EngineKind, master: bool, mix: bool, cycles: u64) -> Vec<u8> {
    let sample = context(
        WireFormat::Unified,
        task_id,
        engine,
        master,
        mix,
        cycles,
        &[cycles / 4, cycles / 2],
    );
    encode_context(WireFormat::Unified, &sample)
}

struct Harness {
    format: WireFormat,
    topology: Topology,
    profile: MetricProfile,
    shapes: TaskShapeTable,
    host_map: HostTaskMap,
    schema: RowSchema,
    stats: DiagnosticStats,
}

impl Harness {
    fn new(format: WireFormat, task_ids: &[u32]) -> Self {
        let profile = profile();
        let schema = RowSchema::from_profile(&profile);
        Self {
            format,
            topology: topology(),
            profile,
            shapes: TaskShapeTable::from_entries(shapes(task_ids)),
            host_map: HostTaskMap::from_entries(host_tasks(task_ids)),
            schema,
            stats: DiagnosticStats::new(),
        }
    }

    fn run(&self, data: &[u8]) -> Vec<OutputRow> {
        let ctx = RunContext {
            topology: &self.topology,
            profile: &self.profile,
            shapes: &self.shapes,
            host_map: &self.host_map,
            deriver: &CounterFormulaDeriver,
        };
        let mut processor =
            DeviceProcessor::new(self.format, RowBuilder::new(ctx, &self.schema), &self.stats);
        processor
            .process_buffer("pmu.data.0", data)
            .expect("file decodes")
            .rows
    }
}

#[test]
fn test_scenario_a_unpaired_masters_zero_partner_engine() {
    let harness = Harness::new(WireFormat::Unified, &[1, 2, 3]);
    let mut data = unified(1, EngineKind::Aic, true, false, 2_000);
    data.extend(unified(2, EngineKind::Aiv, true, false, 4_000));
    // Mixed master whose slave never arrived.
    data.extend(unified(3, EngineKind::Aic, true, true, 2_000));

    let rows = harness.run(&data);
    assert_eq!(rows.len(), 3);

    assert_eq!(rows[0].task_id, 1);
    assert_eq!(rows[0].stream_id, STREAM);
    assert_eq!(rows[0].aic_total_cycle, 2_000);
    assert_eq!(rows[0].aic_total_time, 2.0);
    assert_eq!(rows[0].aic_metrics(), &[0.25, 1.0]);
    assert_eq!(rows[0].aiv_total_cycle, 0);
    assert_eq!(rows[0].aiv_total_time, 0.0);
    assert_eq!(rows[0].aiv_metrics(), &[0.0, 0.0]);
    assert_eq!(rows[0].task_type, TaskType::AiCore);

    assert_eq!(rows[1].aic_total_cycle, 0);
    assert_eq!(rows[1].aic_metrics(), &[0.0, 0.0]);
    assert_eq!(rows[1].aiv_total_cycle, 4_000);
    assert_eq!(rows[1].aiv_metrics(), &[0.25, 1_000.0]);
    assert_eq!(rows[1].task_type, TaskType::AiVectorCore);

    assert_eq!(rows[2].aiv_total_cycle, 0);
    assert_eq!(rows[2].task_type, TaskType::AiCore);
}

#[test]
fn test_scenario_b_masters_paired_with_slaves() {
    let harness = Harness::new(WireFormat::Unified, &[1, 2]);
    let mut data = unified(1, EngineKind::Aiv, false, true, 8_000);
    data.extend(unified(1, EngineKind::Aic, true, true, 2_000));
    data.extend(unified(2, EngineKind::Aic, false, true, 6_000));
    data.extend(unified(2, EngineKind::Aiv, true, true, 4_000));

    let rows = harness.run(&data);
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].task_id, 1);
    assert_eq!(rows[0].aic_total_cycle, 2_000);
    assert_eq!(rows[0].aiv_total_cycle, 8_000);
    assert_eq!(rows[0].aiv_metrics(), &[0.25, 2_000.0]);
    assert_eq!(rows[0].task_type, TaskType::MixAic);

    // Master on AIV: its own data lands on the AIV side.
    assert_eq!(rows[1].task_id, 2);
    assert_eq!(rows[1].aic_total_cycle, 6_000);
    assert_eq!(rows[1].aiv_total_cycle, 4_000);
    assert_eq!(rows[1].aic_metrics(), &[0.25, 3.0]);
    assert_eq!(rows[1].task_type, TaskType::MixAiv);
}

#[test]
fn test_scenario_c_legacy_blocks_synthesize_partner() {
    let harness = Harness::new(WireFormat::Legacy, &[1]);
    let ctx = context(WireFormat::Legacy, 1, EngineKind::Aic, true, false, 2_000, &[500, 1_000]);
    let mut data = encode_context(WireFormat::Legacy, &ctx);
    for (core_id, cycles) in [10u64, 20, 30, 40].into_iter().enumerate() {
        let block = BlockSample {
            stream_id: 0,
            task_id: 1,
            subtask_id: 0,
            subtask_type: 0,
            core_id: core_id as u16,
            engine: EngineKind::Aic,
            mix_type: MixType::MixAic,
            ffts_type: 4,
            start_time: 0,
            end_time: 0,
            total_cycle: cycles,
            counters: CounterSet::from_slice(&[1; 8]),
            overflow: false,
        };
        data.extend(encode_block(&block));
    }

    let rows = harness.run(&data);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.aic_total_cycle, 2_000);
    assert_eq!(row.aiv_total_cycle, 100);
    // vec_ratio = 4 / 100, c0 = raw summed counter.
    assert_eq!(row.aiv_metrics(), &[0.04, 4.0]);
    assert_eq!(row.task_type, TaskType::MixAic);
}

#[test]
fn test_scenario_d_overflow_excluded_from_metrics() {
    let harness = Harness::new(WireFormat::Unified, &[1]);
    let mut overflowed = context(
        WireFormat::Unified,
        1,
        EngineKind::Aic,
        true,
        false,
        u64::MAX,
        &[u64::MAX, u64::MAX],
    );
    overflowed.overflow = true;

    let mut data = encode_context(WireFormat::Unified, &overflowed);
    for _ in 0..10 {
        data.extend(unified(1, EngineKind::Aic, true, false, 2_000));
    }

    let rows = harness.run(&data);
    assert_eq!(rows.len(), 10);
    for row in &rows {
        assert_eq!(row.aic_total_cycle, 2_000);
        assert_eq!(row.aic_total_time, 2.0);
        assert_eq!(row.aic_metrics(), &[0.25, 1.0]);
    }
    assert_eq!(harness.stats.get(Diagnostic::Overflowed), 1);
}

fn overflowed(task_id: u32, engine: EngineKind, master: bool) -> Vec<u8> {
    let mut sample = context(
        WireFormat::Unified,
        task_id,
        engine,
        master,
        true,
        u64::MAX,
        &[u64::MAX, u64::MAX],
    );
    sample.overflow = true;
    encode_context(WireFormat::Unified, &sample)
}

#[test]
fn test_scenario_d_mixed_overflowed_master_does_not_shift_pairing() {
    let harness = Harness::new(WireFormat::Unified, &[1]);
    let mut data = overflowed(1, EngineKind::Aic, true);
    data.extend(unified(1, EngineKind::Aiv, false, true, 1_000));
    for _ in 0..10 {
        data.extend(unified(1, EngineKind::Aic, true, true, 2_000));
        data.extend(unified(1, EngineKind::Aiv, false, true, 8_000));
    }

    let rows = harness.run(&data);
    assert_eq!(rows.len(), 10);
    for row in &rows {
        assert_eq!(row.aic_total_cycle, 2_000);
        assert_eq!(row.aic_metrics(), &[0.25, 1.0]);
        assert_eq!(row.aiv_total_cycle, 8_000);
        assert_eq!(row.aiv_metrics(), &[0.25, 2_000.0]);
        assert_eq!(row.task_type, TaskType::MixAic);
    }
    assert_eq!(harness.stats.get(Diagnostic::Overflowed), 1);
}

#[test]
fn test_scenario_d_mixed_overflowed_slave_stays_out_of_rows() {
    let harness = Harness::new(WireFormat::Unified, &[1]);
    let mut data = unified(1, EngineKind::Aic, true, true, 2_000);
    data.extend(overflowed(1, EngineKind::Aiv, false));
    for _ in 0..10 {
        data.extend(unified(1, EngineKind::Aic, true, true, 2_000));
        data.extend(unified(1, EngineKind::Aiv, false, true, 8_000));
    }

    let rows = harness.run(&data);
    assert_eq!(rows.len(), 11);
    assert_eq!(rows[0].aic_total_cycle, 2_000);
    assert_eq!(rows[0].aiv_total_cycle, 0);
    assert_eq!(rows[0].aiv_metrics(), &[0.0, 0.0]);
    for row in &rows[1..] {
        assert_eq!(row.aiv_total_cycle, 8_000);
        assert_eq!(row.aiv_metrics(), &[0.25, 2_000.0]);
    }
    assert!(rows.iter().all(|r| r.aic_total_cycle != u64::MAX && r.aiv_total_cycle != u64::MAX));
}

#[test]
fn test_rerun_is_identical() {
    let harness = Harness::new(WireFormat::Unified, &[1, 2]);
    let mut data = unified(1, EngineKind::Aiv, false, true, 8_000);
    data.extend(unified(1, EngineKind::Aic, true, true, 2_000));
    data.extend(unified(2, EngineKind::Aic, true, false, 2_000));

    assert_eq!(harness.run(&data), harness.run(&data));
}

// --- Device runs over files on disk ---

fn write_device(root: &Path, device_id: u32, files: &[(&str, Vec<u8>)], task_ids: &[u32]) {
    let dir = root.join(format!("device_{device_id}"));
    std::fs::create_dir_all(&dir).unwrap();
    for (name, data) in files {
        std::fs::write(dir.join(name), data).unwrap();
    }
    std::fs::write(
        dir.join("host_task_map.json"),
        serde_json::to_string(
            &task_ids
                .iter()
                .map(|t| serde_json::json!({"task_id": t, "stream_id": STREAM}))
                .collect::<Vec<_>>(),
        )
        .unwrap(),
    )
    .unwrap();
    std::fs::write(
        dir.join("task_shapes.json"),
        serde_json::to_string(
            &task_ids
                .iter()
                .map(|t| {
                    serde_json::json!({"stream_id": STREAM, "task_id": t, "block_dim": 1, "mix_block_dim": 1})
                })
                .collect::<Vec<_>>(),
        )
        .unwrap(),
    )
    .unwrap();
}

fn input(root: &Path) -> InputConfig {
    InputConfig {
        root: root.to_path_buf(),
        ..Default::default()
    }
}

#[test]
fn test_capture_files_sorted_by_numeric_suffix() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("device_0");
    std::fs::create_dir_all(&dir).unwrap();
    for name in ["pmu.data.10", "pmu.data.2", "pmu.data.0", "pmu.data.1", "pmu.data.done", "other.3"] {
        std::fs::write(dir.join(name), b"").unwrap();
    }

    let files = capture_files(&dir, "pmu.data").unwrap();
    let names: Vec<String> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["pmu.data.0", "pmu.data.1", "pmu.data.2", "pmu.data.10"]);
}

#[test]
fn test_discover_devices_filters_and_orders() {
    let root = tempfile::tempdir().unwrap();
    for id in [3, 0, 12] {
        write_device(root.path(), id, &[("pmu.data.0", Vec::new())], &[]);
    }
    std::fs::create_dir_all(root.path().join("host")).unwrap();

    let all = pipeline::discover_devices(&input(root.path())).unwrap();
    let ids: Vec<u32> = all.iter().map(|d| d.device_id).collect();
    assert_eq!(ids, vec![0, 3, 12]);

    let mut only = input(root.path());
    only.devices = vec![12];
    let some = pipeline::discover_devices(&only).unwrap();
    assert_eq!(some.len(), 1);
    assert_eq!(some[0].device_id, 12);
    assert_eq!(some[0].files.len(), 1);
}

fn device_input(root: &Path, device_id: u32) -> DeviceInput {
    pipeline::discover_devices(&input(root))
        .unwrap()
        .into_iter()
        .find(|d| d.device_id == device_id)
        .expect("device discovered")
}

fn settings() -> Arc<RunSettings> {
    Arc::new(RunSettings::new(WireFormat::Unified, topology(), profile()))
}

#[tokio::test]
async fn test_run_device_pairs_across_files_and_skips_bad_file() {
    let root = tempfile::tempdir().unwrap();
    write_device(
        root.path(),
        0,
        &[
            ("pmu.data.0", unified(1, EngineKind::Aic, true, false, 2_000)),
            ("pmu.data.1", unified(2, EngineKind::Aiv, false, true, 8_000)),
            ("pmu.data.2", vec![0u8; 100]),
            ("pmu.data.10", unified(2, EngineKind::Aic, true, true, 2_000)),
        ],
        &[1, 2],
    );

    let memory = MemorySink::new();
    let summary = pipeline::run_device(
        device_input(root.path(), 0),
        settings(),
        vec![Sink::Memory(memory.clone())],
        CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(summary.files_processed, 3);
    assert_eq!(summary.files_failed, 1);
    assert_eq!(summary.rows, 2);
    assert_eq!(summary.pending_slaves, 0);

    let rows = memory.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].task_id, 1);
    assert_eq!(rows[1].task_id, 2);
    assert_eq!(rows[1].aiv_total_cycle, 8_000);
    assert_eq!(rows[1].task_type, TaskType::MixAic);
}

/// Reports the engine's total time for every metric.
struct TimeEverywhere;

impl MetricDeriver for TimeEverywhere {
    fn derive(&self, input: &EngineInput<'_>, metrics: &[MetricSpec], out: &mut Vec<f64>) {
        out.extend(metrics.iter().map(|_| input.total_time_us));
    }
}

#[tokio::test]
async fn test_custom_deriver_replaces_counter_formulas() {
    let root = tempfile::tempdir().unwrap();
    write_device(
        root.path(),
        0,
        &[("pmu.data.0", unified(1, EngineKind::Aic, true, false, 2_000))],
        &[1],
    );

    let settings = RunSettings::new(WireFormat::Unified, topology(), profile())
        .with_deriver(Box::new(TimeEverywhere));
    let memory = MemorySink::new();
    pipeline::run_device(
        device_input(root.path(), 0),
        Arc::new(settings),
        vec![Sink::Memory(memory.clone())],
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let rows = memory.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].aic_metrics(), &[2.0, 2.0]);
    assert_eq!(rows[0].aiv_metrics(), &[0.0, 0.0]);
}

#[tokio::test]
async fn test_cancelled_device_starts_no_files() {
    let root = tempfile::tempdir().unwrap();
    write_device(
        root.path(),
        0,
        &[("pmu.data.0", unified(1, EngineKind::Aic, true, false, 2_000))],
        &[1],
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let memory = MemorySink::new();
    let summary = pipeline::run_device(
        device_input(root.path(), 0),
        settings(),
        vec![Sink::Memory(memory.clone())],
        cancel,
    )
    .await
    .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.files_processed, 0);
    assert!(memory.rows().is_empty());
}

#[tokio::test]
async fn test_run_writes_gzip_ndjson_per_device() {
    let root = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_device(
        root.path(),
        0,
        &[
            ("pmu.data.0", unified(1, EngineKind::Aic, true, false, 2_000)),
            ("pmu.data.1", unified(1, EngineKind::Aic, true, false, 4_000)),
        ],
        &[1],
    );
    write_device(
        root.path(),
        1,
        &[("pmu.data.0", unified(7, EngineKind::Aiv, true, false, 2_000))],
        &[],
    );

    let cfg = Config {
        input: input(root.path()),
        topology: topology(),
        sinks: SinksConfig {
            ndjson: NdjsonConfig {
                enabled: true,
                output_dir: out.path().to_path_buf(),
                file_name: "rows".to_string(),
                compression: "gzip".to_string(),
            },
            ..Default::default()
        },
        ..Default::default()
    };
    cfg.validate().unwrap();

    let summary = pipeline::run(&cfg, CancellationToken::new()).await.unwrap();
    assert_eq!(summary.devices.len(), 2);
    assert_eq!(summary.devices_failed, 0);
    assert_eq!(summary.rows(), 3);

    let read = |device_id: u32| -> Vec<String> {
        let path = out
            .path()
            .join(format!("device_{device_id}"))
            .join("rows.ndjson.gz");
        let file = std::fs::File::open(path).unwrap();
        let mut text = String::new();
        flate2::read::MultiGzDecoder::new(file)
            .read_to_string(&mut text)
            .unwrap();
        text.lines().map(str::to_string).collect()
    };

    let lines = read(0);
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("{\"aic_total_time\":"));
    let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(first["stream_id"], STREAM);
    assert_eq!(first["task_type"], "AI_CORE");
    let second: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(second["aic_total_cycle"], 4_000);

    // No host map for device 1: stream id stays at the sentinel.
    let lines = read(1);
    assert_eq!(lines.len(), 1);
    let row: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(row["stream_id"], u64::from(u32::MAX));
    assert_eq!(row["task_type"], "AI_VECTOR_CORE");
}
