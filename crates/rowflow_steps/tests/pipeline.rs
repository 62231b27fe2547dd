//! End-to-end pipelines built from the built-in steps.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use rowflow_core::{Row, Value};
use rowflow_plan::{StepMeta, TransMeta};
use rowflow_runtime::{
    ExternalError, RowCollector, StepStatus, Trans, TransError, TransResult, TransStatus,
};
use rowflow_steps::{
    SequenceProvider, SequenceProviders, builtin_registry, builtin_registry_with_providers, kinds,
};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn id_grid(name: &str, ids: &[i64]) -> StepMeta {
    let rows: Vec<Vec<String>> = ids.iter().map(|id| vec![id.to_string()]).collect();
    StepMeta::new(name, kinds::DATA_GRID).with_config(json!({
        "fields": [{ "name": "id", "type": "Integer" }],
        "rows": rows
    }))
}

fn keyed_grid(name: &str, origin: &str, rows: &[(i64, &str)]) -> StepMeta {
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|(id, value)| vec![id.to_string(), (*value).to_string(), origin.to_string()])
        .collect();
    StepMeta::new(name, kinds::DATA_GRID).with_config(json!({
        "fields": [
            { "name": "id", "type": "Integer" },
            { "name": "name", "type": "String" },
            { "name": "origin", "type": "String" }
        ],
        "rows": rows
    }))
}

fn sequence(name: &str, config: serde_json::Value) -> StepMeta {
    StepMeta::new(name, kinds::ADD_SEQUENCE).with_config(config)
}

/// Run `meta`, collecting what copy 0 of `step` writes
fn run_collecting(meta: TransMeta, step: &str) -> (TransResult, Arc<RowCollector>) {
    run_with(Trans::new(meta, builtin_registry()), step)
}

fn run_with(mut trans: Trans, step: &str) -> (TransResult, Arc<RowCollector>) {
    trans.prepare_execution().unwrap();
    let collector = Arc::new(RowCollector::new());
    trans.add_row_listener(step, 0, collector.clone()).unwrap();
    trans.start_threads().unwrap();
    (trans.wait_until_finished(), collector)
}

fn column(rows: &[Row], index: usize) -> Vec<Value> {
    rows.iter().map(|r| r[index].clone()).collect()
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::Integer).collect()
}

fn strs(values: &[&str]) -> Vec<Value> {
    values.iter().copied().map(Value::from).collect()
}

// AddSequence

#[test]
fn test_sequence_wraps_at_maximum() {
    init_tracing();
    let mut meta = TransMeta::new("wrap");
    meta.add_step(id_grid("grid", &[1, 2, 3, 4, 5])).unwrap();
    meta.add_step(sequence(
        "seq",
        json!({ "value_name": "seq", "start_at": "10", "increment_by": "5", "max_value": "20" }),
    ))
    .unwrap();
    meta.add_step(StepMeta::new("out", kinds::DUMMY)).unwrap();
    meta.add_hop("grid", "seq").unwrap();
    meta.add_hop("seq", "out").unwrap();

    let (result, collector) = run_collecting(meta, "seq");

    assert!(!result.is_failed());
    assert_eq!(column(&collector.rows(), 1), ints(&[10, 15, 20, 10, 15]));
    assert_eq!(collector.schema().unwrap().field_names(), vec!["id", "seq"]);
    assert_eq!(result.lines_read("out"), 5);
}

#[test]
fn test_sequence_counter_removed_after_run() {
    let mut meta = TransMeta::new("cleanup");
    meta.add_step(id_grid("grid", &[1])).unwrap();
    meta.add_step(sequence("seq", json!({ "value_name": "seq" }))).unwrap();
    meta.add_hop("grid", "seq").unwrap();

    let mut trans = Trans::new(meta, builtin_registry());
    trans.prepare_execution().unwrap();
    assert!(trans.counters().get_counter("@@sequence:seq").is_some());
    trans.start_threads().unwrap();
    trans.wait_until_finished();
    assert!(trans.counters().get_counter("@@sequence:seq").is_none());
}

#[test]
fn test_sequence_settings_use_variables() {
    let mut meta = TransMeta::new("vars");
    meta.set_variable("START", "100");
    meta.add_step(id_grid("grid", &[1, 2])).unwrap();
    meta.add_step(sequence(
        "seq",
        json!({ "value_name": "seq", "start_at": "${START}", "increment_by": "%%STEP%%" }),
    ))
    .unwrap();
    meta.set_variable("STEP", "-1");
    meta.add_hop("grid", "seq").unwrap();

    let (_, collector) = run_collecting(meta, "seq");
    assert_eq!(column(&collector.rows(), 1), ints(&[100, 99]));
}

#[test]
fn test_sequence_shared_between_copies() {
    init_tracing();
    let ids: Vec<i64> = (1..=40).collect();
    let mut meta = TransMeta::new("shared").with_row_set_size(3);
    meta.add_step(id_grid("grid", &ids)).unwrap();
    let seq = sequence("seq", json!({ "value_name": "seq", "counter_name": "shared" }));
    meta.add_step(seq.with_copies(3)).unwrap();
    meta.add_step(StepMeta::new("out", kinds::DUMMY)).unwrap();
    meta.add_hop("grid", "seq").unwrap();
    meta.add_hop("seq", "out").unwrap();

    let (result, collector) = run_collecting(meta, "out");

    assert!(!result.is_failed());
    let mut values: Vec<i64> = column(&collector.rows(), 1)
        .into_iter()
        .filter_map(|v| match v {
            Value::Integer(i) => Some(i),
            _ => None,
        })
        .collect();
    values.sort_unstable();
    assert_eq!(values, ids);
}

#[test]
fn test_sequence_counter_mismatch_fails_init() {
    init_tracing();
    let mut meta = TransMeta::new("mismatch");
    meta.add_step(id_grid("grid", &[1, 2])).unwrap();
    meta.add_step(sequence("seq_a", json!({ "counter_name": "c", "increment_by": "1" })))
        .unwrap();
    meta.add_step(sequence("seq_b", json!({ "counter_name": "c", "increment_by": "2" })))
        .unwrap();
    meta.add_hop("grid", "seq_a").unwrap();
    meta.add_hop("grid", "seq_b").unwrap();

    let mut trans = Trans::new(meta, builtin_registry());
    match trans.prepare_execution() {
        Err(TransError::InitFailed { steps }) => {
            assert_eq!(steps.len(), 1);
            assert!(steps[0] == "seq_a.0" || steps[0] == "seq_b.0");
        }
        other => panic!("expected init failure, got {other:?}"),
    }
    assert_eq!(trans.step_handle("grid", 0).unwrap().status(), StepStatus::Disposed);
    assert!(trans.counters().get_counter("@@sequence:c").is_none());
}

#[test]
fn test_sequence_bad_setting_fails_init() {
    let mut meta = TransMeta::new("bad");
    meta.add_step(id_grid("grid", &[1])).unwrap();
    meta.add_step(sequence("seq", json!({ "start_at": "one" }))).unwrap();
    meta.add_hop("grid", "seq").unwrap();

    let mut trans = Trans::new(meta, builtin_registry());
    assert!(matches!(trans.execute(), Err(TransError::InitFailed { .. })));
}

struct FlakyProvider {
    calls: AtomicI64,
}

impl SequenceProvider for FlakyProvider {
    fn next_value(&self, sequence: &str) -> Result<i64, ExternalError> {
        let value = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if value % 3 == 0 {
            Err(format!("sequence {sequence} unavailable").into())
        } else {
            Ok(value)
        }
    }
}

fn flaky_registry() -> rowflow_runtime::StepRegistry {
    let mut providers = SequenceProviders::new();
    providers.insert(
        "db".to_string(),
        Arc::new(FlakyProvider {
            calls: AtomicI64::new(0),
        }),
    );
    builtin_registry_with_providers(providers)
}

fn provider_pipeline(with_error_hop: bool) -> TransMeta {
    let mut meta = TransMeta::new("provider");
    meta.add_step(id_grid("grid", &[1, 2, 3, 4, 5, 6])).unwrap();
    meta.add_step(sequence(
        "seq",
        json!({
            "value_name": "seq",
            "mode": "provider",
            "provider": "db",
            "sequence_name": "SEQ_ID"
        }),
    ))
    .unwrap();
    meta.add_step(StepMeta::new("out", kinds::DUMMY)).unwrap();
    meta.add_hop("grid", "seq").unwrap();
    meta.add_hop("seq", "out").unwrap();
    if with_error_hop {
        meta.add_step(StepMeta::new("errors", kinds::DUMMY)).unwrap();
        meta.add_error_hop("seq", "errors").unwrap();
    }
    meta
}

#[test]
fn test_sequence_provider_errors_redirected() {
    init_tracing();
    let trans = Trans::new(provider_pipeline(true), flaky_registry());
    let (result, collector) = run_with(trans, "seq");

    assert!(!result.is_failed());
    assert_eq!(column(&collector.rows(), 1), ints(&[1, 2, 4, 5]));
    let errors = collector.error_rows();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0][4], Value::from("ADDSEQ001"));
    assert_eq!(errors[0][3], Value::from("seq"));
    assert_eq!(result.step("seq")[0].lines_rejected, 2);
    assert_eq!(result.lines_read("errors"), 2);
}

#[test]
fn test_sequence_provider_error_without_hop_is_fatal() {
    init_tracing();
    let trans = Trans::new(provider_pipeline(false), flaky_registry());
    let (result, _) = run_with(trans, "seq");

    assert!(result.is_failed());
    assert!(result.first_error.unwrap().contains("SEQ_ID unavailable"));
}

#[test]
fn test_sequence_unknown_provider_fails_init() {
    let mut trans = Trans::new(provider_pipeline(false), builtin_registry());
    assert!(matches!(trans.execute(), Err(TransError::InitFailed { .. })));
}

// MergeRows

fn merge_pipeline(merge_config: serde_json::Value) -> TransMeta {
    let mut meta = TransMeta::new("merge");
    meta.add_step(keyed_grid("reference", "ref", &[(1, "a"), (2, "b"), (4, "d")]))
        .unwrap();
    meta.add_step(keyed_grid("compare", "cmp", &[(1, "a"), (2, "x"), (3, "c")]))
        .unwrap();
    meta.add_step(StepMeta::new("merge", kinds::MERGE_ROWS).with_config(merge_config))
        .unwrap();
    meta.add_hop("reference", "merge").unwrap();
    meta.add_hop("compare", "merge").unwrap();
    meta
}

fn merge_config() -> serde_json::Value {
    json!({
        "reference_step": "reference",
        "compare_step": "compare",
        "flag_field": "flag",
        "keys": ["id"],
        "values": ["name"]
    })
}

#[test]
fn test_merge_rows_flags() {
    init_tracing();
    let (result, collector) = run_collecting(merge_pipeline(merge_config()), "merge");

    assert!(!result.is_failed());
    let rows = collector.rows();
    assert_eq!(column(&rows, 0), ints(&[1, 2, 3, 4]));
    assert_eq!(
        column(&rows, 3),
        strs(&["identical", "changed", "new", "deleted"])
    );
    // changed rows come from compare, deleted rows from reference
    assert_eq!(column(&rows, 1), strs(&["a", "x", "c", "d"]));
    assert_eq!(
        collector.schema().unwrap().field_names(),
        vec!["id", "name", "origin", "flag"]
    );
}

#[test]
fn test_merge_rows_identical_source() {
    let (_, collector) = run_collecting(merge_pipeline(merge_config()), "merge");
    assert_eq!(collector.rows()[0][2], Value::from("cmp"));

    let mut config = merge_config();
    config["identical_source"] = json!("reference");
    let (_, collector) = run_collecting(merge_pipeline(config), "merge");
    assert_eq!(collector.rows()[0][2], Value::from("ref"));

    let mut meta = merge_pipeline(merge_config());
    meta.set_variable(rowflow_steps::USE_REFERENCE_WHEN_IDENTICAL, "Y");
    let (_, collector) = run_collecting(meta, "merge");
    assert_eq!(collector.rows()[0][2], Value::from("ref"));
}

#[test]
fn test_merge_rows_empty_reference() {
    let mut meta = TransMeta::new("merge");
    meta.add_step(keyed_grid("reference", "ref", &[])).unwrap();
    meta.add_step(keyed_grid("compare", "cmp", &[(1, "a"), (2, "b")]))
        .unwrap();
    meta.add_step(StepMeta::new("merge", kinds::MERGE_ROWS).with_config(merge_config()))
        .unwrap();
    meta.add_hop("reference", "merge").unwrap();
    meta.add_hop("compare", "merge").unwrap();

    let (result, collector) = run_collecting(meta, "merge");
    assert!(!result.is_failed());
    assert_eq!(column(&collector.rows(), 3), strs(&["new", "new"]));
}

#[test]
fn test_merge_rows_missing_input_fails_init() {
    let mut config = merge_config();
    config["compare_step"] = json!("elsewhere");
    let mut trans = Trans::new(merge_pipeline(config), builtin_registry());
    match trans.prepare_execution() {
        Err(TransError::InitFailed { steps }) => assert_eq!(steps, vec!["merge.0".to_string()]),
        other => panic!("expected init failure, got {other:?}"),
    }
}

#[test]
fn test_merge_rows_rejects_multi_copy_input() {
    let mut meta = TransMeta::new("merge");
    meta.add_step(keyed_grid("reference", "ref", &[(1, "a"), (2, "b")]).with_copies(2))
        .unwrap();
    meta.add_step(keyed_grid("compare", "cmp", &[(1, "a"), (2, "b")]))
        .unwrap();
    meta.add_step(StepMeta::new("merge", kinds::MERGE_ROWS).with_config(merge_config()))
        .unwrap();
    meta.add_hop("reference", "merge").unwrap();
    meta.add_hop("compare", "merge").unwrap();

    let mut trans = Trans::new(meta, builtin_registry());
    match trans.prepare_execution() {
        Err(TransError::InitFailed { steps }) => assert_eq!(steps, vec!["merge.0".to_string()]),
        other => panic!("expected init failure, got {other:?}"),
    }
}

#[test]
fn test_merge_rows_emits_nothing_after_stop() {
    init_tracing();
    let mut meta = TransMeta::new("merge");
    meta.add_step(keyed_grid("reference", "ref", &[(1, "a"), (2, "b")]))
        .unwrap();
    meta.add_step(keyed_grid("source", "cmp", &[(1, "a"), (2, "b")]))
        .unwrap();
    let abort = StepMeta::new("compare", kinds::ABORT).with_config(json!({ "row_threshold": "0" }));
    meta.add_step(abort).unwrap();
    meta.add_step(StepMeta::new("merge", kinds::MERGE_ROWS).with_config(merge_config()))
        .unwrap();
    meta.add_hop("reference", "merge").unwrap();
    meta.add_hop("source", "compare").unwrap();
    meta.add_hop("compare", "merge").unwrap();

    let (result, collector) = run_collecting(meta, "merge");

    assert!(result.is_failed());
    assert!(result.first_error.as_ref().unwrap().contains("Row nr 1 causing abort"));
    assert!(collector.rows().is_empty());
    assert_eq!(result.lines_written("merge"), 0);
}

#[test]
fn test_merge_rows_unknown_key_is_fatal() {
    init_tracing();
    let mut config = merge_config();
    config["keys"] = json!(["missing"]);
    let (result, _) = run_collecting(merge_pipeline(config), "merge");

    assert!(result.is_failed());
    assert!(result.first_error.unwrap().contains("missing"));
}

#[test]
fn test_merge_rows_incompatible_streams_fail() {
    init_tracing();
    let mut meta = TransMeta::new("merge");
    meta.add_step(keyed_grid("reference", "ref", &[(1, "a")])).unwrap();
    meta.add_step(
        StepMeta::new("compare", kinds::DATA_GRID).with_config(json!({
            "fields": [
                { "name": "id", "type": "Integer" },
                { "name": "name", "type": "String" }
            ],
            "rows": [["1", "a"]]
        })),
    )
    .unwrap();
    meta.add_step(StepMeta::new("merge", kinds::MERGE_ROWS).with_config(merge_config()))
        .unwrap();
    meta.add_hop("reference", "merge").unwrap();
    meta.add_hop("compare", "merge").unwrap();

    let (result, collector) = run_collecting(meta, "merge");
    assert!(result.is_failed());
    assert!(collector.rows().is_empty());
}

// StepsMetrics

#[test]
fn test_steps_metrics_reports_each_target() {
    init_tracing();
    let mut meta = TransMeta::new("metrics");
    meta.add_step(id_grid("grid", &[1, 2, 3])).unwrap();
    meta.add_step(StepMeta::new("pass", kinds::DUMMY)).unwrap();
    meta.add_step(StepMeta::new("end", kinds::DUMMY)).unwrap();
    meta.add_step(StepMeta::new("metrics", kinds::STEPS_METRICS).with_config(json!({
        "targets": [{ "step": "grid" }, { "step": "pass", "copy": 0 }, { "step": "end" }]
    })))
    .unwrap();
    meta.add_hop("grid", "pass").unwrap();
    meta.add_hop("pass", "end").unwrap();

    let (result, collector) = run_collecting(meta, "metrics");

    assert!(!result.is_failed());
    let rows = collector.rows();
    assert_eq!(rows.len(), 3);
    let schema = collector.schema().unwrap();
    let name = schema.index_of("stepname").unwrap();
    let read = schema.index_of("linesread").unwrap();
    let written = schema.index_of("lineswritten").unwrap();

    let pass = rows.iter().find(|r| r[name] == Value::from("pass")).unwrap();
    assert_eq!(pass[read], Value::Integer(3));
    assert_eq!(pass[written], Value::Integer(3));
    let grid = rows.iter().find(|r| r[name] == Value::from("grid")).unwrap();
    assert_eq!(grid[schema.index_of("stepid").unwrap()], Value::from("DataGrid"));
    assert_eq!(grid[schema.index_of("linesinput").unwrap()], Value::Integer(3));
}

fn metrics_init_error(targets: serde_json::Value, downstream: bool) -> TransError {
    let mut meta = TransMeta::new("metrics");
    meta.add_step(id_grid("grid", &[1])).unwrap();
    meta.add_step(StepMeta::new("metrics", kinds::STEPS_METRICS).with_config(json!({
        "targets": targets
    })))
    .unwrap();
    meta.add_step(StepMeta::new("after", kinds::DUMMY)).unwrap();
    if downstream {
        meta.add_hop("metrics", "after").unwrap();
    }
    let mut trans = Trans::new(meta, builtin_registry());
    trans.prepare_execution().unwrap_err()
}

#[test]
fn test_steps_metrics_rejects_self() {
    let err = metrics_init_error(json!([{ "step": "metrics" }]), false);
    assert!(matches!(err, TransError::InitFailed { .. }));
}

#[test]
fn test_steps_metrics_rejects_downstream() {
    let err = metrics_init_error(json!([{ "step": "after" }]), true);
    assert!(matches!(err, TransError::InitFailed { .. }));
}

#[test]
fn test_steps_metrics_rejects_unknown() {
    let err = metrics_init_error(json!([{ "step": "ghost" }]), false);
    assert!(matches!(err, TransError::InitFailed { .. }));
    let err = metrics_init_error(json!([{ "step": "grid", "copy": 3 }]), false);
    assert!(matches!(err, TransError::InitFailed { .. }));
}

// Shutdown

#[test]
fn test_abort_stops_every_step() {
    init_tracing();
    let mut meta = TransMeta::new("abort").with_row_set_size(10);
    meta.add_step(StepMeta::new("gen", kinds::ROW_GENERATOR).with_config(json!({
        "limit": "1000000",
        "fields": [{ "name": "greeting", "type": "String", "value": "hello" }]
    })))
    .unwrap();
    meta.add_step(StepMeta::new("abort", kinds::ABORT).with_config(json!({ "row_threshold": "5" })))
        .unwrap();
    meta.add_step(StepMeta::new("out", kinds::DUMMY)).unwrap();
    meta.add_hop("gen", "abort").unwrap();
    meta.add_hop("abort", "out").unwrap();

    let mut trans = Trans::new(meta, builtin_registry());
    trans.execute().unwrap();
    let result = trans.wait_until_finished();

    assert!(result.is_failed());
    assert_eq!(result.errors, 1);
    assert!(result.stopped);
    assert!(result.first_error.as_deref().unwrap().contains("Row nr 6 causing abort"));
    assert_eq!(result.step("abort")[0].status, StepStatus::Failed);
    assert_eq!(result.step("gen")[0].status, StepStatus::Stopped);
    assert!(result.lines_written("gen") < 1_000_000);
    assert!(result.lines_read("out") <= 5);
    assert_eq!(trans.status(), TransStatus::FinishedWithErrors);
    for step in ["gen", "abort", "out"] {
        let handle = trans.step_handle(step, 0).unwrap();
        assert_eq!(handle.status(), StepStatus::Disposed, "{step}");
    }
}

#[test]
fn test_row_generator_and_json_definition() {
    init_tracing();
    let meta: TransMeta = serde_json::from_value(json!({
        "name": "from json",
        "variables": { "ROWS": "4" },
        "steps": {
            "gen": {
                "name": "gen",
                "kind": "RowGenerator",
                "config": {
                    "limit": "${ROWS}",
                    "fields": [{ "name": "n", "type": "Number", "value": "1.5" }]
                }
            },
            "copy": { "name": "copy", "kind": "Dummy", "copies": 2 }
        },
        "hops": [{ "from": "gen", "to": "copy" }]
    }))
    .unwrap();

    let mut trans = Trans::new(meta, builtin_registry());
    trans.execute().unwrap();
    let result = trans.wait_until_finished();

    assert!(!result.is_failed());
    assert_eq!(result.lines_written("gen"), 4);
    assert_eq!(result.lines_read("copy"), 4);
    assert_eq!(result.step("copy").len(), 2);
    let serialized = serde_json::to_value(&result).unwrap();
    assert_eq!(serialized["trans"], json!("from json"));
}
