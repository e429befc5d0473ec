#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{integer, sales_warehouse, table_exists, RecordingWarehouse};
use sqlbatch::{
    BatchError, ResultSet, Runner, ServerSideOptions, ServerSideRunner, Step, StepRecorder,
    SubsetSpec, Teardown, Value,
};

fn eu_subset() -> SubsetSpec {
    SubsetSpec::new("sales", Some("region = 'EU'"), "sales_eu")
}

fn count_query(job_id: usize, year: i64) -> String {
    format!(
        "INSERT INTO {{output}} (job_id, query_type, table_name, record_count, sequence_num, status) \
         SELECT {job_id}, 'count', '{{subset}}', COUNT(*), 1, 'ok' FROM {{subset}} WHERE year = {year}"
    )
}

#[test]
fn sqlite_run_walks_every_step_and_returns_combined_output() {
    let (_dir, warehouse) = sales_warehouse("pipeline");
    let recorder = Arc::new(StepRecorder::new());
    let runner = ServerSideRunner::new(warehouse.clone(), eu_subset(), ServerSideOptions::default())
        .observer(recorder.clone());

    let queries = vec![count_query(2, 2024), count_query(1, 2023)];
    let output = runner.run(&queries, true).expect("run");
    let result = output.into_combined().expect("combined output");

    assert_eq!(
        recorder.steps(),
        vec![
            Step::Validate,
            Step::EnsureDriverTable,
            Step::EnsureOutputTable,
            Step::EnsureStoredProcedure,
            Step::CreateSubset,
            Step::LoadDriverTable,
            Step::ExecuteServerSide,
            Step::FetchResults,
        ]
    );
    assert_eq!(result.len(), 2);
    let job_ids: Vec<i64> = result.column("job_id").expect("job_id").map(integer).collect();
    assert_eq!(job_ids, vec![1, 2]);
    let counts: Vec<i64> = result
        .column("record_count")
        .expect("record_count")
        .map(integer)
        .collect();
    assert_eq!(counts, vec![1, 2]);
    let tables: Vec<&Value> = result.column("table_name").expect("table_name").collect();
    assert_eq!(tables[0], &Value::Text("sales_eu".into()));
}

#[test]
fn run_scoped_teardown_drops_driver_and_procedure_only() {
    let (_dir, warehouse) = sales_warehouse("run_scoped");
    let recorder = Arc::new(StepRecorder::new());
    let runner = ServerSideRunner::new(warehouse.clone(), eu_subset(), ServerSideOptions::default())
        .observer(recorder.clone());
    runner.run(&[count_query(1, 2024)], true).expect("run");

    let names = recorder.last_names().expect("names");
    assert!(names.driver.starts_with("batch_driver_"));
    assert!(!table_exists(&warehouse, &names.driver));
    assert!(table_exists(&warehouse, "batch_output"));
    assert!(table_exists(&warehouse, "sales_eu"));

    let mut session = sqlbatch::Warehouse::connect(&warehouse).expect("connect");
    let err = sqlbatch::Session::call_procedure(&mut session, &names.procedure).unwrap_err();
    assert!(err.to_string().contains("does not exist"));
}

#[test]
fn keep_teardown_leaves_everything_in_place() {
    let (_dir, warehouse) = sales_warehouse("keep");
    let recorder = Arc::new(StepRecorder::new());
    let runner = ServerSideRunner::new(warehouse.clone(), eu_subset(), ServerSideOptions::default())
        .teardown(Teardown::Keep)
        .observer(recorder.clone());
    runner.run(&[count_query(1, 2024)], true).expect("run");

    let names = recorder.last_names().expect("names");
    assert!(table_exists(&warehouse, &names.driver));
    assert!(table_exists(&warehouse, "batch_output"));
}

#[test]
fn repeated_keep_runs_replace_one_driver_and_procedure() {
    let (_dir, warehouse) = sales_warehouse("keep_twice");
    let recorder = Arc::new(StepRecorder::new());
    let runner = ServerSideRunner::new(warehouse.clone(), eu_subset(), ServerSideOptions::default())
        .teardown(Teardown::Keep)
        .observer(recorder.clone());
    runner.run(&[count_query(1, 2024)], true).expect("first run");
    runner.run(&[count_query(1, 2023)], false).expect("second run");

    let names = recorder.last_names().expect("names");
    assert_eq!(names.driver, "batch_driver");
    assert_eq!(names.procedure, "batch_runner");
    assert!(table_exists(&warehouse, "batch_driver"));

    let mut session = sqlbatch::Warehouse::connect(&warehouse).expect("connect");
    let tables = sqlbatch::Session::query(
        &mut session,
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'batch_driver%'",
    )
    .expect("tables");
    assert_eq!(integer(&tables.rows[0][0]), 1);
    let procedures = sqlbatch::Session::query(
        &mut session,
        "SELECT COUNT(*) FROM _sqlbatch_procedures WHERE name LIKE 'batch_runner%'",
    )
    .expect("procedures");
    assert_eq!(integer(&procedures.rows[0][0]), 1);
    let driver = sqlbatch::Session::query(&mut session, "SELECT COUNT(*) FROM batch_driver")
        .expect("driver rows");
    assert_eq!(integer(&driver.rows[0][0]), 1);
}

#[test]
fn all_teardown_drops_output_and_materialised_subset() {
    let (_dir, warehouse) = sales_warehouse("all");
    let runner = ServerSideRunner::new(warehouse.clone(), eu_subset(), ServerSideOptions::default())
        .teardown(Teardown::All);
    let result = runner
        .run(&[count_query(1, 2024)], true)
        .expect("run")
        .into_combined()
        .expect("combined");
    assert_eq!(result.len(), 1);
    assert!(!table_exists(&warehouse, "batch_output"));
    assert!(!table_exists(&warehouse, "sales_eu"));
}

#[test]
fn overlapping_runs_use_distinct_run_scoped_names() {
    let (_dir, warehouse) = sales_warehouse("overlap");
    let runner = ServerSideRunner::new(warehouse, eu_subset(), ServerSideOptions::default());
    let first = runner.resource_names();
    let second = runner.resource_names();
    assert_ne!(first.driver, second.driver);
    assert_ne!(first.procedure, second.procedure);
    assert_eq!(first.output, second.output);
}

#[test]
fn validation_fails_before_touching_the_warehouse() {
    let warehouse = RecordingWarehouse::new();
    let recorder = Arc::new(StepRecorder::new());
    let runner = ServerSideRunner::new(warehouse.clone(), eu_subset(), ServerSideOptions::default())
        .observer(recorder.clone());
    let queries = vec![
        "INSERT INTO batch_output (job_id) SELECT 1 FROM sales_eu".to_string(),
        "INSERT INTO batch_output (job_id) SELECT 2 FROM sales".to_string(),
    ];

    let err = runner.run(&queries, true).unwrap_err();
    assert!(matches!(err, BatchError::Validation { job_id: 2, .. }));
    assert_eq!(warehouse.connects(), 0);
    assert!(recorder.steps().is_empty());
}

#[test]
fn teradata_statements_run_in_pipeline_order() {
    let warehouse = RecordingWarehouse::new();
    let recorder = Arc::new(StepRecorder::new());
    let runner = ServerSideRunner::new(warehouse.clone(), eu_subset(), ServerSideOptions::default())
        .observer(recorder.clone());
    let queries = vec![
        "INSERT INTO batch_output (job_id) SELECT 1 FROM sales_eu".to_string(),
        "INSERT INTO batch_output (job_id) SELECT 2 FROM sales_eu WHERE region = 'EU'".to_string(),
    ];
    runner.run(&queries, false).expect("run");
    let names = recorder.last_names().expect("names");

    let order = [
        format!("CREATE TABLE {} (job_id INTEGER, sql_text VARCHAR(31000))", names.driver),
        "CREATE TABLE batch_output (job_id INTEGER".to_string(),
        format!("REPLACE PROCEDURE {}()", names.procedure),
        format!("INSERT INTO {} (job_id, sql_text) VALUES (1, ", names.driver),
        format!(
            "INSERT INTO {} (job_id, sql_text) VALUES (2, 'INSERT INTO batch_output (job_id) SELECT 2 FROM sales_eu WHERE region = ''EU''')",
            names.driver
        ),
        format!("CALL {}()", names.procedure),
        "SELECT * FROM batch_output ORDER BY job_id, sequence_num".to_string(),
        format!("DROP PROCEDURE {}", names.procedure),
        format!("DROP TABLE {}", names.driver),
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|fragment| {
            warehouse
                .last_position(fragment)
                .unwrap_or_else(|| panic!("missing statement {fragment}"))
        })
        .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]), "{positions:?}");
    assert_eq!(warehouse.count_matching("CREATE TABLE sales_eu"), 0);
    assert_eq!(warehouse.count_matching("DROP TABLE batch_output"), 1);
    assert_eq!(warehouse.connects(), 1);
}

#[test]
fn non_conditional_drop_of_missing_table_is_tolerated() {
    let warehouse = RecordingWarehouse::new()
        .fail_on("DROP TABLE batch_driver_")
        .fail_on("DROP TABLE batch_output")
        .answer_with(ResultSet::new(vec!["job_id".into()], vec![vec![Value::Integer(1)]]));
    let runner = ServerSideRunner::new(warehouse.clone(), eu_subset(), ServerSideOptions::default());
    let result = runner
        .run(&["INSERT INTO batch_output (job_id) SELECT 1 FROM sales_eu".to_string()], false)
        .expect("run")
        .into_combined()
        .expect("combined");
    assert_eq!(result.len(), 1);
}

#[test]
fn failed_call_still_tears_down_run_scoped_objects() {
    let warehouse = RecordingWarehouse::new().fail_on("CALL batch_runner_");
    let recorder = Arc::new(StepRecorder::new());
    let runner = ServerSideRunner::new(warehouse.clone(), eu_subset(), ServerSideOptions::default())
        .observer(recorder.clone());
    let err = runner
        .run(&["INSERT INTO batch_output (job_id) SELECT 1 FROM sales_eu".to_string()], false)
        .unwrap_err();

    assert!(err.to_string().contains("injected failure"));
    assert_eq!(recorder.steps().last(), Some(&Step::LoadDriverTable));
    assert_eq!(warehouse.count_matching("DROP PROCEDURE batch_runner_"), 1);
    let call = warehouse.position("CALL batch_runner_").expect("call");
    let drop = warehouse.position("DROP PROCEDURE batch_runner_").expect("drop");
    assert!(call < drop);
}
