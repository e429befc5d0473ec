#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use common::{integer, sales_warehouse, RecordingWarehouse};
use sqlbatch::{
    select_runner, BatchStats, FixedSessionLimit, KeywordScorer, Runner, RunnerKind,
    SchedulerConfig, Scorer, SubsetSpec,
};

fn subset() -> SubsetSpec {
    SubsetSpec::new("sales", Some("year = 2024"), "sales_2024")
}

fn kind_for(queries: &[String], config: &SchedulerConfig) -> RunnerKind {
    select_runner(
        RecordingWarehouse::new(),
        subset(),
        queries,
        config,
        &FixedSessionLimit::new(4),
        &KeywordScorer,
    )
    .kind()
}

fn copies(sql: &str, n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("{sql} -- job {i}")).collect()
}

/// Doubles every score, so nothing stays sequential.
struct Pessimist;

impl Scorer for Pessimist {
    fn estimate_cost(&self, sql: &str) -> u32 {
        2 * sqlbatch::estimate_cost(sql) + 2
    }

    fn estimate_spool_risk(&self, sql: &str) -> u32 {
        2 * sqlbatch::estimate_spool_risk(sql)
    }
}

#[test]
fn three_filtered_lookups_run_sequentially() {
    let queries = copies("SELECT region FROM sales_2024 WHERE amount > 5", 3);
    assert_eq!(kind_for(&queries, &SchedulerConfig::default()), RunnerKind::Sequential);
}

#[test]
fn eight_grouped_aggregations_run_in_parallel() {
    let queries = copies(
        "SELECT region, SUM(amount) FROM sales_2024 WHERE amount > 0 GROUP BY region",
        8,
    );
    assert_eq!(kind_for(&queries, &SchedulerConfig::default()), RunnerKind::Parallel);
}

#[test]
fn thirty_unfiltered_aggregations_go_server_side() {
    let queries = copies("SELECT region, COUNT(*) FROM sales_2024 GROUP BY region", 30);
    assert_eq!(kind_for(&queries, &SchedulerConfig::default()), RunnerKind::ServerSide);
}

#[test]
fn empty_batch_selects_sequential() {
    assert_eq!(kind_for(&[], &SchedulerConfig::default()), RunnerKind::Sequential);
}

#[test]
fn configured_thresholds_change_the_decision() {
    let queries = copies("SELECT region, COUNT(*) FROM sales_2024 GROUP BY region", 30);
    let config = SchedulerConfig::from_toml(
        r#"
        [selection]
        parallel_max_avg_spool_risk = 3.0
        parallel_session_multiple = 8
        "#,
    )
    .expect("config");
    assert_eq!(kind_for(&queries, &config), RunnerKind::Parallel);
}

#[test]
fn custom_scorer_drives_selection() {
    let queries = copies("SELECT region FROM sales_2024 WHERE amount > 5", 3);
    let stats = BatchStats::collect(&queries, &Pessimist, 4);
    assert_eq!(stats.max_cost, 2);

    let runner = select_runner(
        RecordingWarehouse::new(),
        subset(),
        &queries,
        &SchedulerConfig::default(),
        &FixedSessionLimit::new(4),
        &Pessimist,
    );
    assert_eq!(runner.kind(), RunnerKind::Parallel);
}

#[test]
fn selected_runner_executes_against_sqlite() {
    let (_dir, warehouse) = sales_warehouse("selected");
    let queries = vec![
        "SELECT region FROM sales_2024 WHERE amount > 15 ORDER BY region".to_string(),
        "SELECT amount FROM sales_2024 WHERE region = 'APAC'".to_string(),
    ];
    let runner = select_runner(
        warehouse,
        subset(),
        &queries,
        &SchedulerConfig::default(),
        &FixedSessionLimit::new(4),
        &KeywordScorer,
    );
    assert_eq!(runner.kind(), RunnerKind::Sequential);

    let results = runner
        .run(&queries, true)
        .expect("run")
        .into_per_query()
        .expect("per-query output");
    assert_eq!(results[0].len(), 2);
    assert_eq!(integer(&results[1].rows[0][0]), 7);
}
