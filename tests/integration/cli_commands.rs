#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use common::{db_path, seed_sales};
use serde_json::Value;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    db: PathBuf,
    config: PathBuf,
}

impl Fixture {
    fn new(name: &str) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let db = db_path(&dir, name);
        seed_sales(&db).expect("seed sales");
        let config = dir.path().join("config.toml");
        fs::write(&config, "").expect("write config");
        Self { dir, db, config }
    }

    fn queries(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).expect("write queries");
        path
    }
}

#[test]
fn plan_reports_scores_and_strategy_as_json() {
    let fx = Fixture::new("plan");
    let queries = fx.queries(
        "plan.sql",
        "-- regional totals\n\
         SELECT region, SUM(amount) FROM sales_eu WHERE year = 2024 GROUP BY region;\n\
         SELECT COUNT(*) FROM sales_eu WHERE amount > 5;\n",
    );
    let output = cargo_bin_cmd!("sqlbatch")
        .arg("--config")
        .arg(&fx.config)
        .args(["--format", "json", "plan", "--session-limit", "4", "--queries"])
        .arg(&queries)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["strategy"], "parallel");
    assert_eq!(json["stats"]["count"], 2);
    assert_eq!(json["stats"]["max_cost"], 3);
    assert_eq!(json["stats"]["session_limit"], 4);
    assert_eq!(json["queries"][0]["job_id"], 1);
    assert_eq!(json["queries"][1]["cost"], 1);
}

#[test]
fn plan_text_output_names_the_strategy() {
    let fx = Fixture::new("plan_text");
    let queries = fx.queries("cheap.sql", "SELECT region FROM sales_eu WHERE year = 2024;\n");
    let output = cargo_bin_cmd!("sqlbatch")
        .arg("--config")
        .arg(&fx.config)
        .args(["--color", "never", "plan", "--queries"])
        .arg(&queries)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("strategy: sequential"), "{text}");
    assert!(text.contains("#1 cost=0 spool_risk=0"), "{text}");
}

#[test]
fn run_materialises_subset_and_returns_per_query_results() {
    let fx = Fixture::new("run");
    let queries = fx.queries(
        "run.sql",
        "SELECT COUNT(*) AS n FROM sales_eu WHERE year = 2024;\n\
         SELECT SUM(amount) AS total FROM sales_eu WHERE year = 2023;\n",
    );
    let output = cargo_bin_cmd!("sqlbatch")
        .arg("--config")
        .arg(&fx.config)
        .args(["--format", "json", "run", "--db"])
        .arg(&fx.db)
        .args(["--base", "sales", "--filter", "region = 'EU'", "--subset", "sales_eu"])
        .arg("--queries")
        .arg(&queries)
        .arg("--materialise")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["strategy"], "sequential");
    assert_eq!(json["output"]["kind"], "per-query");
    assert_eq!(json["output"]["results"][0]["rows"][0][0], 2);
    assert_eq!(json["output"]["results"][1]["columns"][0], "total");
    assert_eq!(json["output"]["results"][1]["rows"][0][0], 10);
}

#[test]
fn run_auto_selects_parallel_for_moderate_aggregations() {
    let fx = Fixture::new("run_parallel");
    let queries = fx.queries(
        "agg.sql",
        "SELECT region, SUM(amount) AS total FROM sales_eu WHERE year = 2024 GROUP BY region; \
         SELECT COUNT(*) AS n FROM sales_eu WHERE amount > 5;\n",
    );
    let output = cargo_bin_cmd!("sqlbatch")
        .arg("--config")
        .arg(&fx.config)
        .args(["--format", "json", "run", "--session-limit", "4", "--db"])
        .arg(&fx.db)
        .args(["--base", "sales", "--filter", "region = 'EU'", "--subset", "sales_eu"])
        .arg("--queries")
        .arg(&queries)
        .arg("--materialise")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["strategy"], "parallel");
    assert_eq!(json["queries"], 2);
    assert_eq!(json["output"]["results"][0]["rows"][0][1], 25);
    assert_eq!(json["output"]["results"][1]["rows"][0][0], 2);
}

#[test]
fn run_forced_server_side_returns_combined_output() {
    let fx = Fixture::new("server_side");
    let queries = fx.queries(
        "server.sql",
        "INSERT INTO {output} (job_id, table_name, record_count) \
         SELECT 1, '{subset}', COUNT(*) FROM {subset};\n",
    );
    let output = cargo_bin_cmd!("sqlbatch")
        .arg("--config")
        .arg(&fx.config)
        .args(["--format", "json", "run", "--strategy", "server-side", "--db"])
        .arg(&fx.db)
        .args(["--base", "sales", "--subset", "sales_all", "--materialise"])
        .arg("--queries")
        .arg(&queries)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["strategy"], "server-side");
    assert_eq!(json["output"]["kind"], "combined");
    assert_eq!(json["output"]["results"]["rows"][0][0], 1);
    assert_eq!(json["output"]["results"]["rows"][0][4], 6);
}

#[test]
fn run_failure_exits_with_error_message() {
    let fx = Fixture::new("failure");
    let queries = fx.queries("missing.sql", "SELECT COUNT(*) FROM sales_missing WHERE 1 = 1;\n");
    let assert = cargo_bin_cmd!("sqlbatch")
        .arg("--config")
        .arg(&fx.config)
        .args(["--quiet", "run", "--db"])
        .arg(&fx.db)
        .args(["--base", "sales", "--subset", "sales_missing"])
        .arg("--queries")
        .arg(&queries)
        .assert()
        .failure()
        .code(1);
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(stderr.contains("error: query 1 failed"), "{stderr}");
}

#[test]
fn invalid_config_is_rejected() {
    let fx = Fixture::new("bad_config");
    fs::write(&fx.config, "[parallel]\nmax_workers = 0\n").expect("write config");
    let queries = fx.queries("q.sql", "SELECT 1;\n");
    let assert = cargo_bin_cmd!("sqlbatch")
        .arg("--config")
        .arg(&fx.config)
        .args(["plan", "--queries"])
        .arg(&queries)
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).into_owned();
    assert!(stderr.contains("invalid configuration"), "{stderr}");
}
