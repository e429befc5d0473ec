//! Binary entry point for the sqlbatch command line.
#![forbid(unsafe_code)]

mod ui;

use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sqlbatch::{
    build_runner, read_queries, select_runner, select_strategy, BatchStats,
    ConfiguredSessionLimit, CostEstimate, FixedSessionLimit, KeywordScorer, RunOutput, Runner,
    RunnerKind, SchedulerConfig, Scorer, SessionLimitProbe, SqliteWarehouse, SubsetSpec,
};
use tracing_subscriber::EnvFilter;

use ui::{format_duration, ColorChoice, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "sqlbatch",
    version,
    about = "Cost-aware batch runner for warehouse aggregation queries",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Scheduler configuration (defaults to <config dir>/sqlbatch/config.toml)"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for reports"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = ColorArg::Auto,
        help = "When to color text reports"
    )]
    color: ColorArg,

    #[arg(long, global = true, help = "Print plain output without decorations")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Score a batch and show the strategy that would run it")]
    Plan(PlanCmd),
    #[command(about = "Run a batch against a SQLite warehouse file")]
    Run(RunCmd),
}

#[derive(Args, Debug)]
struct PlanCmd {
    #[arg(long, value_name = "FILE", help = "File of ;-terminated queries")]
    queries: PathBuf,

    #[arg(long, value_name = "N", help = "Override the session limit")]
    session_limit: Option<usize>,
}

#[derive(Args, Debug)]
struct RunCmd {
    #[arg(long, value_name = "FILE", help = "SQLite database acting as the warehouse")]
    db: PathBuf,

    #[arg(long, value_name = "TABLE", help = "Base table the subset is cut from")]
    base: String,

    #[arg(long, value_name = "PREDICATE", help = "Filter applied to the base table")]
    filter: Option<String>,

    #[arg(long, value_name = "TABLE", help = "Name of the subset table")]
    subset: String,

    #[arg(long, value_name = "FILE", help = "File of ;-terminated queries")]
    queries: PathBuf,

    #[arg(long, help = "Materialise the subset table before running")]
    materialise: bool,

    #[arg(long, value_enum, default_value_t = StrategyArg::Auto)]
    strategy: StrategyArg,

    #[arg(long, value_name = "N", help = "Override the session limit")]
    session_limit: Option<usize>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ColorArg {
    Auto,
    Always,
    Never,
}

impl From<ColorArg> for ColorChoice {
    fn from(color: ColorArg) -> Self {
        match color {
            ColorArg::Auto => ColorChoice::Auto,
            ColorArg::Always => ColorChoice::Always,
            ColorArg::Never => ColorChoice::Never,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum StrategyArg {
    Auto,
    Sequential,
    Parallel,
    #[value(name = "server-side")]
    ServerSide,
}

impl StrategyArg {
    fn forced(self) -> Option<RunnerKind> {
        match self {
            StrategyArg::Auto => None,
            StrategyArg::Sequential => Some(RunnerKind::Sequential),
            StrategyArg::Parallel => Some(RunnerKind::Parallel),
            StrategyArg::ServerSide => Some(RunnerKind::ServerSide),
        }
    }
}

#[derive(Serialize)]
struct QueryPlan {
    job_id: usize,
    cost: u32,
    spool_risk: u32,
}

#[derive(Serialize)]
struct PlanReport {
    strategy: RunnerKind,
    stats: BatchStats,
    queries: Vec<QueryPlan>,
}

#[derive(Serialize)]
struct RunReport {
    strategy: RunnerKind,
    queries: usize,
    elapsed_ms: u64,
    output: RunOutput,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SchedulerConfig::load(path)?,
        None => SchedulerConfig::load_default()?,
    };
    let ui = Ui::new(cli.color.into(), cli.quiet);

    match cli.command {
        Command::Plan(cmd) => {
            let report = plan(&cmd, &config)?;
            emit(cli.format, &report, || print_plan_text(&ui, &report))?;
        }
        Command::Run(cmd) => {
            let report = run_batch(&cmd, &config, &ui)?;
            emit(cli.format, &report, || print_run_text(&ui, &report))?;
        }
    }
    Ok(())
}

fn session_probe(
    config: &SchedulerConfig,
    override_limit: Option<usize>,
) -> Box<dyn SessionLimitProbe> {
    match override_limit {
        Some(limit) => Box::new(FixedSessionLimit::new(limit)),
        None => Box::new(ConfiguredSessionLimit::new(config.sessions.limit)),
    }
}

fn plan(cmd: &PlanCmd, config: &SchedulerConfig) -> Result<PlanReport, Box<dyn Error>> {
    let queries = read_queries(&cmd.queries)?;
    let probe = session_probe(config, cmd.session_limit);
    let estimates: Vec<CostEstimate> = queries
        .iter()
        .map(|sql| KeywordScorer.estimate(sql))
        .collect();
    let stats = BatchStats::from_estimates(&estimates, probe.session_limit());
    let strategy = select_strategy(&stats, &config.selection);
    let queries = estimates
        .iter()
        .enumerate()
        .map(|(idx, estimate)| QueryPlan {
            job_id: idx + 1,
            cost: estimate.cost,
            spool_risk: estimate.spool_risk,
        })
        .collect();
    Ok(PlanReport {
        strategy,
        stats,
        queries,
    })
}

fn run_batch(
    cmd: &RunCmd,
    config: &SchedulerConfig,
    ui: &Ui,
) -> Result<RunReport, Box<dyn Error>> {
    let queries = read_queries(&cmd.queries)?;
    let probe = session_probe(config, cmd.session_limit);
    let warehouse = SqliteWarehouse::open(&cmd.db);
    let subset = SubsetSpec::new(cmd.base.clone(), cmd.filter.as_deref(), cmd.subset.clone());
    let runner = match cmd.strategy.forced() {
        Some(kind) => build_runner(kind, warehouse, subset, config, probe.as_ref()),
        None => select_runner(
            warehouse,
            subset,
            &queries,
            config,
            probe.as_ref(),
            &KeywordScorer,
        ),
    };
    let strategy = runner.kind();

    let started = Instant::now();
    let task = ui.task(format!("running {} queries ({strategy})", queries.len()));
    let output = runner.run(&queries, cmd.materialise)?;
    task.finish();
    Ok(RunReport {
        strategy,
        queries: queries.len(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        output,
    })
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: FnOnce(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_plan_text(ui: &Ui, report: &PlanReport) {
    let stats = &report.stats;
    ui.section(
        "Batch",
        [
            ("strategy", report.strategy.to_string()),
            ("queries", stats.count.to_string()),
            ("max cost", stats.max_cost.to_string()),
            ("avg cost", format!("{:.2}", stats.avg_cost)),
            ("max spool risk", stats.max_spool_risk.to_string()),
            ("avg spool risk", format!("{:.2}", stats.avg_spool_risk)),
            ("session limit", stats.session_limit.to_string()),
        ],
    );
    ui.list(
        "Queries",
        report.queries.iter().map(|q| {
            format!(
                "#{} cost={} spool_risk={}",
                q.job_id, q.cost, q.spool_risk
            )
        }),
    );
}

fn print_run_text(ui: &Ui, report: &RunReport) {
    match &report.output {
        RunOutput::PerQuery(results) => {
            for (idx, result) in results.iter().enumerate() {
                ui.table(&format!("Query {}", idx + 1), result);
            }
        }
        RunOutput::Combined(result) => ui.table("Output", result),
    }
    let elapsed = format_duration(std::time::Duration::from_millis(report.elapsed_ms));
    ui.success(&format!(
        "{} queries ran {} in {elapsed}",
        report.queries, report.strategy
    ));
}
