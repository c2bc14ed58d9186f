#![forbid(unsafe_code)]

use std::env;
use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use fc_coord::exec_atomic;
use fc_runtime::{Batch, Commands, LocalConnection, SharedStore, unix_time_ms};
use hdrhistogram::Histogram;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// How the "record a page view" workload reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    /// Five separate commands.
    Direct,
    /// The same five commands in one atomic batch.
    Batched,
}

const STRATEGIES: [Strategy; 2] = [Strategy::Direct, Strategy::Batched];

impl Strategy {
    const fn as_str(self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Batched => "batched",
        }
    }

    fn run_once(self, conn: &mut LocalConnection, view: &View<'_>) -> Result<(), String> {
        let outcome = match self {
            Strategy::Direct => record_view_direct(conn, view),
            Strategy::Batched => record_view_batched(conn, view),
        };
        outcome.map_err(|err| format!("{} workload failed: {err}", self.as_str()))
    }
}

const RECENT_VIEWS_KEPT: i64 = 25;

struct View<'a> {
    token: &'a str,
    user: &'a str,
    item: &'a str,
    now_ms: f64,
}

fn record_view_direct(conn: &mut LocalConnection, view: &View<'_>) -> fc_coord::Result<()> {
    let viewed = format!("viewed:{}", view.token);
    conn.set(&format!("login:{}", view.token), view.user, None)?;
    conn.zadd("recent:", view.token, view.now_ms)?;
    conn.zadd(&viewed, view.item, view.now_ms)?;
    conn.zremrangebyrank(&viewed, 0, -(RECENT_VIEWS_KEPT + 1))?;
    conn.zincrby("viewed:", view.item, -1.0)?;
    Ok(())
}

fn record_view_batched(conn: &mut LocalConnection, view: &View<'_>) -> fc_coord::Result<()> {
    let viewed = format!("viewed:{}", view.token);
    let mut batch = Batch::new();
    batch
        .set(&format!("login:{}", view.token), view.user, None)
        .zadd("recent:", view.token, view.now_ms)
        .zadd(&viewed, view.item, view.now_ms)
        .zremrangebyrank(&viewed, 0, -(RECENT_VIEWS_KEPT + 1))
        .zincrby("viewed:", view.item, -1.0);
    exec_atomic(conn, batch)?;
    Ok(())
}

// ── CLI ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliArgs {
    strategies: Vec<Strategy>,
    duration: Duration,
    clients: usize,
}

fn usage() -> &'static str {
    "usage: fc-bench [--strategy direct|batched|all] [--duration-ms N] [--clients N]"
}

fn parse_strategy(raw: &str) -> Result<Vec<Strategy>, String> {
    if raw == "all" {
        return Ok(STRATEGIES.to_vec());
    }
    STRATEGIES
        .iter()
        .copied()
        .find(|strategy| strategy.as_str() == raw)
        .map(|strategy| vec![strategy])
        .ok_or_else(|| format!("invalid --strategy value '{raw}': expected direct|batched|all"))
}

fn parse_args(raw_args: Vec<String>) -> Result<Option<CliArgs>, String> {
    if raw_args.len() == 1 && matches!(raw_args[0].as_str(), "-h" | "--help") {
        return Ok(None);
    }

    let mut cli = CliArgs {
        strategies: STRATEGIES.to_vec(),
        duration: Duration::from_secs(1),
        clients: 1,
    };
    let mut idx = 0usize;
    while idx < raw_args.len() {
        let flag = raw_args[idx].as_str();
        let value = raw_args
            .get(idx + 1)
            .ok_or_else(|| format!("missing value after {flag}\n{}", usage()))?;
        match flag {
            "--strategy" => cli.strategies = parse_strategy(value)?,
            "--duration-ms" => {
                let ms = value
                    .parse::<u64>()
                    .map_err(|err| format!("invalid --duration-ms value '{value}': {err}"))?;
                cli.duration = Duration::from_millis(ms);
            }
            "--clients" => {
                cli.clients = value
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("invalid --clients value '{value}': expected N >= 1"))?;
            }
            other => return Err(format!("unknown argument: {other}\n{}", usage())),
        }
        idx += 2;
    }
    Ok(Some(cli))
}

// ── Reporting ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct StrategyReport {
    strategy: &'static str,
    clients: usize,
    operations: u64,
    elapsed_ms: u128,
    ops_per_sec: f64,
    latency_us: LatencySummary,
}

#[derive(Debug, Serialize)]
struct LatencySummary {
    min: u64,
    p50: u64,
    p90: u64,
    p99: u64,
    p999: u64,
    max: u64,
    mean: f64,
}

impl LatencySummary {
    fn from_histogram(hist: &Histogram<u64>) -> Self {
        Self {
            min: hist.min(),
            p50: hist.value_at_quantile(0.5),
            p90: hist.value_at_quantile(0.9),
            p99: hist.value_at_quantile(0.99),
            p999: hist.value_at_quantile(0.999),
            max: hist.max(),
            mean: hist.mean(),
        }
    }
}

fn new_histogram() -> Result<Histogram<u64>, String> {
    Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)
        .map_err(|err| format!("failed to create histogram: {err}"))
}

fn run_client(
    mut conn: LocalConnection,
    strategy: Strategy,
    client: usize,
    duration: Duration,
) -> Result<Histogram<u64>, String> {
    let mut hist = new_histogram()?;
    let user = format!("user{client}");
    let token = format!("token-{client}");
    let deadline = Instant::now() + duration;
    let mut n: u64 = 0;
    while Instant::now() < deadline {
        let item = format!("item{}", n % 100);
        #[allow(clippy::cast_precision_loss)]
        let view = View {
            token: &token,
            user: &user,
            item: &item,
            now_ms: unix_time_ms() as f64,
        };
        let started = Instant::now();
        strategy.run_once(&mut conn, &view)?;
        let micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        hist.saturating_record(micros.max(1));
        n += 1;
    }
    debug!(strategy = strategy.as_str(), client, operations = n, "client finished");
    Ok(hist)
}

fn run_strategy(strategy: Strategy, cli: &CliArgs) -> Result<StrategyReport, String> {
    let shared = SharedStore::new();
    let started = Instant::now();
    let workers: Vec<_> = (0..cli.clients)
        .map(|client| {
            let conn = shared.connect();
            let duration = cli.duration;
            thread::spawn(move || run_client(conn, strategy, client, duration))
        })
        .collect();

    let mut merged = new_histogram()?;
    for worker in workers {
        let hist = worker
            .join()
            .map_err(|_| format!("{} client thread panicked", strategy.as_str()))??;
        merged
            .add(&hist)
            .map_err(|err| format!("failed to merge histograms: {err}"))?;
    }
    let elapsed = started.elapsed();
    let operations = merged.len();
    #[allow(clippy::cast_precision_loss)]
    let ops_per_sec = operations as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    info!(strategy = strategy.as_str(), operations, ops_per_sec, "strategy complete");
    Ok(StrategyReport {
        strategy: strategy.as_str(),
        clients: cli.clients,
        operations,
        elapsed_ms: elapsed.as_millis(),
        ops_per_sec,
        latency_us: LatencySummary::from_histogram(&merged),
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<ExitCode, String> {
    let Some(cli) = parse_args(env::args().skip(1).collect())? else {
        println!("{}", usage());
        return Ok(ExitCode::SUCCESS);
    };
    let mut reports = Vec::with_capacity(cli.strategies.len());
    for strategy in &cli.strategies {
        reports.push(run_strategy(*strategy, &cli)?);
    }
    let json = serde_json::to_string_pretty(&reports)
        .map_err(|err| format!("failed to encode report: {err}"))?;
    println!("{json}");
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use fc_runtime::{Commands, SharedStore};

    use super::{CliArgs, Strategy, View, parse_args, parse_strategy};

    #[test]
    fn parse_args_defaults_to_every_strategy() {
        let parsed = parse_args(Vec::new()).expect("parse").expect("not help");
        assert_eq!(parsed.strategies, vec![Strategy::Direct, Strategy::Batched]);
        assert_eq!(parsed.clients, 1);
    }

    #[test]
    fn parse_args_reads_flags() {
        let raw = ["--strategy", "batched", "--duration-ms", "50", "--clients", "3"]
            .map(str::to_string)
            .to_vec();
        let parsed = parse_args(raw).expect("parse").expect("not help");
        assert_eq!(
            parsed,
            CliArgs {
                strategies: vec![Strategy::Batched],
                duration: Duration::from_millis(50),
                clients: 3,
            }
        );
        assert!(parse_args(vec!["--help".to_string()]).unwrap().is_none());
    }

    #[test]
    fn parse_rejects_bad_values() {
        let err = parse_strategy("scripted").expect_err("unknown strategy");
        assert!(err.contains("expected direct|batched|all"));
        assert!(parse_args(vec!["--clients".to_string(), "0".to_string()]).is_err());
        assert!(parse_args(vec!["--clients".to_string()]).is_err());
        let err = parse_args(vec!["--config".to_string(), "x.toml".to_string()])
            .expect_err("no config flag");
        assert!(err.contains("unknown argument: --config"));
    }

    #[test]
    fn both_strategies_leave_identical_state() {
        let mut states = Vec::new();
        for strategy in [Strategy::Direct, Strategy::Batched] {
            let shared = SharedStore::new();
            let mut conn = shared.connect();
            for n in 0..30_i32 {
                let item = format!("item{n}");
                let view = View {
                    token: "t",
                    user: "u",
                    item: &item,
                    now_ms: f64::from(n),
                };
                strategy.run_once(&mut conn, &view).expect("workload");
            }
            states.push((
                conn.zcard("viewed:t").unwrap(),
                conn.zcard("viewed:").unwrap(),
                conn.get("login:t").unwrap(),
            ));
        }
        assert_eq!(states[0], states[1]);
        assert_eq!(states[0].0, 25);
        assert_eq!(states[0].1, 30);
    }
}
