//! pgharness: latency sampler and ORM conformance runner
//!
//! # Usage
//!
//! ```bash
//! # Sample latencies: 16 clients x 1000 queries
//! pgharness --url postgres://localhost/bench bench -c 16 -n 1000
//!
//! # Run every conformance scenario
//! pgharness --url postgres://localhost/db conform
//!
//! # Run selected scenarios
//! pgharness conform first nested_transaction
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use pgharness::prelude::*;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pgharness")]
#[command(version)]
#[command(about = "Latency sampler and ORM conformance checks for PostgreSQL-wire databases", long_about = None)]
#[command(after_help = "EXAMPLES:
    pgharness --url postgres://localhost/bench bench -c 16 -n 1000
    pgharness bench --sql 'SELECT name FROM users WHERE id=$1' --format json
    pgharness conform first create_in_batches")]
struct Cli {
    /// Database connection URL
    #[arg(long, global = true, env = "PGHARNESS_DATABASE_URL")]
    url: Option<String>,

    /// Config file (default: ./pgharness.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the latency sampler
    Bench {
        /// Statement to sample; `$1` is bound to a random id
        #[arg(long)]
        sql: Option<String>,

        /// Queries per client
        #[arg(short = 'n', long)]
        operations: Option<usize>,

        /// Concurrent clients
        #[arg(short, long)]
        clients: Option<usize>,

        /// Ids are drawn from 0..ID_SPACE
        #[arg(long)]
        id_space: Option<i64>,

        /// Seed for the id generator
        #[arg(long)]
        seed: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Include every raw sample in the output
        #[arg(long)]
        raw: bool,
    },
    /// Run ORM conformance scenarios (all when none are named)
    Conform {
        scenarios: Vec<String>,
    },
    /// List the conformance scenarios
    Scenarios,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pgharness=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Scenarios => {
            for scenario in Scenario::ALL {
                println!("{}", scenario.name());
            }
            Ok(())
        }
        Commands::Conform { ref scenarios } => {
            let config = HarnessConfig::load(cli.config.as_deref())?.with_url(cli.url.clone());
            run_conform(config.database_url()?, config.postgres.pool_size, scenarios).await
        }
        Commands::Bench {
            sql,
            operations,
            clients,
            id_space,
            seed,
            format,
            raw,
        } => {
            let mut config = HarnessConfig::load(cli.config.as_deref())?.with_url(cli.url);
            let bench = &mut config.bench;
            if let Some(sql) = sql {
                bench.sql = sql;
            }
            if let Some(operations) = operations {
                bench.operations = operations;
            }
            if let Some(clients) = clients {
                bench.clients = clients;
            }
            if let Some(id_space) = id_space {
                bench.id_space = id_space;
            }
            if seed.is_some() {
                bench.seed = seed;
            }
            run_bench(&config, &format, raw).await
        }
    }
}

async fn run_bench(config: &HarnessConfig, format: &OutputFormat, raw: bool) -> Result<()> {
    let url = config.database_url()?;
    let bench = &config.bench;
    if bench.clients == 0 {
        anyhow::bail!("--clients must be at least 1");
    }

    eprintln!("{} Connecting...", "🔌".cyan());
    let runner = PgQueryRunner::connect(url, u32::try_from(bench.clients).unwrap_or(u32::MAX)).await?;
    let sampler = LatencySampler::new(runner.clone())
        .with_id_space(bench.id_space)
        .with_optional_seed(bench.seed);

    let report = sampler
        .run(&bench.sql, bench.operations, bench.clients)
        .await;
    runner.close().await;
    let report = report?;

    let summary = LatencySummary::from_samples(&report.completed_run_times());

    match format {
        OutputFormat::Json => {
            let mut output = serde_json::json!({
                "sql": bench.sql,
                "operations": bench.operations,
                "clients": bench.clients,
                "summary": summary,
                "workers": report.workers(),
            });
            if raw {
                output["run_times"] = serde_json::json!(report.run_times());
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => print_report(bench, &report, summary.as_ref(), raw),
    }

    if !report.is_complete() {
        anyhow::bail!("{} worker(s) stopped early", report.errors().count());
    }
    Ok(())
}

fn print_report(
    bench: &pgharness::config::BenchConfig,
    report: &LatencyReport,
    summary: Option<&LatencySummary>,
    raw: bool,
) {
    println!("{}", "📈 LATENCY".cyan().bold());
    println!("{} {}", "SQL:".dimmed(), bench.sql.white());
    println!(
        "{} {} x {} = {}",
        "Runs:".dimmed(),
        bench.clients,
        bench.operations,
        report.run_times().len()
    );
    println!();

    match summary {
        Some(s) => {
            println!("{:<8} {:>12}", "Count".white().bold(), s.count);
            println!("{:<8} {:>12.3} ms", "Min".white().bold(), s.min);
            println!("{:<8} {:>12.3} ms", "Mean".white().bold(), s.mean);
            println!("{:<8} {:>12.3} ms", "P50".white().bold(), s.p50);
            println!("{:<8} {:>12.3} ms", "P95".white().bold(), s.p95);
            println!("{:<8} {:>12.3} ms", "P99".white().bold(), s.p99);
            println!("{:<8} {:>12.3} ms", "Max".white().bold(), s.max);
        }
        None => println!("{}", "(no samples)".dimmed()),
    }

    for worker in report.errors() {
        println!(
            "{} client {} stopped after {} run(s): {}",
            "✗".red(),
            worker.client,
            worker.completed,
            worker.error.as_deref().unwrap_or_default().red()
        );
    }

    if raw {
        println!();
        for (client, worker) in report.workers().iter().enumerate() {
            if let Some(slots) = report.worker_run_times(client) {
                let cells: Vec<String> = slots[..worker.completed.min(slots.len())]
                    .iter()
                    .map(|ms| format!("{:.3}", ms))
                    .collect();
                println!("{} {}", format!("[{}]", client).dimmed(), cells.join(" "));
            }
        }
    }
}

async fn run_conform(url: &str, pool_size: u32, names: &[String]) -> Result<()> {
    let scenarios: Vec<Scenario> = if names.is_empty() {
        Scenario::ALL.to_vec()
    } else {
        names
            .iter()
            .map(|name| name.parse::<Scenario>())
            .collect::<Result<_, _>>()?
    };

    let mut failed = 0;
    for scenario in &scenarios {
        match scenario.run_with(url, pool_size).await {
            Ok(()) => println!("{} {}", "✓".green(), scenario.name()),
            Err(e) => {
                failed += 1;
                println!("{} {}", "✗".red(), scenario.name().red());
                for line in e.to_string().lines() {
                    println!("    {}", line.dimmed());
                }
            }
        }
    }

    println!();
    if failed > 0 {
        anyhow::bail!("{} of {} scenario(s) failed", failed, scenarios.len());
    }
    println!(
        "{} {} scenario(s) passed",
        "✓".green(),
        scenarios.len().to_string().cyan()
    );
    Ok(())
}
