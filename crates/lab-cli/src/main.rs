use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use contracts::RunConfig;
use lab_api::LabApi;
use tracing::info;

mod render;

#[derive(Parser)]
#[command(name = "goal-lab", version = env!("CARGO_PKG_VERSION"), about = "Staged agent inference lab: run scenarios and explain decisions")]
struct Cli {
    /// Run configuration as JSON; missing fields take their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured run id
    #[arg(long, global = true)]
    run_id: Option<String>,

    /// Override the configured seed
    #[arg(long, global = true)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the demo scenario and persist every tick
    Run {
        /// Ticks to run; defaults to the configured count
        #[arg(long)]
        ticks: Option<u64>,

        /// SQLite store path; falls back to GOAL_LAB_SQLITE_PATH
        #[arg(long)]
        sqlite: Option<PathBuf>,

        /// Keep the run in memory only
        #[arg(long)]
        no_persist: bool,
    },
    /// Run the demo scenario and explain one agent's latest tick as markdown
    Explain {
        agent: String,

        /// Ticks to run before explaining
        #[arg(long, default_value_t = 1)]
        ticks: u64,

        /// List every atom of each frame instead of only the changed ones
        #[arg(long)]
        all_atoms: bool,

        /// Print the raw pipeline run as JSON
        #[arg(long)]
        json: bool,
    },
    /// List runs stored in the SQLite store
    Status {
        #[arg(long)]
        sqlite: Option<PathBuf>,
    },
}

fn default_sqlite_path() -> PathBuf {
    std::env::var("GOAL_LAB_SQLITE_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("goal_lab_runs.sqlite"))
}

fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    let Some(path) = path else {
        return Ok(RunConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
}

fn run(config: RunConfig, ticks: Option<u64>, sqlite: Option<PathBuf>, no_persist: bool) -> Result<()> {
    let mut api = LabApi::demo(config);
    let sqlite_path = sqlite.unwrap_or_else(default_sqlite_path);
    if !no_persist {
        api.attach_sqlite_store(&sqlite_path)
            .context("failed to attach sqlite store")?;
        api.initialize_run_storage(true)
            .context("failed to initialize run storage")?;
    }

    let (status, committed) = match ticks {
        Some(ticks) => api.step(ticks)?,
        None => api.run_to_end()?,
    };

    if let Some(error) = api.last_persistence_error() {
        bail!("persistence error after simulation: {error}");
    }

    let failures = api
        .decisions()
        .iter()
        .filter(|record| record.failure.is_some())
        .count();
    info!(run_id = %status.run_id, committed, failures, "run finished");
    println!("committed={committed} failures={failures} {status}");
    if !no_persist {
        println!("sqlite={}", sqlite_path.display());
    }
    Ok(())
}

fn explain(config: RunConfig, agent: &str, ticks: u64, all_atoms: bool, json: bool) -> Result<()> {
    let mut api = LabApi::demo(config);
    if api.lab_world().snapshot().agent(agent).is_none() {
        bail!("unknown agent `{agent}`");
    }
    api.step(ticks)?;
    let Some(run) = api.explain(agent) else {
        bail!("agent `{agent}` has not run yet");
    };
    if json {
        println!("{}", serde_json::to_string_pretty(run)?);
    } else {
        print!("{}", render::pipeline_markdown(run, all_atoms));
    }
    Ok(())
}

fn status(sqlite: Option<PathBuf>) -> Result<()> {
    let path = sqlite.unwrap_or_else(default_sqlite_path);
    if !path.exists() {
        println!("no store at {}", path.display());
        return Ok(());
    }
    let mut api = LabApi::demo(RunConfig::default());
    api.attach_sqlite_store(&path)
        .context("failed to attach sqlite store")?;
    let runs = api.list_runs()?;
    if runs.is_empty() {
        println!("no runs in {}", path.display());
    }
    for run in runs {
        println!("seed={} {}", run.seed, run.status);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(run_id) = cli.run_id {
        config.run_id = run_id;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }

    match cli.command {
        Command::Run {
            ticks,
            sqlite,
            no_persist,
        } => run(config, ticks, sqlite, no_persist),
        Command::Explain {
            agent,
            ticks,
            all_atoms,
            json,
        } => explain(config, &agent, ticks, all_atoms, json),
        Command::Status { sqlite } => status(sqlite),
    }
}
