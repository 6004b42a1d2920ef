//! `bench`: run coding agents against tasks, then judge and report the results.

mod cli;
mod judge;
mod report;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use harness::exit_codes;
use harness::io::config::CONFIG_FILE;

#[derive(Parser)]
#[command(name = "bench", version, about = "Reproducible coding-agent trials")]
struct Cli {
    /// Config file (missing file means defaults).
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provision, invoke, capture and clean up every task × agent pair.
    Run(RunArgs),
    /// Ask the judge for a verdict on every run of a batch.
    Judge(JudgeArgs),
    /// Print discovered tasks.
    List {
        /// Only tasks carrying one of these tags.
        #[arg(long, value_delimiter = ',')]
        tag: Vec<String>,
    },
    /// Summarize the captured results of a batch.
    Report {
        /// Batch timestamp, e.g. `20260101_120000`.
        timestamp: String,
    },
    /// Remove leftover workspaces of a batch.
    Clean {
        timestamp: String,
        /// Workspace root (defaults to the configured one).
        #[arg(long)]
        workspace: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Only these tasks (comma separated).
    #[arg(long, value_delimiter = ',')]
    pub task: Vec<String>,

    /// Only tasks carrying one of these tags (comma separated).
    #[arg(long, value_delimiter = ',')]
    pub tag: Vec<String>,

    /// Agents to run (defaults to the configured list).
    #[arg(long, value_delimiter = ',')]
    pub agents: Vec<String>,

    /// Workspace root (defaults to the configured one, under the system temp dir).
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    /// Global augmentation list prepended to every task's own list.
    #[arg(long)]
    pub augmentations: Option<PathBuf>,

    /// Run-phase lanes.
    #[arg(long)]
    pub concurrency: Option<usize>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct JudgeArgs {
    /// Batch timestamp, e.g. `20260101_120000`.
    pub timestamp: String,

    /// Judge-phase lanes.
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Re-judge runs that already have a verdict.
    #[arg(long)]
    pub force: bool,
}

#[tokio::main]
async fn main() {
    harness::logging::init();
    match run(Cli::parse()).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = harness::io::config::load_config(&cli.config)?;
    match cli.command {
        Command::Run(args) => cli::run_batch(&config, &args).await,
        Command::Judge(args) => cli::judge_batch(&config, &args).await,
        Command::List { tag } => cli::list_tasks(&config, &tag),
        Command::Report { timestamp } => cli::report_batch(&config, &timestamp),
        Command::Clean {
            timestamp,
            workspace,
        } => cli::clean_batch(&config, &timestamp, workspace.as_deref()).await,
    }
}
