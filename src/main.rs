//! CLI entrypoint for the bulk-import Plan executor.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

use scalr_bulk_import::client::SignedHttpClient;
use scalr_bulk_import::executor::Executor;
use scalr_bulk_import::journal::Journal;
use scalr_bulk_import::{executor, loader, telemetry};

/// Executes a bulk-import Plan against a Scalr-style control plane.
#[derive(Parser, Debug)]
#[command(name = "bulk-import", version, about)]
struct Cli {
    /// Control-plane API base URL.
    #[arg(long, short = 'u')]
    url: String,

    /// API key id.
    #[arg(long, short = 'k')]
    key: String,

    /// API key secret.
    #[arg(long, short = 's')]
    secret: String,

    /// Path to the Plan file (YAML).
    #[arg(long, short = 'p')]
    plan: PathBuf,

    /// Go through the plan without issuing any mutating (post) requests.
    #[arg(long, short = 'z', default_value_t = false)]
    dry_run: bool,

    /// Override the outputs journal path (defaults to `<plan>.status`).
    #[arg(long)]
    journal: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init_logging();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let plan = loader::load_plan_from_file(&cli.plan)
        .with_context(|| format!("loading plan from {}", cli.plan.display()))?;
    loader::validate_plan(&plan).context("validating plan")?;

    let journal_path = cli.journal.unwrap_or_else(|| executor::journal_path_for(&cli.plan));
    let mut journal = Journal::load(&journal_path)
        .with_context(|| format!("loading outputs journal from {}", journal_path.display()))?;

    let client = SignedHttpClient::new(cli.url, cli.key, cli.secret);
    let executor = Executor::new(client, cli.dry_run, journal_path);

    info!(steps = plan.steps.len(), dry_run = cli.dry_run, "starting plan execution");

    let outcomes = executor
        .run(&plan, &mut journal)
        .await
        .context("executing plan")?;

    let completed = outcomes.iter().filter(|o| !o.skipped && !o.dry_run_skipped).count();
    info!(completed, total = plan.steps.len(), "plan execution finished");

    Ok(())
}
