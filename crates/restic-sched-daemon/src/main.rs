use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use restic_sched_daemon::config::{filter_jobs, read_jobs};
use restic_sched_daemon::metrics::METRICS;
use restic_sched_daemon::scheduler::schedule_and_run_jobs;
use restic_sched_daemon::state::ResultStore;
use restic_sched_daemon::{api, runner};

use restic_sched_core::Job;

#[derive(Debug, Parser)]
#[command(
    name = "restic-sched",
    version,
    about = "Cron-driven backup orchestrator wrapping the restic CLI"
)]
struct Cli {
    /// Paths to job configuration files.
    #[arg(required = true, value_name = "CONFIG_FILE")]
    config_files: Vec<PathBuf>,

    /// Run backup jobs now; comma separated names, or `all`.
    #[arg(long, value_name = "NAMES")]
    backup: Option<String>,

    /// Run restore jobs now; comma separated names, or `all`.
    #[arg(long, value_name = "NAMES")]
    restore: Option<String>,

    /// Run the jobs given with --backup and --restore once, then exit.
    #[arg(long)]
    once: bool,

    /// Address to bind the health check API.
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,

    /// URL of a push gateway service for batch runs.
    #[arg(long, value_name = "URL")]
    push_gateway: Option<String>,

    /// Base directory for intermediate job files like SQL dumps.
    #[arg(long, value_name = "PATH")]
    base_dir: Option<PathBuf>,
}

fn split_names(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

async fn run_filtered_backups(
    jobs: &[Job],
    names: &str,
    base_dir: &Path,
    store: &ResultStore,
) -> Result<()> {
    let names = split_names(names);
    if names.is_empty() {
        return Ok(());
    }

    let (matched, filter_err) = filter_jobs(jobs, &names);
    for job in matched {
        runner::run_job_backup(job, base_dir, store)
            .await
            .with_context(|| format!("backup job {} failed", job.name))?;
    }

    if let Some(err) = filter_err {
        return Err(err.into());
    }

    Ok(())
}

async fn run_filtered_restores(
    jobs: &[Job],
    names: &str,
    base_dir: &Path,
    store: &ResultStore,
) -> Result<()> {
    let names = split_names(names);
    if names.is_empty() {
        return Ok(());
    }

    let (matched, filter_err) = filter_jobs(jobs, &names);
    for job in matched {
        runner::run_job_restore(job, base_dir, store, "")
            .await
            .with_context(|| format!("restore job {} failed", job.name))?;
    }

    if let Some(err) = filter_err {
        return Err(err.into());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    which::which("restic")
        .context("could not find restic in PATH; make sure it's installed")?;

    let jobs = read_jobs(&cli.config_files).context("failed to read jobs from files")?;

    let base_dir = cli
        .base_dir
        .unwrap_or_else(|| std::env::temp_dir().join("restic_scheduler"));
    std::fs::create_dir_all(&base_dir)
        .with_context(|| format!("failed creating base dir {}", base_dir.display()))?;

    let store = ResultStore::new();

    if let Some(names) = &cli.backup {
        run_filtered_backups(&jobs, names, &base_dir, &store)
            .await
            .context("failed running backup jobs")?;
    }

    if let Some(names) = &cli.restore {
        run_filtered_restores(&jobs, names, &base_dir, &store)
            .await
            .context("failed running restore jobs")?;
    }

    if cli.once {
        if let Some(url) = &cli.push_gateway {
            METRICS
                .push_to_gateway(url)
                .await
                .context("failed pushing metrics after jobs run")?;
        }

        return Ok(());
    }

    let api_store = store.clone();
    let addr = cli.addr.clone();
    tokio::spawn(async move {
        if let Err(err) = api::serve(&addr, api_store).await {
            tracing::error!("error on http server: {err}");
        }
    });

    info!("scheduling {} jobs", jobs.len());
    schedule_and_run_jobs(jobs, base_dir, store).await
}
