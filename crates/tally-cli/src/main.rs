use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tally_core::impls::{ExclusiveLock, MarkerLock};
use tally_core::{JobBuilder, LockMode, TallyConfig, TaskId, enumerate_dir};

mod shell_work;

use shell_work::ShellWork;

/// tally: track which tasks of a batch job are done, across workers and restarts.
#[derive(Debug, Parser)]
#[command(name = "tally", version)]
struct Cli {
    /// Job directory holding ledger.json, ledger.lock and cache/.
    #[arg(long, env = "TALLY_JOB_DIR", default_value = ".", global = true)]
    job_dir: PathBuf,

    /// JSON config file. Overrides the job directory layout.
    #[arg(long, env = "TALLY_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the ledger (no-op when it already exists).
    Init(InitArgs),
    /// Print progress counts.
    Status {
        /// Also list pending task ids.
        #[arg(long)]
        pending: bool,
    },
    /// Run workers until every task is complete or retries give up.
    Run(RunArgs),
    /// Remove a lock marker left behind by a crashed worker.
    Unlock,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
struct TaskSource {
    /// One task per sub-directory of this directory.
    #[arg(long)]
    tasks_from_dir: Option<PathBuf>,

    /// Explicit task id; repeat for more.
    #[arg(long = "task")]
    tasks: Vec<String>,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[command(flatten)]
    source: TaskSource,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, short = 'w', default_value_t = 1)]
    workers: usize,

    /// Command run per task with TALLY_TASK_ID set.
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "tally_cli=info,tally_core=info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn load_config(cli: &Cli) -> Result<TallyConfig> {
    let config = match &cli.config {
        Some(path) => TallyConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TallyConfig::for_job_dir(&cli.job_dir),
    };
    config.validate()?;
    Ok(config)
}

async fn collect_tasks(source: &TaskSource) -> Result<Vec<TaskId>> {
    if let Some(dir) = &source.tasks_from_dir {
        return enumerate_dir(dir)
            .await
            .with_context(|| format!("enumerating {}", dir.display()));
    }
    Ok(source.tasks.iter().map(|t| TaskId::new(t.as_str())).collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match &cli.command {
        Command::Init(args) => {
            let ids = collect_tasks(&args.source).await?;
            if ids.is_empty() {
                bail!("no tasks to track");
            }
            let job = JobBuilder::from_config(&config).build()?;
            let ledger = job.initialize(&ids).await?;
            println!(
                "{}: {} tasks, {} pending",
                config.ledger_path.display(),
                ledger.len(),
                ledger.pending_tasks().len()
            );
        }
        Command::Status { pending } => {
            let job = JobBuilder::from_config(&config).build()?;
            let ledger = job.ledger().reload().await?;
            let counts = tally_core::app::LedgerCounts::from(&ledger);
            println!(
                "total={} complete={} pending={}",
                counts.total, counts.complete, counts.pending
            );
            if *pending {
                for id in ledger.pending_tasks() {
                    println!("{id}");
                }
            }
        }
        Command::Run(args) => {
            if args.workers == 0 {
                bail!("--workers must be at least 1");
            }
            let work = ShellWork::new(&args.command, config.job_dir())
                .context("missing command after `--`")?;
            let job = JobBuilder::from_config(&config).build()?;

            let group = job.spawn_workers(args.workers, Arc::new(work));
            let shutdown = group.shutdown_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; finishing in-flight tasks");
                    shutdown.request();
                }
            });

            let mut failed = 0;
            for result in group.join().await {
                let report = result?;
                for failure in &report.failed {
                    warn!(worker = %report.worker, task_id = %failure.task_id, error = %failure.error, "task failed");
                }
                failed += report.failed.len();
            }

            let counts = job.status().await?;
            info!(complete = counts.complete, pending = counts.pending, "run finished");
            if !counts.is_drained() {
                bail!("{} tasks still pending ({failed} failures)", counts.pending);
            }
        }
        Command::Unlock => {
            let removed = match config.lock_mode {
                LockMode::Exclusive => ExclusiveLock::new(&config.lock_path).force_release().await?,
                LockMode::Marker => MarkerLock::new(&config.lock_path).force_release().await?,
            };
            if removed {
                println!("removed {}", config.lock_path.display());
            } else {
                println!("no lock at {}", config.lock_path.display());
            }
        }
    }
    Ok(())
}
