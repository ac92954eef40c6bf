//! CalVault admin CLI.
//!
//! Drives the dump/restore/reconcile jobs against the in-memory reference
//! service. Each command seeds the service by restoring `--data-in`, runs
//! the requested job, and prints its report lines.
//!
//! Usage:
//!   calvault-admin restore --data-in dump.xml [--merge] [--dry-run]
//!   calvault-admin dump --data-in dump.xml --data-out out.xml
//!   calvault-admin check-subs --data-in dump.xml
//!   calvault-admin fix-aliases --data-in dump.xml
//!   calvault-admin fix-data --data-in dump.xml [--start N]

use anyhow::{bail, Context, Result};
use calvault_admin::{JobKind, JobRunner, JobRunnerConfig, JobStatus};
use calvault_restore::{Mode, RestoreConfig, RestoreScope};
use calvault_store::MemCal;
use calvault_types::OwnerId;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "calvault-admin")]
#[command(about = "CalVault dump/restore and reconciliation jobs")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Restore a dump file into the service
    Restore {
        /// Dump file to restore
        #[arg(long)]
        data_in: PathBuf,

        /// Overwrite duplicate identifiers instead of failing them
        #[arg(long)]
        merge: bool,

        /// Parse and validate without committing
        #[arg(long)]
        dry_run: bool,

        /// Fail on unknown elements instead of skipping them
        #[arg(long)]
        strict: bool,

        /// Restore only this owner's subtrees
        #[arg(long)]
        owner: Option<String>,

        /// Fold account names to lowercase
        #[arg(long)]
        lowercase_accounts: bool,
    },

    /// Restore a dump, then dump the service back out
    Dump {
        /// Dump file used to seed the service
        #[arg(long)]
        data_in: PathBuf,

        /// Output dump file
        #[arg(long)]
        data_out: PathBuf,
    },

    /// Check every external subscription from a restored dump
    CheckSubs {
        #[arg(long)]
        data_in: PathBuf,
    },

    /// Repair sharing metadata on aliased collections
    FixAliases {
        #[arg(long)]
        data_in: PathBuf,
    },

    /// Re-link events to canonical locations
    FixData {
        #[arg(long)]
        data_in: PathBuf,

        /// Resume cursor into the event enumeration
        #[arg(long, default_value_t = 0)]
        start: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    match args.command {
        Command::Restore {
            data_in,
            merge,
            dry_run,
            strict,
            owner,
            lowercase_accounts,
        } => {
            let config = JobRunnerConfig {
                restore: RestoreConfig {
                    mode: if strict { Mode::Strict } else { Mode::Lenient },
                    merge,
                    dry_run,
                    scope: match owner {
                        Some(account) => RestoreScope::Owner(OwnerId::new(account)),
                        None => RestoreScope::All,
                    },
                    lowercase_accounts,
                    ..Default::default()
                },
                ..Default::default()
            };
            let runner = runner(config);
            runner.start_restore(data_in)?;
            finish(&runner, JobKind::Restore).await
        }

        Command::Dump { data_in, data_out } => {
            let runner = runner(JobRunnerConfig::default());
            seed(&runner, data_in).await?;
            runner.start_dump(data_out)?;
            finish(&runner, JobKind::Dump).await
        }

        Command::CheckSubs { data_in } => {
            let runner = runner(JobRunnerConfig::default());
            seed(&runner, data_in).await?;
            runner.start_subs_check()?;
            finish(&runner, JobKind::SubsCheck).await
        }

        Command::FixAliases { data_in } => {
            let runner = runner(JobRunnerConfig::default());
            seed(&runner, data_in).await?;
            runner.start_alias_fix()?;
            finish(&runner, JobKind::AliasFix).await
        }

        Command::FixData { data_in, start } => {
            let runner = runner(JobRunnerConfig::default());
            seed(&runner, data_in).await?;
            runner.start_data_repair(start)?;
            finish(&runner, JobKind::DataRepair).await
        }
    }
}

fn runner(config: JobRunnerConfig) -> JobRunner {
    JobRunner::new(Arc::new(MemCal::new()), config)
}

/// Seeds the in-memory service by restoring the given dump.
async fn seed(runner: &JobRunner, data_in: PathBuf) -> Result<()> {
    runner
        .start_restore(data_in)
        .context("starting seed restore")?;
    let snapshot = runner.wait(JobKind::Restore).await;
    if snapshot.status != JobStatus::Done {
        for line in &snapshot.lines {
            eprintln!("{line}");
        }
        bail!("seed restore failed");
    }
    Ok(())
}

/// Waits for the job and prints its report.
async fn finish(runner: &JobRunner, kind: JobKind) -> Result<()> {
    let snapshot = runner.wait(kind).await;
    for line in &snapshot.lines {
        println!("{line}");
    }
    println!("Status: {}", snapshot.status);
    if snapshot.status == JobStatus::Failed {
        bail!("{kind} failed");
    }
    Ok(())
}
