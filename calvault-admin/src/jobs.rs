//! Background job workers and their progress snapshots.

use crate::repair::{repair_locations, RepairConfig};
use calvault_dump::{DumpConfig, Dumper};
use calvault_reconcile::Reconciler;
use calvault_restore::{load_alias_info, RestoreConfig, RestoreError, Restorer};
use calvault_store::SvcFactory;
use calvault_types::{AliasEntry, AliasInfo, CollectionPath, EntityCounts, ProgressListener};
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{error, info};

/// The five job kinds. One instance of each may run at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Restore,
    Dump,
    SubsCheck,
    AliasFix,
    DataRepair,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Restore => "restore",
            Self::Dump => "dump",
            Self::SubsCheck => "subscription check",
            Self::AliasFix => "alias fix",
            Self::DataRepair => "data repair",
        };
        write!(f, "{s}")
    }
}

/// Terminal and in-flight job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobStatus {
    #[default]
    NotStarted,
    Running,
    Done,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not-started",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time view of a job for pollers.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub lines: Vec<String>,
    pub counts: EntityCounts,
}

#[derive(Default)]
struct ProgressInner {
    status: JobStatus,
    lines: Vec<String>,
    counts: EntityCounts,
}

/// Shared, lock-protected progress state for one job.
///
/// The worker writes through the [`ProgressListener`] impl; pollers clone a
/// snapshot without blocking the worker.
#[derive(Clone, Default)]
pub struct JobProgress {
    inner: Arc<RwLock<ProgressInner>>,
}

impl JobProgress {
    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ProgressInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: JobStatus) {
        self.write().status = status;
    }

    fn push(&self, line: impl Into<String>) {
        self.write().lines.push(line.into());
    }

    /// Clones the current state.
    #[must_use]
    pub fn snapshot(&self) -> JobSnapshot {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        JobSnapshot {
            status: inner.status,
            lines: inner.lines.clone(),
            counts: inner.counts,
        }
    }
}

impl ProgressListener for JobProgress {
    fn line(&self, msg: &str) {
        self.push(msg);
    }

    fn counts(&self, counts: &EntityCounts) {
        self.write().counts = *counts;
    }
}

/// Errors from starting or feeding jobs.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("a {0} job is already running")]
    AlreadyRunning(JobKind),

    #[error("no alias info - run a dump or restore first")]
    NoAliasInfo,

    #[error(transparent)]
    Restore(#[from] RestoreError),
}

/// Configuration shared by all jobs of one runner.
#[derive(Debug, Clone)]
pub struct JobRunnerConfig {
    /// Master switch; a restore request while disabled fails immediately.
    pub allow_restore: bool,
    pub restore: RestoreConfig,
    pub dump: DumpConfig,
    pub repair: RepairConfig,
}

impl Default for JobRunnerConfig {
    fn default() -> Self {
        Self {
            allow_restore: true,
            restore: RestoreConfig::default(),
            dump: DumpConfig::default(),
            repair: RepairConfig::default(),
        }
    }
}

/// Alias/subscription info produced by the last dump or restore, consumed
/// by the reconcile jobs.
#[derive(Default)]
struct AliasState {
    aliases: HashMap<CollectionPath, AliasEntry>,
    external_subs: Option<Vec<AliasInfo>>,
}

/// Starts and tracks background jobs, one slot per kind.
pub struct JobRunner {
    factory: Arc<dyn SvcFactory>,
    config: JobRunnerConfig,
    jobs: Mutex<HashMap<JobKind, JobProgress>>,
    alias_state: Arc<Mutex<AliasState>>,
}

impl JobRunner {
    pub fn new(factory: Arc<dyn SvcFactory>, config: JobRunnerConfig) -> Self {
        Self {
            factory,
            config,
            jobs: Mutex::new(HashMap::new()),
            alias_state: Arc::new(Mutex::new(AliasState::default())),
        }
    }

    /// Claims the slot for `kind`, rejecting a second start while one is
    /// running, and returns the fresh progress handle.
    fn claim(&self, kind: JobKind) -> Result<JobProgress, JobError> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = jobs.get(&kind) {
            if existing.snapshot().status == JobStatus::Running {
                return Err(JobError::AlreadyRunning(kind));
            }
        }
        let progress = JobProgress::default();
        progress.set_status(JobStatus::Running);
        jobs.insert(kind, progress.clone());
        Ok(progress)
    }

    /// Current snapshot for a job kind.
    #[must_use]
    pub fn status(&self, kind: JobKind) -> JobSnapshot {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        match jobs.get(&kind) {
            Some(progress) => progress.snapshot(),
            None => JobSnapshot {
                status: JobStatus::NotStarted,
                lines: vec![format!("{kind} has not been started")],
                counts: EntityCounts::default(),
            },
        }
    }

    /// Polls a job until it reaches a terminal status.
    pub async fn wait(&self, kind: JobKind) -> JobSnapshot {
        loop {
            let snapshot = self.status(kind);
            match snapshot.status {
                JobStatus::Running => tokio::time::sleep(Duration::from_millis(50)).await,
                _ => return snapshot,
            }
        }
    }

    /// Starts a whole-dataset restore from `path`.
    pub fn start_restore(&self, path: PathBuf) -> Result<(), JobError> {
        let progress = self.claim(JobKind::Restore)?;

        if !self.config.allow_restore {
            progress.push("***********************************");
            progress.push("********* Restores disabled *******");
            progress.push("***********************************");
            progress.set_status(JobStatus::Failed);
            return Ok(());
        }

        let factory = self.factory.clone();
        let config = self.config.restore.clone();
        let alias_state = self.alias_state.clone();
        tokio::spawn(async move {
            progress.push(format!("Started restore of data from {}", path.display()));
            info!("restore file: {}", path.display());

            let restorer = Restorer::new(factory, config);
            let result = match restorer.open(&path) {
                Ok(run) => run.run(&progress).await,
                Err(err) => Err(err),
            };

            match result {
                Ok(outcome) => {
                    {
                        let mut state =
                            alias_state.lock().unwrap_or_else(|e| e.into_inner());
                        state.aliases = outcome.aliases;
                        state.external_subs = Some(outcome.external_subs);
                    }
                    for line in outcome.counts.lines() {
                        progress.push(line);
                    }
                    progress.push(elapsed_line(outcome.elapsed));
                    progress.push("Restore complete");
                    progress.set_status(JobStatus::Done);
                }
                Err(err) => {
                    error!("restore failed: {err}");
                    progress.push(format!("Exception: {err}"));
                    progress.set_status(JobStatus::Failed);
                }
            }
        });
        Ok(())
    }

    /// Starts a whole-dataset dump to `path`.
    pub fn start_dump(&self, path: PathBuf) -> Result<(), JobError> {
        let progress = self.claim(JobKind::Dump)?;
        let factory = self.factory.clone();
        let config = self.config.dump.clone();
        let alias_state = self.alias_state.clone();

        tokio::spawn(async move {
            progress.push("Started dump of data");
            let dumper = Dumper::new(factory, config);

            let result = match File::create(&path) {
                Ok(file) => dumper.dump_all(BufWriter::new(file), &progress).await,
                Err(err) => {
                    progress.push(format!("Unable to create {}: {err}", path.display()));
                    progress.set_status(JobStatus::Failed);
                    return;
                }
            };

            match result {
                Ok(outcome) => {
                    {
                        let mut state =
                            alias_state.lock().unwrap_or_else(|e| e.into_inner());
                        state.aliases = outcome.aliases;
                        state.external_subs = Some(outcome.external_subs);
                    }
                    for line in outcome.counts.lines() {
                        progress.push(line);
                    }
                    progress.push(elapsed_line(outcome.elapsed));
                    progress.push("Complete");
                    progress.set_status(JobStatus::Done);
                }
                Err(err) => {
                    error!("dump failed: {err}");
                    progress.push(format!("Exception: {err}"));
                    progress.set_status(JobStatus::Failed);
                }
            }
        });
        Ok(())
    }

    /// Starts a subscriptions-only sweep (no output file).
    pub fn start_subs_sweep(&self) -> Result<(), JobError> {
        let progress = self.claim(JobKind::Dump)?;
        let factory = self.factory.clone();
        let config = self.config.dump.clone();
        let alias_state = self.alias_state.clone();

        tokio::spawn(async move {
            progress.push("Started search for external subscriptions");
            let dumper = Dumper::new(factory, config);
            match dumper.collect_external_subs(&progress).await {
                Ok(outcome) => {
                    {
                        let mut state =
                            alias_state.lock().unwrap_or_else(|e| e.into_inner());
                        state.aliases = outcome.aliases;
                        state.external_subs = Some(outcome.external_subs);
                    }
                    progress.push(elapsed_line(outcome.elapsed));
                    progress.push("Complete");
                    progress.set_status(JobStatus::Done);
                }
                Err(err) => {
                    error!("subscription sweep failed: {err}");
                    progress.push(format!("Exception: {err}"));
                    progress.set_status(JobStatus::Failed);
                }
            }
        });
        Ok(())
    }

    /// Starts the external-subscription check over the last collected set.
    pub fn start_subs_check(&self) -> Result<(), JobError> {
        let subs = {
            let state = self.alias_state.lock().unwrap_or_else(|e| e.into_inner());
            state.external_subs.clone().ok_or(JobError::NoAliasInfo)?
        };
        let progress = self.claim(JobKind::SubsCheck)?;
        let factory = self.factory.clone();

        tokio::spawn(async move {
            let mut reconciler = Reconciler::new(factory);
            reconciler.check_subscriptions(&subs, &progress).await;
            progress.set_status(JobStatus::Done);
        });
        Ok(())
    }

    /// Starts the two-phase alias repair over the last collected set.
    pub fn start_alias_fix(&self) -> Result<(), JobError> {
        let mut aliases = {
            let state = self.alias_state.lock().unwrap_or_else(|e| e.into_inner());
            if state.aliases.is_empty() && state.external_subs.is_none() {
                return Err(JobError::NoAliasInfo);
            }
            state.aliases.clone()
        };
        let progress = self.claim(JobKind::AliasFix)?;
        let factory = self.factory.clone();
        let alias_state = self.alias_state.clone();

        tokio::spawn(async move {
            let mut reconciler = Reconciler::new(factory);
            reconciler.fix_aliases(&mut aliases, &progress).await;
            // keep the no-access marks for a later alias-info dump
            {
                let mut state = alias_state.lock().unwrap_or_else(|e| e.into_inner());
                state.aliases = aliases;
            }
            progress.set_status(JobStatus::Done);
        });
        Ok(())
    }

    /// Starts the location-repair batch from a resume cursor.
    pub fn start_data_repair(&self, start: usize) -> Result<(), JobError> {
        let progress = self.claim(JobKind::DataRepair)?;
        let factory = self.factory.clone();
        let mut config = self.config.repair.clone();
        config.start = start;

        tokio::spawn(async move {
            let tallies = repair_locations(factory, config, &progress).await;
            for line in tallies.lines() {
                progress.push(line);
            }
            progress.set_status(JobStatus::Done);
        });
        Ok(())
    }

    /// Reloads alias info from a standalone alias-info dump, replacing the
    /// in-memory state the reconcile jobs consume.
    pub fn load_alias_info(&self, path: &Path) -> Result<(), JobError> {
        let dump = load_alias_info(path)?;
        let mut state = self.alias_state.lock().unwrap_or_else(|e| e.into_inner());
        state.aliases = dump.aliases;
        state.external_subs = Some(dump.external_subs);
        Ok(())
    }
}

/// Formats a duration the way job reports expect it.
#[must_use]
pub(crate) fn elapsed_line(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("Elapsed time: {}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_line_formats_minutes_and_seconds() {
        assert_eq!(elapsed_line(Duration::from_secs(0)), "Elapsed time: 0:00");
        assert_eq!(elapsed_line(Duration::from_secs(61)), "Elapsed time: 1:01");
        assert_eq!(elapsed_line(Duration::from_secs(600)), "Elapsed time: 10:00");
    }
}
