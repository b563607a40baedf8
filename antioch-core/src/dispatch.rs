use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::fetch::{FetchError, FetchResult, FetchStrategy, FetchedMedia, Fetcher};
use crate::manifest::{DescriptorMap, ScanReport};
use crate::shutdown::ShutdownSignal;
use crate::staging::{MigrationError, OutcomeClass, StagingPaths, StateWriter};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to prepare fetcher: {0}")]
    Fetch(#[from] FetchError),
    #[error("failed to prepare staging folders: {0}")]
    Staging(#[from] MigrationError),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStage {
    Fetch,
    Migrate,
    Task,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemError {
    pub manifest: PathBuf,
    pub stage: ItemStage,
    pub error: String,
}

/// Outcome of one dispatch run over a single source type. `success` and
/// `failure` hold the manifest paths written by the state writer.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub source_type: String,
    pub strategy: FetchStrategy,
    pub success: Vec<PathBuf>,
    pub failure: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub errors: Vec<ItemError>,
    pub cancelled: bool,
}

impl DispatchReport {
    fn new(source_type: &str, strategy: FetchStrategy) -> Self {
        Self {
            source_type: source_type.to_string(),
            strategy,
            success: Vec::new(),
            failure: Vec::new(),
            skipped: Vec::new(),
            errors: Vec::new(),
            cancelled: false,
        }
    }

    fn push_error(&mut self, manifest: PathBuf, stage: ItemStage, error: impl ToString) {
        self.errors.push(ItemError {
            manifest,
            stage,
            error: error.to_string(),
        });
    }
}

enum TaskOutcome {
    Fetched(FetchResult<FetchedMedia>),
    /// The source manifest was gone before the task started.
    Consumed,
}

enum Next {
    Joined(Option<Result<(PathBuf, TaskOutcome), JoinError>>),
    Shutdown,
}

/// Fans one source type's entries out to a bounded set of download tasks and
/// folds their outcomes, in completion order, through the state writer.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    fetcher: Arc<Fetcher>,
    writer: Arc<StateWriter>,
    workers: usize,
    shutdown: Option<ShutdownSignal>,
}

impl Dispatcher {
    pub fn new(fetcher: Fetcher, writer: StateWriter, workers: usize) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            writer: Arc::new(writer),
            workers: workers.max(1),
            shutdown: None,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> DispatchResult<Self> {
        let fetcher = Fetcher::new(config)?;
        let writer = StateWriter::new(
            StagingPaths::from_config(config),
            config.download.delete_source_manifests,
        );
        Ok(Self::new(fetcher, writer, config.download.workers))
    }

    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Dispatches every source type in a scan, one type at a time. A manifest
    /// listed under several types is only dispatched for the first of them;
    /// later types report it as skipped. Stops early once shutdown is
    /// requested.
    pub async fn dispatch_all(&self, scan: &ScanReport) -> DispatchResult<Vec<DispatchReport>> {
        self.writer.paths().ensure().await?;
        let mut reports = Vec::with_capacity(scan.by_type.len());
        let mut dispatched: BTreeSet<PathBuf> = BTreeSet::new();
        for (source_type, entries) in &scan.by_type {
            if self.is_shutting_down() {
                break;
            }
            let (fresh, repeated): (DescriptorMap, DescriptorMap) = entries
                .iter()
                .map(|(manifest, descriptor)| (manifest.clone(), descriptor.clone()))
                .partition(|(manifest, _)| !dispatched.contains(manifest));
            dispatched.extend(fresh.keys().cloned());

            let mut report = self.dispatch(source_type, &fresh).await;
            if !repeated.is_empty() {
                info!(
                    source_type,
                    manifests = repeated.len(),
                    "manifests already dispatched for another type, skipping"
                );
                report.skipped.extend(repeated.into_keys());
            }
            reports.push(report);
        }
        Ok(reports)
    }

    pub async fn dispatch(&self, source_type: &str, entries: &DescriptorMap) -> DispatchReport {
        let strategy = self.fetcher.strategy_for(source_type);
        let mut report = DispatchReport::new(source_type, strategy);
        if entries.is_empty() {
            return report;
        }
        if self.is_shutting_down() {
            report.cancelled = true;
            report.skipped.extend(entries.keys().cloned());
            return report;
        }

        info!(
            source_type,
            strategy = ?strategy,
            items = entries.len(),
            workers = self.workers,
            "dispatching downloads"
        );

        let permits = Arc::new(Semaphore::new(self.workers));
        let mut pending: BTreeSet<PathBuf> = entries.keys().cloned().collect();
        let mut tasks = JoinSet::new();
        for (manifest, descriptor) in entries {
            let fetcher = Arc::clone(&self.fetcher);
            let permits = Arc::clone(&permits);
            let manifest = manifest.clone();
            let descriptor = descriptor.clone();
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (manifest, TaskOutcome::Fetched(Err(FetchError::Cancelled)));
                };
                if fs::metadata(&manifest).await.is_err() {
                    return (manifest, TaskOutcome::Consumed);
                }
                let outcome = fetcher.fetch(strategy, &descriptor).await;
                (manifest, TaskOutcome::Fetched(outcome))
            });
        }

        let mut shutdown = self.shutdown.clone();
        loop {
            let next = match shutdown.as_mut() {
                Some(signal) => tokio::select! {
                    joined = tasks.join_next() => Next::Joined(joined),
                    _ = signal.wait() => Next::Shutdown,
                },
                None => Next::Joined(tasks.join_next().await),
            };

            let joined = match next {
                Next::Shutdown => {
                    warn!(
                        source_type,
                        outstanding = tasks.len(),
                        "shutdown requested, cancelling downloads"
                    );
                    report.cancelled = true;
                    tasks.abort_all();
                    shutdown = None;
                    continue;
                }
                Next::Joined(None) => break,
                Next::Joined(Some(joined)) => joined,
            };

            match joined {
                Ok((manifest, TaskOutcome::Consumed)) => {
                    info!(
                        manifest = %manifest.display(),
                        source_type,
                        "manifest already consumed, skipping"
                    );
                    pending.remove(&manifest);
                    report.skipped.push(manifest);
                }
                Ok((manifest, TaskOutcome::Fetched(outcome))) => {
                    pending.remove(&manifest);
                    self.record(source_type, manifest, outcome, &mut report)
                        .await;
                }
                Err(err) if err.is_cancelled() => {}
                Err(err) => error!(source_type, error = %err, "download task failed"),
            }
        }

        // Whatever is left was aborted or panicked; its source manifest is untouched.
        for manifest in pending {
            if report.cancelled {
                report.skipped.push(manifest);
            } else {
                report.push_error(manifest, ItemStage::Task, "download task did not complete");
            }
        }

        info!(
            source_type,
            success = report.success.len(),
            failure = report.failure.len(),
            skipped = report.skipped.len(),
            errors = report.errors.len(),
            cancelled = report.cancelled,
            "dispatch finished"
        );
        report
    }

    async fn record(
        &self,
        source_type: &str,
        manifest: PathBuf,
        outcome: FetchResult<FetchedMedia>,
        report: &mut DispatchReport,
    ) {
        if let Err(err) = &outcome {
            warn!(
                manifest = %manifest.display(),
                source_type,
                error = %err,
                "download failed"
            );
            report.push_error(manifest.clone(), ItemStage::Fetch, err);
        }
        match self
            .writer
            .record_download(source_type, &manifest, &outcome)
            .await
        {
            Ok(migration) => match migration.class {
                OutcomeClass::Success => report.success.push(migration.manifest),
                OutcomeClass::Failure => report.failure.push(migration.manifest),
            },
            Err(err) => {
                warn!(
                    manifest = %manifest.display(),
                    error = %err,
                    "manifest migration failed, source left in place"
                );
                report.push_error(manifest, ItemStage::Migrate, err);
            }
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(ShutdownSignal::is_triggered)
            .unwrap_or(false)
    }
}
