use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::extractor::{ExtractError, ExtractOutcome, MetadataExtractor};
use crate::manifest::{is_category_index, is_manifest_file};
use crate::shutdown::ShutdownSignal;
use crate::staging::is_temporary;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to list {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type WatchResult<T> = Result<T, WatchError>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WatchSummary {
    pub processed: usize,
    pub picked_up: usize,
    pub quarantined: usize,
    pub failed: usize,
}

impl WatchSummary {
    fn record(&mut self, result: &Result<ExtractOutcome, ExtractError>) {
        self.processed += 1;
        match result {
            Ok(ExtractOutcome::PickedUp { .. }) => self.picked_up += 1,
            Ok(ExtractOutcome::Quarantined { .. }) => self.quarantined += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Manifests directly inside `dir`, sorted by name. Subfolders and hidden
/// temporary files are skipped.
pub async fn list_staged_manifests(dir: &Path) -> WatchResult<Vec<PathBuf>> {
    let io_err = |source| WatchError::Io {
        source,
        path: dir.to_path_buf(),
    };
    let mut entries = fs::read_dir(dir).await.map_err(io_err)?;
    let mut manifests = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        if !is_manifest_file(&path) || is_category_index(&path) || is_temporary(&path) {
            continue;
        }
        match entry.file_type().await {
            Ok(kind) if kind.is_file() => manifests.push(path),
            _ => {}
        }
    }
    manifests.sort();
    Ok(manifests)
}

/// Single consumer over the drop folder. Existing manifests are handled at
/// startup; afterwards a polling task feeds newly seen ones through a
/// bounded channel.
#[derive(Clone)]
pub struct StageWatcher {
    extractor: MetadataExtractor,
    drop_dir: PathBuf,
    poll_interval: Duration,
    capacity: usize,
}

impl StageWatcher {
    pub fn new(
        extractor: MetadataExtractor,
        poll_interval: Duration,
        capacity: usize,
    ) -> Self {
        let drop_dir = extractor.paths().drop_dir.clone();
        Self {
            extractor,
            drop_dir,
            poll_interval,
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            MetadataExtractor::from_config(config),
            config.watch.poll_interval(),
            config.watch.channel_capacity,
        )
    }

    pub async fn run(&self, mut shutdown: ShutdownSignal) -> WatchResult<WatchSummary> {
        let mut summary = WatchSummary::default();
        let existing = list_staged_manifests(&self.drop_dir).await?;
        info!(
            drop_dir = %self.drop_dir.display(),
            existing = existing.len(),
            "stage watcher starting"
        );

        for manifest in &existing {
            if shutdown.is_triggered() {
                return Ok(summary);
            }
            self.handle(manifest, &mut summary).await;
        }

        let (tx, mut rx) = mpsc::channel(self.capacity);
        let source = tokio::spawn(poll_drop_folder(
            self.drop_dir.clone(),
            self.poll_interval,
            existing.into_iter().collect(),
            tx,
            shutdown.clone(),
        ));

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                next = rx.recv() => match next {
                    Some(manifest) => self.handle(&manifest, &mut summary).await,
                    None => break,
                },
            }
        }

        source.abort();
        let _ = source.await;
        info!(
            processed = summary.processed,
            picked_up = summary.picked_up,
            quarantined = summary.quarantined,
            failed = summary.failed,
            "stage watcher stopped"
        );
        Ok(summary)
    }

    async fn handle(&self, manifest: &Path, summary: &mut WatchSummary) {
        let result = self.extractor.process(manifest).await;
        match &result {
            Ok(_) => {}
            Err(ExtractError::Vanished(path)) => {
                debug!(manifest = %path.display(), "staged manifest vanished")
            }
            Err(err) => warn!(manifest = %manifest.display(), error = %err, "processing failed"),
        }
        summary.record(&result);
    }
}

async fn poll_drop_folder(
    dir: PathBuf,
    every: Duration,
    mut announced: HashSet<PathBuf>,
    tx: mpsc::Sender<PathBuf>,
    mut shutdown: ShutdownSignal,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.wait() => return,
            _ = ticker.tick() => {}
        }
        let present = match list_staged_manifests(&dir).await {
            Ok(present) => present,
            Err(err) => {
                warn!(error = %err, "failed to poll drop folder");
                continue;
            }
        };
        let present_set: HashSet<PathBuf> = present.iter().cloned().collect();
        announced.retain(|path| present_set.contains(path));
        for manifest in present {
            if announced.insert(manifest.clone()) && tx.send(manifest).await.is_err() {
                return;
            }
        }
    }
}
