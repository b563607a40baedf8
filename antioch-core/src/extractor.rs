use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::manifest::{paired_media_path, Manifest, MediaInfo};
use crate::probe::{parse_probe_output, CommandProbe, MediaProbe};
use crate::staging::{
    file_stem, move_file, vacant_manifest_path, write_atomic, MigrationError, PickedUp,
    PickupMover, StagingPaths,
};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("manifest {0} disappeared before processing")]
    Vanished(PathBuf),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

pub type ExtractResult<T> = Result<T, ExtractError>;

/// A staged manifest whose media file is not beside it. Permanent.
#[derive(Debug, Error)]
#[error("no media {media} paired with {manifest}")]
pub struct MissingPairError {
    pub manifest: PathBuf,
    pub media: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExtractOutcome {
    PickedUp {
        #[serde(flatten)]
        picked: PickedUp,
        media_info: MediaInfo,
        /// The media had already reached pickup in an earlier, interrupted run.
        resumed: bool,
    },
    Quarantined {
        manifest: PathBuf,
        reason: String,
    },
}

const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(250);

/// Annotates staged manifests with probe output and hands the pair to the
/// pickup folder.
#[derive(Clone)]
pub struct MetadataExtractor {
    probe: Arc<dyn MediaProbe>,
    paths: StagingPaths,
    mover: PickupMover,
    settle: Duration,
}

impl MetadataExtractor {
    pub fn new(probe: Arc<dyn MediaProbe>, paths: StagingPaths) -> Self {
        let mover = PickupMover::new(paths.pickup_dir.clone());
        Self {
            probe,
            paths,
            mover,
            settle: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            Arc::new(CommandProbe::new(&config.probe)),
            StagingPaths::from_config(config),
        )
        .with_settle_delay(config.watch.poll_interval())
    }

    /// How long an unparseable manifest is given to finish being written
    /// before it is quarantined.
    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn paths(&self) -> &StagingPaths {
        &self.paths
    }

    pub async fn process(&self, manifest_path: &Path) -> ExtractResult<ExtractOutcome> {
        let bytes = read_staged(manifest_path).await?;
        let parsed = match Manifest::from_slice(&bytes) {
            Ok(manifest) => Ok(manifest),
            Err(err) => {
                // A copy that did not go through a rename may still be in flight.
                warn!(
                    manifest = %manifest_path.display(),
                    error = %err,
                    settle_ms = self.settle.as_millis() as u64,
                    "staged manifest does not parse yet, re-reading after settle delay"
                );
                tokio::time::sleep(self.settle).await;
                Manifest::from_slice(&read_staged(manifest_path).await?)
            }
        };
        let mut manifest = match parsed {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!(manifest = %manifest_path.display(), error = %err, "unparseable staged manifest");
                let reason = format!("unparseable manifest: {err}");
                let quarantined = self.quarantine(manifest_path).await?;
                return Ok(ExtractOutcome::Quarantined {
                    manifest: quarantined,
                    reason,
                });
            }
        };
        manifest.processing_attempted.push(Utc::now().to_rfc3339());

        let media = paired_media_path(manifest_path);
        let (media, resumed) = if fs::metadata(&media).await.is_ok() {
            (media, false)
        } else {
            match self.interrupted_media(manifest_path).await? {
                Some(picked_media) => (picked_media, true),
                None => {
                    let missing = MissingPairError {
                        manifest: manifest_path.to_path_buf(),
                        media,
                    };
                    warn!(error = %missing, "quarantining manifest without media");
                    self.rewrite(manifest_path, &manifest).await?;
                    let quarantined = self.quarantine(manifest_path).await?;
                    return Ok(ExtractOutcome::Quarantined {
                        manifest: quarantined,
                        reason: missing.to_string(),
                    });
                }
            }
        };

        let media_info = match self.probe.probe(&media).await {
            Ok(text) => parse_probe_output(&text),
            Err(err) => {
                warn!(media = %media.display(), error = %err, "probe failed, continuing without media info");
                MediaInfo::default()
            }
        };
        manifest.media_info = Some(media_info.clone());
        self.rewrite(manifest_path, &manifest).await?;

        let picked = if resumed {
            self.mover.complete_pair(manifest_path).await?
        } else {
            self.mover.move_pair(manifest_path, &media).await?
        };
        info!(
            manifest = %picked.manifest.display(),
            duration_seconds = ?media_info.duration_seconds,
            resumed,
            "manifest processed"
        );
        Ok(ExtractOutcome::PickedUp {
            picked,
            media_info,
            resumed,
        })
    }

    /// Media already in pickup with no manifest there yet means an earlier
    /// pickup move stopped between its two renames.
    async fn interrupted_media(&self, manifest_path: &Path) -> ExtractResult<Option<PathBuf>> {
        let stem = file_stem(manifest_path)?;
        let media = self.mover.media_target(&stem);
        let manifest = self.mover.manifest_target(&stem);
        let media_present = fs::metadata(&media).await.is_ok();
        let manifest_present = fs::metadata(&manifest).await.is_ok();
        Ok((media_present && !manifest_present).then_some(media))
    }

    async fn rewrite(&self, manifest_path: &Path, manifest: &Manifest) -> ExtractResult<()> {
        let payload = manifest
            .to_pretty_json()
            .map_err(|source| MigrationError::Serialize {
                source,
                path: manifest_path.to_path_buf(),
            })?;
        write_atomic(manifest_path, &payload).await?;
        Ok(())
    }

    async fn quarantine(&self, manifest_path: &Path) -> ExtractResult<PathBuf> {
        let stem = file_stem(manifest_path)?;
        let target = vacant_manifest_path(&self.paths.error_dir, &stem).await;
        move_file(manifest_path, &target).await?;
        info!(
            manifest = %manifest_path.display(),
            destination = %target.display(),
            "manifest quarantined"
        );
        Ok(target)
    }
}

async fn read_staged(manifest_path: &Path) -> ExtractResult<Vec<u8>> {
    match fs::read(manifest_path).await {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(ExtractError::Vanished(manifest_path.to_path_buf()))
        }
        Err(source) => Err(MigrationError::Read {
            source,
            path: manifest_path.to_path_buf(),
        }
        .into()),
    }
}
