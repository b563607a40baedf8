use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};

use crate::manifest::{MANIFEST_EXTENSION, MEDIA_EXTENSION};

use super::{file_stem, is_temporary, move_file, MigrationError, MigrationResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PickedUp {
    pub manifest: PathBuf,
    pub media: PathBuf,
}

/// Relocates a processed manifest and its media into the pickup folder.
#[derive(Debug, Clone)]
pub struct PickupMover {
    pickup_dir: PathBuf,
}

impl PickupMover {
    pub fn new(pickup_dir: PathBuf) -> Self {
        Self { pickup_dir }
    }

    pub fn pickup_dir(&self) -> &Path {
        &self.pickup_dir
    }

    /// Pickup location of a media file with the given stem.
    pub fn media_target(&self, stem: &str) -> PathBuf {
        self.pickup_dir.join(format!("{stem}.{MEDIA_EXTENSION}"))
    }

    pub fn manifest_target(&self, stem: &str) -> PathBuf {
        self.pickup_dir.join(format!("{stem}.{MANIFEST_EXTENSION}"))
    }

    /// Media goes first, then the manifest. A crash in between leaves media
    /// in pickup without its manifest.
    pub async fn move_pair(&self, manifest: &Path, media: &Path) -> MigrationResult<PickedUp> {
        let stem = file_stem(manifest)?;
        let media_target = self.media_target(&stem);
        let manifest_target = self.manifest_target(&stem);

        move_file(media, &media_target).await?;
        if let Err(err) = move_file(manifest, &manifest_target).await {
            warn!(
                manifest = %manifest.display(),
                media = %media_target.display(),
                error = %err,
                "media moved to pickup but manifest did not follow"
            );
            return Err(err);
        }

        info!(
            manifest = %manifest_target.display(),
            media = %media_target.display(),
            "pair moved to pickup"
        );
        Ok(PickedUp {
            manifest: manifest_target,
            media: media_target,
        })
    }

    /// Finishes an interrupted [`move_pair`](Self::move_pair): the media is
    /// already in pickup and only the manifest is left to move.
    pub async fn complete_pair(&self, manifest: &Path) -> MigrationResult<PickedUp> {
        let stem = file_stem(manifest)?;
        let manifest_target = self.manifest_target(&stem);
        if fs::metadata(&manifest_target).await.is_ok() {
            return Err(MigrationError::Move {
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "pickup already holds a manifest with this stem",
                ),
                from: manifest.to_path_buf(),
                to: manifest_target,
            });
        }
        move_file(manifest, &manifest_target).await?;
        info!(manifest = %manifest_target.display(), "resumed interrupted pickup move");
        Ok(PickedUp {
            manifest: manifest_target,
            media: self.media_target(&stem),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PickupAudit {
    pub paired: Vec<String>,
    pub orphaned_manifests: Vec<PathBuf>,
    pub orphaned_media: Vec<PathBuf>,
}

impl PickupAudit {
    pub fn is_consistent(&self) -> bool {
        self.orphaned_manifests.is_empty() && self.orphaned_media.is_empty()
    }
}

#[derive(Default)]
struct Slot {
    manifest: Option<PathBuf>,
    media: Option<PathBuf>,
}

/// Pairs `*.json` with `*.movie` by stem. Anything else in the folder,
/// such as the archiver's table of contents, is ignored.
pub async fn audit_pickup(pickup_dir: &Path) -> MigrationResult<PickupAudit> {
    let read_err = |source| MigrationError::Read {
        source,
        path: pickup_dir.to_path_buf(),
    };
    let mut entries = fs::read_dir(pickup_dir).await.map_err(read_err)?;
    let mut slots: BTreeMap<String, Slot> = BTreeMap::new();

    while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
        let path = entry.path();
        if is_temporary(&path) || !entry.file_type().await.map_err(read_err)?.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some(MANIFEST_EXTENSION) => slots.entry(stem).or_default().manifest = Some(path),
            Some(MEDIA_EXTENSION) => slots.entry(stem).or_default().media = Some(path),
            _ => {}
        }
    }

    let mut audit = PickupAudit::default();
    for (stem, slot) in slots {
        match (slot.manifest, slot.media) {
            (Some(_), Some(_)) => audit.paired.push(stem),
            (Some(manifest), None) => audit.orphaned_manifests.push(manifest),
            (None, Some(media)) => audit.orphaned_media.push(media),
            (None, None) => {}
        }
    }
    if !audit.is_consistent() {
        warn!(
            pickup = %pickup_dir.display(),
            orphaned_manifests = audit.orphaned_manifests.len(),
            orphaned_media = audit.orphaned_media.len(),
            "pickup folder holds unpaired files"
        );
    }
    Ok(audit)
}
