mod pickup;
mod writer;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::manifest::MANIFEST_EXTENSION;

pub use pickup::{audit_pickup, PickupAudit, PickupMover, PickedUp};
pub use writer::{Migration, OutcomeClass, StateWriter};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("manifest {path} is not valid json: {source}")]
    Parse {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[error("failed to serialize manifest {path}: {source}")]
    Serialize {
        source: serde_json::Error,
        path: PathBuf,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("failed to move {from} to {to}: {source}")]
    Move {
        source: std::io::Error,
        from: PathBuf,
        to: PathBuf,
    },
    #[error("invalid manifest path {0}")]
    InvalidPath(PathBuf),
}

pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(Debug, Clone)]
pub struct StagingPaths {
    pub drop_dir: PathBuf,
    pub error_dir: PathBuf,
    pub pickup_dir: PathBuf,
}

impl StagingPaths {
    pub fn new(drop_dir: PathBuf, error_dir: PathBuf, pickup_dir: PathBuf) -> Self {
        Self {
            drop_dir,
            error_dir,
            pickup_dir,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.drop_dir(), config.error_dir(), config.pickup_dir())
    }

    pub async fn ensure(&self) -> MigrationResult<()> {
        for dir in [&self.drop_dir, &self.error_dir, &self.pickup_dir] {
            fs::create_dir_all(dir)
                .await
                .map_err(|source| MigrationError::Write {
                    source,
                    path: dir.clone(),
                })?;
        }
        Ok(())
    }
}

/// Hidden temporary files written next to their destination.
pub fn is_temporary(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.') && name.ends_with(".tmp"))
        .unwrap_or(false)
}

pub(crate) fn file_stem(path: &Path) -> MigrationResult<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .ok_or_else(|| MigrationError::InvalidPath(path.to_path_buf()))
}

/// `<dir>/<stem>.json`, or a suffixed variant when that name is taken so an
/// earlier error manifest is never overwritten.
pub(crate) async fn vacant_manifest_path(dir: &Path, stem: &str) -> PathBuf {
    let candidate = dir.join(format!("{stem}.{MANIFEST_EXTENSION}"));
    if fs::metadata(&candidate).await.is_err() {
        return candidate;
    }
    let suffix = Uuid::new_v4().simple().to_string();
    dir.join(format!("{stem}-{}.{MANIFEST_EXTENSION}", &suffix[..8]))
}

/// Writes `bytes` to a hidden file in the destination folder, syncs it and
/// renames it over `dest`. Readers see either the old file or the new one.
pub async fn write_atomic(dest: &Path, bytes: &[u8]) -> MigrationResult<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| MigrationError::InvalidPath(dest.to_path_buf()))?;
    let name = dest
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| MigrationError::InvalidPath(dest.to_path_buf()))?;
    let tmp = parent.join(format!(".{name}.{}.tmp", Uuid::new_v4().simple()));

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, dest).await
    }
    .await;

    if let Err(source) = result {
        let _ = fs::remove_file(&tmp).await;
        return Err(MigrationError::Write {
            source,
            path: dest.to_path_buf(),
        });
    }
    Ok(())
}

/// Renames `from` to `to`, falling back to copy + rename + remove when the
/// two paths live on different filesystems.
pub async fn move_file(from: &Path, to: &Path) -> MigrationResult<()> {
    let rename_err = match fs::rename(from, to).await {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    if fs::metadata(from).await.is_err() {
        return Err(MigrationError::Move {
            source: rename_err,
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
    }

    let parent = to
        .parent()
        .ok_or_else(|| MigrationError::InvalidPath(to.to_path_buf()))?;
    let tmp = parent.join(format!(".move.{}.tmp", Uuid::new_v4().simple()));
    let copied = async {
        fs::copy(from, &tmp).await?;
        fs::rename(&tmp, to).await
    }
    .await;
    if copied.is_err() {
        let _ = fs::remove_file(&tmp).await;
        return Err(MigrationError::Move {
            source: rename_err,
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
    }
    fs::remove_file(from)
        .await
        .map_err(|source| MigrationError::Move {
            source,
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn atomic_write_replaces_and_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("a.json");
        std::fs::write(&dest, b"old").unwrap();

        write_atomic(&dest, b"new").await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a.json")]);
    }

    #[tokio::test]
    async fn atomic_write_into_missing_folder_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("missing").join("a.json");
        let err = write_atomic(&dest, b"x").await.unwrap_err();
        assert!(matches!(err, MigrationError::Write { .. }));
    }

    #[test]
    fn temporary_names_are_recognised() {
        assert!(is_temporary(Path::new("/d/.abc.json.1234.tmp")));
        assert!(!is_temporary(Path::new("/d/abc.json")));
        assert!(!is_temporary(Path::new("/d/abc.tmp")));
    }

    #[tokio::test]
    async fn move_file_renames_within_folder_tree() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("a.movie");
        let to_dir = dir.path().join("pickup");
        std::fs::create_dir_all(&to_dir).unwrap();
        std::fs::write(&from, b"media").unwrap();

        move_file(&from, &to_dir.join("a.movie")).await.unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(to_dir.join("a.movie")).unwrap(), b"media");
    }
}
