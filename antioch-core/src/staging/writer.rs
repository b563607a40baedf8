use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};

use crate::fetch::{FetchError, FetchedMedia};
use crate::manifest::{Manifest, MovieFile, MANIFEST_EXTENSION};

use super::{
    file_stem, vacant_manifest_path, write_atomic, MigrationError, MigrationResult, StagingPaths,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub class: OutcomeClass,
    pub manifest: PathBuf,
    /// Set when the rewritten copy landed but the source could not be removed.
    pub source_retained: bool,
}

/// Owns manifest mutation during the download phase.
#[derive(Debug, Clone)]
pub struct StateWriter {
    paths: StagingPaths,
    delete_source: bool,
}

impl StateWriter {
    pub fn new(paths: StagingPaths, delete_source: bool) -> Self {
        Self {
            paths,
            delete_source,
        }
    }

    pub fn paths(&self) -> &StagingPaths {
        &self.paths
    }

    /// Folds one download outcome into the source manifest and migrates it to
    /// the success or error folder. On failure the source manifest is left in
    /// place; a fetched media file that cannot be paired is removed.
    pub async fn record_download(
        &self,
        source_type: &str,
        original: &Path,
        outcome: &Result<FetchedMedia, FetchError>,
    ) -> MigrationResult<Migration> {
        let result = self.migrate(source_type, original, outcome).await;
        if let (Err(err), Ok(media)) = (&result, outcome) {
            warn!(
                manifest = %original.display(),
                media = %media.path.display(),
                error = %err,
                "migration failed, discarding fetched media"
            );
            if let Err(remove_err) = fs::remove_file(&media.path).await {
                warn!(media = %media.path.display(), error = %remove_err, "failed to discard media");
            }
        }
        result
    }

    async fn migrate(
        &self,
        source_type: &str,
        original: &Path,
        outcome: &Result<FetchedMedia, FetchError>,
    ) -> MigrationResult<Migration> {
        let bytes = fs::read(original)
            .await
            .map_err(|source| MigrationError::Read {
                source,
                path: original.to_path_buf(),
            })?;
        let mut manifest = Manifest::from_slice(&bytes).map_err(|source| MigrationError::Parse {
            source,
            path: original.to_path_buf(),
        })?;

        manifest.container_type = Some(source_type.to_string());
        manifest.original_file = Some(original.to_path_buf());
        manifest.download_attempted.push(Utc::now().to_rfc3339());
        manifest.videos = None;

        let (class, destination) = match outcome {
            Ok(media) => {
                let size = fs::metadata(&media.path)
                    .await
                    .map_err(|source| MigrationError::Read {
                        source,
                        path: media.path.clone(),
                    })?
                    .len();
                manifest.movie_file = Some(MovieFile::Fetched(media.path.clone()));
                manifest.filesize = Some(i64::try_from(size).unwrap_or(i64::MAX));
                let stem = file_stem(&media.path)?;
                (
                    OutcomeClass::Success,
                    self.paths
                        .drop_dir
                        .join(format!("{stem}.{MANIFEST_EXTENSION}")),
                )
            }
            Err(_) => {
                manifest.movie_file = Some(MovieFile::Missing);
                manifest.filesize = Some(-1);
                let stem = file_stem(original)?;
                (
                    OutcomeClass::Failure,
                    vacant_manifest_path(&self.paths.error_dir, &stem).await,
                )
            }
        };

        let payload = manifest
            .to_pretty_json()
            .map_err(|source| MigrationError::Serialize {
                source,
                path: destination.clone(),
            })?;
        write_atomic(&destination, &payload).await?;

        let mut source_retained = !self.delete_source;
        if self.delete_source && original != destination {
            if let Err(err) = fs::remove_file(original).await {
                warn!(
                    manifest = %original.display(),
                    error = %err,
                    "migrated copy written but source manifest could not be removed"
                );
                source_retained = true;
            }
        }

        info!(
            manifest = %original.display(),
            destination = %destination.display(),
            outcome = ?class,
            "manifest migrated"
        );
        Ok(Migration {
            class,
            manifest: destination,
            source_retained,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn layout(dir: &TempDir) -> StagingPaths {
        let drop_dir = dir.path().join("drop");
        let paths = StagingPaths::new(
            drop_dir.clone(),
            drop_dir.join("errors"),
            dir.path().join("pickup"),
        );
        std::fs::create_dir_all(&paths.error_dir).unwrap();
        std::fs::create_dir_all(&paths.pickup_dir).unwrap();
        paths
    }

    fn source_manifest(dir: &TempDir) -> PathBuf {
        let source = dir.path().join("data").join("talk.json");
        std::fs::create_dir_all(source.parent().unwrap()).unwrap();
        std::fs::write(
            &source,
            json!({
                "title": "A talk",
                "videos": [{"type": "mp4", "url": "https://cdn/talk.mp4"}]
            })
            .to_string(),
        )
        .unwrap();
        source
    }

    fn read_json(path: &Path) -> Value {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn success_lands_in_drop_with_media_stem() {
        let dir = TempDir::new().unwrap();
        let paths = layout(&dir);
        let source = source_manifest(&dir);
        let media = paths.drop_dir.join("0123abcd.movie");
        std::fs::write(&media, vec![1u8; 42]).unwrap();

        let writer = StateWriter::new(paths.clone(), true);
        let outcome = Ok(FetchedMedia {
            path: media.clone(),
            size_bytes: 1,
        });
        let migration = writer.record_download("mp4", &source, &outcome).await.unwrap();

        assert_eq!(migration.class, OutcomeClass::Success);
        assert_eq!(migration.manifest, paths.drop_dir.join("0123abcd.json"));
        assert!(!source.exists());
        let value = read_json(&migration.manifest);
        assert_eq!(value["filesize"], json!(42));
        assert_eq!(value["movie_file"], json!(media.to_string_lossy()));
        assert_eq!(value["container_type"], json!("mp4"));
        assert_eq!(value["title"], json!("A talk"));
        assert_eq!(value["download_attempted"].as_array().unwrap().len(), 1);
        assert!(value.get("videos").is_none());
    }

    #[tokio::test]
    async fn failure_lands_in_errors_with_sentinels() {
        let dir = TempDir::new().unwrap();
        let paths = layout(&dir);
        let source = source_manifest(&dir);

        let writer = StateWriter::new(paths.clone(), true);
        let outcome = Err(FetchError::MissingUrl);
        let migration = writer.record_download("mp4", &source, &outcome).await.unwrap();

        assert_eq!(migration.class, OutcomeClass::Failure);
        assert_eq!(migration.manifest, paths.error_dir.join("talk.json"));
        let value = read_json(&migration.manifest);
        assert_eq!(value["movie_file"], Value::Null);
        assert_eq!(value["filesize"], json!(-1));
        assert_eq!(
            value["original_file"],
            json!(source.to_string_lossy())
        );
        assert!(!source.exists());
    }

    #[tokio::test]
    async fn repeated_failure_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let paths = layout(&dir);
        std::fs::write(paths.error_dir.join("talk.json"), b"{}").unwrap();
        let source = source_manifest(&dir);

        let writer = StateWriter::new(paths.clone(), true);
        let migration = writer
            .record_download("mp4", &source, &Err(FetchError::MissingUrl))
            .await
            .unwrap();

        assert_ne!(migration.manifest, paths.error_dir.join("talk.json"));
        assert_eq!(std::fs::read(paths.error_dir.join("talk.json")).unwrap(), b"{}");
    }

    #[tokio::test]
    async fn write_failure_keeps_source_and_discards_media() {
        let dir = TempDir::new().unwrap();
        let paths = layout(&dir);
        let source = source_manifest(&dir);
        let media = paths.drop_dir.join("feedbeef.movie");
        std::fs::write(&media, b"bytes").unwrap();

        let broken = StagingPaths::new(
            dir.path().join("does-not-exist"),
            paths.error_dir.clone(),
            paths.pickup_dir.clone(),
        );
        let writer = StateWriter::new(broken, true);
        let outcome = Ok(FetchedMedia {
            path: media.clone(),
            size_bytes: 5,
        });
        let err = writer
            .record_download("mp4", &source, &outcome)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::Write { .. }));
        assert!(source.exists());
        assert!(!media.exists());
    }

    #[tokio::test]
    async fn keeping_sources_marks_them_retained() {
        let dir = TempDir::new().unwrap();
        let paths = layout(&dir);
        let source = source_manifest(&dir);

        let writer = StateWriter::new(paths, false);
        let migration = writer
            .record_download("mp4", &source, &Err(FetchError::MissingUrl))
            .await
            .unwrap();
        assert!(migration.source_retained);
        assert!(source.exists());
    }
}
