use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::models::{is_category_index, is_manifest_file, Manifest, VideoDescriptor};

pub type ScanResult<T> = Result<T, ScanError>;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan root {0} not found")]
    MissingRoot(PathBuf),
    #[error("failed to walk {path}: {source}")]
    Walk {
        source: walkdir::Error,
        path: PathBuf,
    },
    #[error("failed to read manifest {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("unparseable manifest {path}: {source}")]
    Parse {
        source: serde_json::Error,
        path: PathBuf,
    },
}

impl ScanError {
    pub fn path(&self) -> &Path {
        match self {
            ScanError::MissingRoot(path) => path,
            ScanError::Walk { path, .. } => path,
            ScanError::Io { path, .. } => path,
            ScanError::Parse { path, .. } => path,
        }
    }
}

/// Manifest path → descriptor, for one source type.
pub type DescriptorMap = BTreeMap<PathBuf, VideoDescriptor>;

#[derive(Debug, Default)]
pub struct ScanReport {
    pub manifests_seen: usize,
    pub by_type: BTreeMap<String, DescriptorMap>,
    pub errors: Vec<ScanError>,
}

impl ScanReport {
    pub fn descriptor_count(&self) -> usize {
        self.by_type.values().map(BTreeMap::len).sum()
    }

    pub fn manifests(&self) -> impl Iterator<Item = &Path> {
        self.by_type
            .values()
            .flat_map(|entries| entries.keys().map(PathBuf::as_path))
    }
}

/// Walks a directory tree and groups video descriptors by source type.
#[derive(Debug, Clone)]
pub struct ManifestScanner {
    root: PathBuf,
}

impl ManifestScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scan(&self) -> ScanResult<ScanReport> {
        if !self.root.is_dir() {
            return Err(ScanError::MissingRoot(self.root.clone()));
        }
        info!(root = %self.root.display(), "scanning for manifests");

        let mut report = ScanReport::default();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(source) => {
                    let path = source
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    warn!(path = %path.display(), error = %source, "skipping unreadable entry");
                    report.errors.push(ScanError::Walk { source, path });
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file() || !is_manifest_file(path) || is_category_index(path)
            {
                continue;
            }

            report.manifests_seen += 1;
            match read_manifest(path) {
                Ok(manifest) => group_descriptors(&mut report, path, manifest),
                Err(err) => {
                    warn!(manifest = %path.display(), error = %err, "manifest skipped");
                    report.errors.push(err);
                }
            }
        }

        info!(
            manifests = report.manifests_seen,
            descriptors = report.descriptor_count(),
            types = report.by_type.len(),
            errors = report.errors.len(),
            "manifest scan finished"
        );
        Ok(report)
    }
}

fn read_manifest(path: &Path) -> ScanResult<Manifest> {
    let bytes = fs::read(path).map_err(|source| ScanError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    Manifest::from_slice(&bytes).map_err(|source| ScanError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

fn group_descriptors(report: &mut ScanReport, path: &Path, manifest: Manifest) {
    for descriptor in manifest.videos.unwrap_or_default() {
        let Some(source_type) = descriptor.source_type.clone() else {
            debug!(manifest = %path.display(), "descriptor without type dropped");
            continue;
        };
        report
            .by_type
            .entry(source_type)
            .or_default()
            .insert(path.to_path_buf(), descriptor);
    }
}
