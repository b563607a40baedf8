use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    pub paths: PathsSection,
    #[serde(default)]
    pub download: DownloadSection,
    #[serde(default)]
    pub site: SiteSection,
    #[serde(default)]
    pub probe: ProbeSection,
    #[serde(default)]
    pub watch: WatchSection,
}

impl PipelineConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn scan_root(&self) -> PathBuf {
        self.resolve_path(&self.paths.scan_root)
    }

    pub fn drop_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.drop_dir)
    }

    pub fn error_dir(&self) -> PathBuf {
        match &self.paths.error_dir {
            Some(dir) => self.resolve_path(dir),
            None => self.drop_dir().join("errors"),
        }
    }

    pub fn pickup_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.pickup_dir)
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.download.workers == 0 {
            return Err(ConfigError::Invalid {
                field: "download.workers",
                reason: "must be greater than zero".into(),
            });
        }
        if self.download.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                field: "download.chunk_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.watch.channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "watch.channel_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        if self.probe.program.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "probe.program",
                reason: "must name an executable".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    #[serde(default = "default_base_dir")]
    pub base_dir: String,
    pub scan_root: String,
    pub drop_dir: String,
    #[serde(default)]
    pub error_dir: Option<String>,
    pub pickup_dir: String,
}

fn default_base_dir() -> String {
    ".".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadSection {
    pub workers: usize,
    pub connect_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
    pub chunk_size: usize,
    pub delete_source_manifests: bool,
    pub user_agent: String,
}

impl DownloadSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            workers: 2,
            connect_timeout_seconds: 3,
            read_timeout_seconds: 10,
            chunk_size: 16 * 1024,
            delete_source_manifests: true,
            user_agent: "antioch/0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteSection {
    /// Source types routed to the site extractor instead of a plain GET.
    pub types: Vec<String>,
    pub extractor: String,
    pub extractor_args: Vec<String>,
    pub timeout_seconds: u64,
}

impl SiteSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            types: vec!["youtube".to_string()],
            extractor: "yt-dlp".to_string(),
            extractor_args: vec!["--dump-single-json".to_string(), "--no-warnings".to_string()],
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeSection {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_seconds: u64,
}

impl ProbeSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for ProbeSection {
    fn default() -> Self {
        Self {
            program: "ffprobe".to_string(),
            args: vec!["-hide_banner".to_string()],
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchSection {
    pub poll_interval_ms: u64,
    pub channel_capacity: usize,
}

impl WatchSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            channel_capacity: 64,
        }
    }
}

pub fn load_pipeline_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let config: PipelineConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/antioch.toml");
        let config = load_pipeline_config(path).expect("config should parse");
        assert_eq!(config.download.workers, 2);
        assert_eq!(config.download.chunk_size, 16 * 1024);
        assert_eq!(config.site.types, vec!["youtube".to_string()]);
        assert_eq!(config.probe.program, "ffprobe");
        assert!(config.error_dir().ends_with("videos/errors"));
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [paths]
            base_dir = "/srv/antioch"
            scan_root = "data"
            drop_dir = "drop"
            pickup_dir = "/mnt/pickup"
            "#,
        )
        .unwrap();
        assert_eq!(config.scan_root(), PathBuf::from("/srv/antioch/data"));
        assert_eq!(config.error_dir(), PathBuf::from("/srv/antioch/drop/errors"));
        assert_eq!(config.pickup_dir(), PathBuf::from("/mnt/pickup"));
        assert_eq!(config.download.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.download.read_timeout(), Duration::from_secs(10));
        assert!(config.download.delete_source_manifests);
        config.validate().unwrap();
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config: PipelineConfig = toml::from_str(
            r#"
            [paths]
            scan_root = "data"
            drop_dir = "drop"
            pickup_dir = "pickup"
            "#,
        )
        .unwrap();
        config.download.workers = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "download.workers",
                ..
            }
        ));
    }
}
