mod error;
mod site;
mod transfer;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;

use crate::config::{DownloadSection, PipelineConfig};
use crate::manifest::VideoDescriptor;

pub use error::{FetchError, FetchResult};
pub use site::{codec_boost, parse_variants, select_variant, SiteExtractor, Variant};
pub use transfer::{unique_media_path, FetchedMedia, Transfer};

/// How a source type is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    /// Site-specific extraction followed by a quality-ranked download.
    Site,
    /// Plain streaming GET of the descriptor URL.
    Generic,
}

impl FetchStrategy {
    /// Never fails: anything not registered as a site type is generic.
    pub fn resolve(source_type: &str, site_types: &[String]) -> Self {
        if site_types
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(source_type))
        {
            FetchStrategy::Site
        } else {
            FetchStrategy::Generic
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    transfer: Transfer,
    site: SiteExtractor,
    site_types: Arc<Vec<String>>,
    drop_dir: PathBuf,
}

impl Fetcher {
    pub fn new(config: &PipelineConfig) -> FetchResult<Self> {
        let client = build_client(&config.download)?;
        let transfer = Transfer::new(
            client,
            config.download.chunk_size,
            config.download.connect_timeout(),
            config.download.read_timeout(),
        );
        Ok(Self {
            transfer,
            site: SiteExtractor::new(&config.site),
            site_types: Arc::new(config.site.types.clone()),
            drop_dir: config.drop_dir(),
        })
    }

    pub fn drop_dir(&self) -> &Path {
        &self.drop_dir
    }

    pub fn strategy_for(&self, source_type: &str) -> FetchStrategy {
        FetchStrategy::resolve(source_type, &self.site_types)
    }

    pub async fn fetch(
        &self,
        strategy: FetchStrategy,
        descriptor: &VideoDescriptor,
    ) -> FetchResult<FetchedMedia> {
        let url = descriptor
            .url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or(FetchError::MissingUrl)?;
        match strategy {
            FetchStrategy::Generic => self.transfer.download(url, &self.drop_dir).await,
            FetchStrategy::Site => {
                let variant = self.site.choose(url).await?;
                self.transfer.download(&variant.url, &self.drop_dir).await
            }
        }
    }
}

fn build_client(section: &DownloadSection) -> FetchResult<Client> {
    Client::builder()
        .user_agent(section.user_agent.clone())
        .connect_timeout(section.connect_timeout())
        .build()
        .map_err(|err| FetchError::Network(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_types_resolve_to_generic() {
        let site = vec!["youtube".to_string()];
        assert_eq!(FetchStrategy::resolve("youtube", &site), FetchStrategy::Site);
        assert_eq!(FetchStrategy::resolve("YouTube", &site), FetchStrategy::Site);
        assert_eq!(FetchStrategy::resolve("mp4", &site), FetchStrategy::Generic);
        assert_eq!(FetchStrategy::resolve("", &site), FetchStrategy::Generic);
        assert_eq!(FetchStrategy::resolve("youtube", &[]), FetchStrategy::Generic);
    }
}
