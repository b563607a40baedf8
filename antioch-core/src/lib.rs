pub mod config;
pub mod dispatch;
pub mod error;
pub mod extractor;
pub mod fetch;
pub mod manifest;
pub mod probe;
pub mod shutdown;
pub mod staging;
pub mod watcher;

pub use config::{
    load_pipeline_config, DownloadSection, PathsSection, PipelineConfig, ProbeSection,
    SiteSection, WatchSection,
};
pub use dispatch::{
    DispatchError, DispatchReport, DispatchResult, Dispatcher, ItemError, ItemStage,
};
pub use error::{ConfigError, Result};
pub use extractor::{
    ExtractError, ExtractOutcome, ExtractResult, MetadataExtractor, MissingPairError,
};
pub use fetch::{FetchError, FetchResult, FetchStrategy, FetchedMedia, Fetcher};
pub use manifest::{
    DescriptorMap, Manifest, ManifestScanner, MediaInfo, MovieFile, Resolution, ScanError,
    ScanReport, ScanResult, VideoDescriptor,
};
pub use probe::{parse_probe_output, CommandProbe, MediaProbe, ProbeError, ProbeResult};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
pub use staging::{
    audit_pickup, MigrationError, MigrationResult, PickedUp, PickupAudit, PickupMover,
    StagingPaths, StateWriter,
};
pub use watcher::{list_staged_manifests, StageWatcher, WatchError, WatchResult, WatchSummary};
