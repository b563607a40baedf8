pub mod models;
pub mod scanner;

pub use models::{
    is_category_index, is_manifest_file, paired_media_path, Manifest, MediaInfo, MovieFile,
    Resolution, VideoDescriptor, CATEGORY_INDEX, MANIFEST_EXTENSION, MEDIA_EXTENSION,
};
pub use scanner::{DescriptorMap, ManifestScanner, ScanError, ScanReport, ScanResult};
