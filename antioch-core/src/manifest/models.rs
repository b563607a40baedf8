use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const MANIFEST_EXTENSION: &str = "json";
pub const MEDIA_EXTENSION: &str = "movie";
pub const CATEGORY_INDEX: &str = "category.json";

/// Per-item JSON record. Fields the pipeline does not know about are kept in
/// `extra` and written back untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videos: Option<Vec<VideoDescriptor>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub download_attempted: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processing_attempted: Vec<String>,
    #[serde(
        default,
        deserialize_with = "present_movie_file",
        skip_serializing_if = "Option::is_none"
    )]
    pub movie_file: Option<MovieFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesize: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_info: Option<MediaInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn to_pretty_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn descriptors(&self) -> &[VideoDescriptor] {
        self.videos.as_deref().unwrap_or(&[])
    }

    /// Path of the fetched media, if the download phase succeeded.
    pub fn movie_path(&self) -> Option<&Path> {
        match &self.movie_file {
            Some(MovieFile::Fetched(path)) => Some(path.as_path()),
            _ => None,
        }
    }
}

/// `movie_file` is either a path or an explicit `null` recorded after a
/// failed download. An absent field deserializes as `None` on the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MovieFile {
    Fetched(PathBuf),
    Missing,
}

impl Serialize for MovieFile {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            MovieFile::Fetched(path) => path.serialize(serializer),
            MovieFile::Missing => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for MovieFile {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<PathBuf>::deserialize(deserializer)?;
        Ok(value.map(MovieFile::Fetched).unwrap_or(MovieFile::Missing))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VideoDescriptor {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub resolution: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub audio_bitrate: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl MediaInfo {
    pub fn is_empty(&self) -> bool {
        self.duration.is_none()
            && self.duration_seconds.is_none()
            && self.bitrate.is_none()
            && self.resolution.is_none()
    }
}

fn present_movie_file<'de, D>(deserializer: D) -> Result<Option<MovieFile>, D::Error>
where
    D: Deserializer<'de>,
{
    MovieFile::deserialize(deserializer).map(Some)
}

/// Accepts `720`, `720.0`, `"720"` and `"720p"`; anything else reads as absent.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(number_from_value))
}

fn number_from_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64))
            .and_then(|v| u32::try_from(v).ok()),
        Value::String(text) => {
            let digits: String = text
                .trim()
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

/// Media file sharing the manifest's stem in the same folder.
pub fn paired_media_path(manifest_path: &Path) -> PathBuf {
    manifest_path.with_extension(MEDIA_EXTENSION)
}

pub fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(MANIFEST_EXTENSION))
        .unwrap_or(false)
}

pub fn is_category_index(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.eq_ignore_ascii_case(CATEGORY_INDEX))
        .unwrap_or(false)
}
