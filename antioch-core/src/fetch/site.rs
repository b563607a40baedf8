use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::SiteSection;

use super::error::{FetchError, FetchResult};

/// Multiplier applied to the resolution when ranking encodings. Newer
/// containers rank above legacy ones; unknown containers rank lowest.
pub fn codec_boost(extension: &str) -> u64 {
    match extension.trim().to_ascii_lowercase().as_str() {
        "webm" => 3,
        "mp4" => 2,
        "3gp" | "flv" => 1,
        _ => 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub url: String,
    pub resolution: u32,
    pub extension: String,
    pub audio_bitrate: u32,
}

impl Variant {
    pub fn score(&self) -> u64 {
        u64::from(self.resolution) * codec_boost(&self.extension) + u64::from(self.audio_bitrate)
    }
}

/// Highest scoring variant. Equal scores resolve to whichever the iterator
/// yields last; callers must not rely on a particular winner.
pub fn select_variant(variants: &[Variant]) -> Option<&Variant> {
    variants.iter().max_by_key(|variant| variant.score())
}

#[derive(Debug, Deserialize)]
struct ExtractorOutput {
    #[serde(default)]
    formats: Vec<ExtractorFormat>,
}

#[derive(Debug, Deserialize)]
struct ExtractorFormat {
    url: Option<String>,
    ext: Option<String>,
    height: Option<f64>,
    abr: Option<f64>,
    vcodec: Option<String>,
}

/// Parses the extractor's JSON dump into candidate variants, skipping
/// audio-only streams and entries without a direct URL.
pub fn parse_variants(payload: &[u8]) -> FetchResult<Vec<Variant>> {
    let output: ExtractorOutput = serde_json::from_slice(payload)?;
    let variants = output
        .formats
        .into_iter()
        .filter(|format| format.vcodec.as_deref() != Some("none"))
        .filter_map(|format| {
            let url = format.url?;
            Some(Variant {
                url,
                resolution: format.height.map(|h| h.max(0.0) as u32).unwrap_or(0),
                extension: format.ext.unwrap_or_default(),
                audio_bitrate: format.abr.map(|a| a.max(0.0).round() as u32).unwrap_or(0),
            })
        })
        .collect();
    Ok(variants)
}

/// Runs the configured site extractor for a page URL and lists its encodings.
#[derive(Debug, Clone)]
pub struct SiteExtractor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SiteExtractor {
    pub fn new(section: &SiteSection) -> Self {
        Self {
            program: section.extractor.clone(),
            args: section.extractor_args.clone(),
            timeout: section.timeout(),
        }
    }

    pub async fn variants(&self, page_url: &str) -> FetchResult<Vec<Variant>> {
        let mut command = Command::new(&self.program);
        command
            .kill_on_drop(true)
            .args(&self.args)
            .arg(page_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let output = match timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(FetchError::Extractor(format!(
                    "failed to run {}: {err}",
                    self.program
                )))
            }
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: page_url.to_string(),
                    stage: "extracting",
                    after: self.timeout,
                })
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::Extractor(format!(
                "{} exited with {:?}: {}",
                self.program,
                output.status.code(),
                stderr.trim()
            )));
        }
        let variants = parse_variants(&output.stdout)?;
        debug!(url = page_url, variants = variants.len(), "site variants listed");
        Ok(variants)
    }

    pub async fn choose(&self, page_url: &str) -> FetchResult<Variant> {
        let variants = self.variants(page_url).await?;
        let chosen = select_variant(&variants)
            .cloned()
            .ok_or_else(|| FetchError::NoVariant(page_url.to_string()))?;
        info!(
            url = page_url,
            resolution = chosen.resolution,
            extension = %chosen.extension,
            audio_bitrate = chosen.audio_bitrate,
            score = chosen.score(),
            "selected site variant"
        );
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn variant(resolution: u32, extension: &str, audio_bitrate: u32) -> Variant {
        Variant {
            url: format!("https://cdn/{resolution}.{extension}"),
            resolution,
            extension: extension.to_string(),
            audio_bitrate,
        }
    }

    #[test]
    fn webm_beats_mp4_at_equal_resolution() {
        let variants = vec![variant(720, "mp4", 128), variant(720, "webm", 128)];
        let chosen = select_variant(&variants).unwrap();
        assert_eq!(chosen.extension, "webm");
    }

    #[test]
    fn resolution_dominates_codec() {
        let variants = vec![
            variant(360, "webm", 192),
            variant(1080, "mp4", 128),
            variant(240, "3gp", 64),
        ];
        assert_eq!(select_variant(&variants).unwrap().resolution, 1080);
    }

    #[test]
    fn unknown_container_ranks_below_legacy() {
        assert!(codec_boost("flv") > codec_boost("mkv"));
        assert_eq!(codec_boost("WEBM"), 3);
        assert_eq!(variant(720, "mkv", 128).score(), 128);
    }

    #[test]
    fn empty_variant_list_selects_nothing() {
        assert!(select_variant(&[]).is_none());
    }

    #[test]
    fn extractor_dump_is_parsed() {
        let payload = json!({
            "id": "abc",
            "formats": [
                {"url": "https://cdn/a.m4a", "ext": "m4a", "vcodec": "none", "abr": 129.5},
                {"url": "https://cdn/v.mp4", "ext": "mp4", "height": 720, "abr": 128.0, "vcodec": "avc1"},
                {"ext": "webm", "height": 1080},
                {"url": "https://cdn/v.webm", "ext": "webm", "height": 480.0}
            ]
        });
        let variants = parse_variants(payload.to_string().as_bytes()).unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0], variant_with_url("https://cdn/v.mp4", 720, "mp4", 128));
        assert_eq!(variants[1], variant_with_url("https://cdn/v.webm", 480, "webm", 0));
    }

    #[test]
    fn garbage_dump_is_an_extractor_error() {
        let err = parse_variants(b"<html>").unwrap_err();
        assert!(matches!(err, FetchError::Extractor(_)));
    }

    fn variant_with_url(url: &str, resolution: u32, extension: &str, abr: u32) -> Variant {
        Variant {
            url: url.to_string(),
            resolution,
            extension: extension.to_string(),
            audio_bitrate: abr,
        }
    }
}
