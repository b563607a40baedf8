use std::sync::OnceLock;

use regex::Regex;

use crate::manifest::{MediaInfo, Resolution};

struct Patterns {
    duration: Regex,
    bitrate: Regex,
    resolution: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        duration: Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2})(\.\d+)?").expect("valid regex"),
        bitrate: Regex::new(r"bitrate:\s*([^,\r\n]+)").expect("valid regex"),
        resolution: Regex::new(r"\b(\d{2,5})x(\d{2,5})\b").expect("valid regex"),
    })
}

/// Extracts duration, bitrate and frame size from probe text. Fields that do
/// not match are left unset; the first match of each wins.
pub fn parse_probe_output(text: &str) -> MediaInfo {
    let patterns = patterns();
    let mut info = MediaInfo::default();

    for line in text.lines() {
        if line.contains("Duration:") && info.duration.is_none() {
            if let Some(caps) = patterns.duration.captures(line) {
                if let Some(total) = duration_seconds(&caps[1], &caps[2], &caps[3]) {
                    let fraction = caps.get(4).map(|m| m.as_str()).unwrap_or("");
                    info.duration =
                        Some(format!("{}:{}:{}{fraction}", &caps[1], &caps[2], &caps[3]));
                    info.duration_seconds = Some(total);
                }
            }
            if info.bitrate.is_none() {
                info.bitrate = patterns
                    .bitrate
                    .captures(line)
                    .map(|caps| caps[1].trim().to_string())
                    .filter(|value| !value.is_empty() && value != "N/A");
            }
        }

        if info.resolution.is_none() && line.contains("Stream") && line.contains("Video:") {
            info.resolution = patterns.resolution.captures(line).and_then(|caps| {
                Some(Resolution {
                    width: caps[1].parse().ok()?,
                    height: caps[2].parse().ok()?,
                })
            });
        }
    }
    info
}

/// `None` when any component does not fit or the total overflows.
fn duration_seconds(hours: &str, minutes: &str, seconds: &str) -> Option<u64> {
    let hours: u64 = hours.parse().ok()?;
    let minutes: u64 = minutes.parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;
    hours
        .checked_mul(3600)?
        .checked_add(minutes * 60)?
        .checked_add(seconds)
}
