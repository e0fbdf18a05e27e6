//! Media metadata via ffprobe.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Audio bitrate in bits per second, 0 when unknown.
    pub bitrate: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration_s: Option<f64>,
}

#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError>;
}

/// ffprobe JSON output structure.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    bit_rate: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
}

pub fn parse_ffprobe_output(stdout: &str) -> Result<MediaInfo, ProbeError> {
    let probe: FfprobeOutput = serde_json::from_str(stdout)
        .map_err(|e| ProbeError::InvalidOutput(format!("JSON parse error: {}", e)))?;

    let audio = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "audio")
        .ok_or_else(|| ProbeError::InvalidOutput("No audio stream found".to_string()))?;
    let video = probe.streams.iter().find(|s| s.codec_type == "video");

    // prefer the stream bitrate, the container one includes video
    let bitrate = audio
        .bit_rate
        .as_ref()
        .or(probe.format.bit_rate.as_ref())
        .and_then(|b| b.parse::<i64>().ok())
        .unwrap_or(0);

    Ok(MediaInfo {
        bitrate,
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
        duration_s: probe.format.duration.as_ref().and_then(|d| d.parse().ok()),
    })
}

pub struct FfprobeProber {
    binary: PathBuf,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::ProbeFailed(stderr.to_string()));
        }

        parse_ffprobe_output(&String::from_utf8_lossy(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_audio_bitrate_and_video_dimensions() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "width": 1920, "height": 1080, "bit_rate": "2500000"},
                {"codec_type": "audio", "bit_rate": "160000"}
            ],
            "format": {"duration": "213.4", "bit_rate": "2660000"}
        }"#;
        let info = parse_ffprobe_output(json).unwrap();
        assert_eq!(
            info,
            MediaInfo {
                bitrate: 160_000,
                width: Some(1920),
                height: Some(1080),
                duration_s: Some(213.4),
            }
        );
    }

    #[test]
    fn falls_back_to_container_bitrate() {
        let json = r#"{
            "streams": [{"codec_type": "audio"}],
            "format": {"bit_rate": "128000"}
        }"#;
        let info = parse_ffprobe_output(json).unwrap();
        assert_eq!(info.bitrate, 128_000);
        assert_eq!(info.width, None);
        assert_eq!(info.duration_s, None);
    }

    #[test]
    fn requires_audio_stream() {
        let json = r#"{"streams": [{"codec_type": "video"}], "format": {}}"#;
        assert!(matches!(
            parse_ffprobe_output(json),
            Err(ProbeError::InvalidOutput(_))
        ));
    }
}
