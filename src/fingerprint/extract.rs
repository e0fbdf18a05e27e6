//! Fingerprint extraction with chromaprint's `fpcalc`.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Fewer distinct frames than this means silence or a looped jingle.
pub const MIN_DISTINCT_FRAMES: usize = 16;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// Permanent: retrying the same bytes will never produce a usable fingerprint.
    #[error("insufficient audio: {0}")]
    InsufficientAudio(String),

    #[error("fpcalc failed: {0}")]
    ToolFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fingerprint {
    pub duration_s: f64,
    pub frames: Vec<u32>,
}

#[async_trait]
pub trait FingerprintExtractor: Send + Sync {
    async fn extract(&self, path: &Path) -> Result<Fingerprint, ExtractError>;
}

/// fpcalc `-raw -json` output.
#[derive(Debug, Deserialize)]
struct FpcalcOutput {
    duration: f64,
    // signed or unsigned depending on the fpcalc build
    fingerprint: Vec<i64>,
}

pub fn parse_fpcalc_output(stdout: &str) -> Result<Fingerprint, ExtractError> {
    let output: FpcalcOutput = serde_json::from_str(stdout)
        .map_err(|e| ExtractError::InvalidOutput(format!("JSON parse error: {}", e)))?;
    Ok(Fingerprint {
        duration_s: output.duration,
        frames: output.fingerprint.into_iter().map(|f| f as u32).collect(),
    })
}

/// Rejects fingerprints too short or too uniform to ever match anything.
pub fn check_sufficient(fingerprint: &Fingerprint, min_frames: usize) -> Result<(), ExtractError> {
    if fingerprint.frames.len() < min_frames {
        return Err(ExtractError::InsufficientAudio(format!(
            "{} frames, need {}",
            fingerprint.frames.len(),
            min_frames
        )));
    }
    let distinct: HashSet<u32> = fingerprint.frames.iter().copied().collect();
    if distinct.len() < MIN_DISTINCT_FRAMES {
        return Err(ExtractError::InsufficientAudio(format!(
            "{} distinct frames",
            distinct.len()
        )));
    }
    Ok(())
}

pub struct FpcalcExtractor {
    binary: PathBuf,
    min_frames: usize,
}

impl FpcalcExtractor {
    pub fn new(binary: impl Into<PathBuf>, min_frames: usize) -> Self {
        Self {
            binary: binary.into(),
            min_frames,
        }
    }
}

#[async_trait]
impl FingerprintExtractor for FpcalcExtractor {
    async fn extract(&self, path: &Path) -> Result<Fingerprint, ExtractError> {
        let output = Command::new(&self.binary)
            .args(["-raw", "-json"])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // fpcalc reports decodable-but-empty input this way
            if stderr.contains("Empty fingerprint") || stderr.contains("Not enough audio") {
                return Err(ExtractError::InsufficientAudio(stderr.trim().to_string()));
            }
            return Err(ExtractError::ToolFailed(stderr.trim().to_string()));
        }

        let fingerprint = parse_fpcalc_output(&String::from_utf8_lossy(&output.stdout))?;
        check_sufficient(&fingerprint, self.min_frames)?;
        Ok(fingerprint)
    }
}
