//! Acoustic fingerprints: extraction, scoring and placing sources on tracks.

pub mod extract;
pub mod matcher;
mod tasks;

pub use extract::{ExtractError, Fingerprint, FingerprintExtractor, FpcalcExtractor};
pub use matcher::{evidence_compatible, score, Matcher, MatcherConfig};
pub use tasks::{
    match_source, ExtractFingerprintsTask, MatchFingerprintsTask, MatchResult,
    DEFAULT_EXTRACT_CONCURRENCY, EXTRACT_TASK, MATCH_TASK,
};
