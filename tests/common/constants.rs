//! Test constants
//!
//! Idents shared across the end-to-end tests.

#![allow(dead_code)]

// Tracks
pub const VIDEO_A: &str = "yv/A";
pub const VIDEO_COVER: &str = "yv/cover";
pub const SPOTIFY_B: &str = "sa/B";
pub const VOCADB_SONG: &str = "vs/1001";

// Artists
pub const CHANNEL_C: &str = "yc/C";
pub const SPOTIFY_ARTIST: &str = "sr/R";
pub const VOCADB_ARTIST: &str = "vr/77";
pub const KARENT_ARTIST: &str = "kr/K";

// Shared weak link values
pub const SHARED_HANDLE: &str = "producer_p";

/// Start of the manual clock, in epoch milliseconds.
pub const CLOCK_START_MS: i64 = 1_700_000_000_000;

/// Length of the fake recordings, in fingerprint frames (about 25 seconds).
pub const RECORDING_FRAMES: usize = 200;
