use serde::{Deserialize, Serialize};

/// Per-track descriptor persisted in the store's reserved keyspace. Written
/// once per ingested track, after all of the track's posting blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMeta {
    pub track_id: u32,
    /// Sample rate the track was analyzed at (Hz)
    pub sr: u32,
    /// FFT frame size used at build time (samples)
    pub fft: u32,
    /// Hop size used at build time (samples)
    pub hop: u32,
    /// Total frames in the analyzed track
    pub frames: u32,
    /// CRC-64 over the conditioned mono samples
    pub audio_crc64: u64,
    /// Version byte derived from the key layout and feature flags
    pub key_layout_version: u8,
}

/// Summary of one index build invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildReport {
    /// Tracks successfully processed
    pub tracks_ingested: u32,
    /// Total landmark keys emitted across all tracks
    pub keys_total: u64,
    /// Unique (key, track) posting blocks written
    pub unique_keys: u64,
    /// Posting-length histogram over power-of-two buckets
    pub hotkey_histogram: Vec<u32>,
    /// Non-fatal per-track failures, for logs
    pub warnings: Vec<String>,
}

/// Machine-readable reason attached to a no-match decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchReason {
    LowCoverage,
    HighEntropy,
    NoVotes,
}

/// Outcome of one identification query. The reason is meaningful only when
/// there is no match, so the two arms are a tagged variant rather than a
/// struct of nullable fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IdentifyOutcome {
    Match {
        track_id: u32,
        /// Estimated position of the query within the track (seconds)
        offset_seconds: f64,
        /// Calibrated confidence in [0, 1]
        score: f32,
    },
    NoMatch {
        reason: NoMatchReason,
    },
}
