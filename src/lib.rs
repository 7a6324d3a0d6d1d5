//! Landmark-based audio fingerprinting: build a sharded inverted index of
//! spectral landmarks from reference tracks, then identify short query
//! clips by offset voting.
//!
//! Pipeline, leaf first:
//! - audio: decode (symphonia), mid/side downmix, conditioning
//! - dsp: STFT, scaling/banding, DoG enhancement, peaks, pairing
//! - keys: bit-packed landmark keys, per-track extraction
//! - index: posting codec, sharded store, build driver
//! - search: offset voting, gating, confidence calibration

pub mod api;
pub mod audio;
pub mod dsp;
pub mod error;
pub mod index;
pub mod keys;
pub mod models;
pub mod search;
pub mod util;

#[cfg(test)]
mod scenarios;

// Re-export the operational surface for convenience
pub use audio::{load_bytes, load_path, MidSide, Pcm};
pub use error::{LandmarkError, Result};
pub use index::{build_index, ingest_track, ShardedStore, TrackSource};
pub use keys::{extract_keys_for_track, pack_key, unpack_key, Key, KeyWithTime};
pub use models::{
    BuildConfig, BuildReport, FeatureConfig, IdentifyConfig, IdentifyOutcome, KeyLayout,
    NoMatchReason, PairingConfig, TrackMeta,
};
pub use search::{identify_audio, identify_path};
