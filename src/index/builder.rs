//! Index build driver: fans manifest tracks out over a worker pool,
//! appends posting blocks and track metadata, and assembles the build
//! report. Per-track pipeline failures become warnings; store write
//! failures abort the build.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::audio::{load_path, MidSide};
use crate::error::Result;
use crate::index::postings::encode_posting_block;
use crate::index::store::{OpenMode, ShardedStore};
use crate::keys::{extract_keys_for_track, group_times_by_key, derive_version, shard_for_key};
use crate::models::{BuildConfig, BuildReport, TrackMeta};
use crate::util::{observe_hotkey, HOTKEY_BUCKETS};

/// One manifest entry: a track id and where to find its audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSource {
    pub track_id: u32,
    pub filepath: String,
}

/// Per-track ingest statistics folded into the report.
#[derive(Debug, Clone, Default)]
pub struct TrackStats {
    pub keys_emitted: u64,
    pub blocks_written: u64,
    /// Anchor count of each posting block this track produced
    pub posting_lengths: Vec<u32>,
}

enum TrackOutcome {
    Ingested(TrackStats),
    Skipped(String),
    Cancelled,
}

/// Extract one decoded track and append its landmarks and metadata to the
/// store. Callers with raw audio (tests, ingestion services) can use this
/// directly and bypass file decoding.
pub fn ingest_track(
    store: &ShardedStore,
    track_id: u32,
    audio: MidSide,
    cfg: &BuildConfig,
) -> Result<TrackStats> {
    let sr = cfg.feature.target_sr;
    let extracted =
        extract_keys_for_track(audio, &cfg.feature, &cfg.pairing, &cfg.key_layout)?;

    let grouped = group_times_by_key(&extracted.keys);
    let mut stats = TrackStats {
        keys_emitted: extracted.keys.len() as u64,
        ..TrackStats::default()
    };

    for (key, times) in &grouped {
        let block = encode_posting_block(track_id, times)?;
        let shard = shard_for_key(key, &cfg.key_layout, cfg.shards);
        store.put_append(shard, key, &block)?;
        stats.blocks_written += 1;
        stats.posting_lengths.push(times.len() as u32);
    }

    // Metadata goes in last: a cancelled or crashed build leaves at worst
    // orphaned blocks, never metadata pointing at missing postings.
    store.put_track_meta(&TrackMeta {
        track_id,
        sr,
        fft: cfg.feature.frame_size,
        hop: cfg.feature.hop_size,
        frames: extracted.frames,
        audio_crc64: extracted.audio_crc64,
        key_layout_version: derive_version(&cfg.key_layout, &cfg.feature),
    })?;

    tracing::debug!(
        track_id,
        keys = stats.keys_emitted,
        blocks = stats.blocks_written,
        "track ingested"
    );
    Ok(stats)
}

/// Build a sharded index from a manifest of audio files.
///
/// The store at `db_path` is created fresh with `cfg.shards` shards.
/// Tracks are processed in parallel; the cancellation token is honored
/// between tracks, leaving a consistent store behind.
pub fn build_index(
    manifest: &[TrackSource],
    cfg: &BuildConfig,
    db_path: impl AsRef<Path>,
    cancel: Option<&AtomicBool>,
) -> Result<BuildReport> {
    cfg.validate()?;
    let store = ShardedStore::open(db_path, OpenMode::Create, cfg.shards)?;

    tracing::info!(tracks = manifest.len(), shards = cfg.shards, "starting index build");

    let outcomes: Vec<TrackOutcome> = manifest
        .par_iter()
        .map(|source| {
            if cancel.is_some_and(|c| c.load(Ordering::Acquire)) {
                return Ok(TrackOutcome::Cancelled);
            }
            let audio = match load_path(&source.filepath) {
                Ok(audio) => audio,
                Err(e) if e.is_build_tolerable() => {
                    return Ok(TrackOutcome::Skipped(format!(
                        "track {} ({}): {}",
                        source.track_id, source.filepath, e
                    )))
                }
                Err(e) => return Err(e),
            };
            match ingest_track(&store, source.track_id, audio, cfg) {
                Ok(stats) => Ok(TrackOutcome::Ingested(stats)),
                Err(e) if e.is_build_tolerable() => Ok(TrackOutcome::Skipped(format!(
                    "track {} ({}): {}",
                    source.track_id, source.filepath, e
                ))),
                Err(e) => Err(e),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let mut report = BuildReport::default();
    let mut hist = [0u32; HOTKEY_BUCKETS];
    let mut cancelled = 0usize;
    for outcome in outcomes {
        match outcome {
            TrackOutcome::Ingested(stats) => {
                report.tracks_ingested += 1;
                report.keys_total += stats.keys_emitted;
                report.unique_keys += stats.blocks_written;
                for len in stats.posting_lengths {
                    observe_hotkey(&mut hist, len as usize);
                }
            }
            TrackOutcome::Skipped(warning) => {
                tracing::warn!("{}", warning);
                report.warnings.push(warning);
            }
            TrackOutcome::Cancelled => cancelled += 1,
        }
    }
    if cancelled > 0 {
        report
            .warnings
            .push(format!("build cancelled with {} tracks unprocessed", cancelled));
    }
    report.hotkey_histogram = hist.to_vec();

    store.finalize_shards()?;
    store.close()?;

    tracing::info!(
        tracks = report.tracks_ingested,
        keys = report.keys_total,
        unique = report.unique_keys,
        warnings = report.warnings.len(),
        "index build finished"
    );
    Ok(report)
}
