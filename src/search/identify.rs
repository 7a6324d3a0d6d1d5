//! End-to-end identification: extract query landmarks, vote offsets
//! against the index, gate the winner on coverage and entropy, and
//! calibrate a confidence score.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::audio::{load_path, MidSide};
use crate::error::{LandmarkError, Result};
use crate::index::postings::PostingIter;
use crate::index::store::{OpenMode, ShardedStore};
use crate::keys::{derive_version, extract_keys_for_track, shard_for_key, Key, KeyWithTime};
use crate::models::{IdentifyConfig, IdentifyOutcome, NoMatchReason};
use crate::search::rank::{
    calibrate_confidence, histogram_entropy, offset_bin, project_track_hist,
    select_best_by_votes, window_around, VoteTable,
};
use crate::util::bin_to_seconds;

/// Posting values cached across the vote and coverage passes. Negative
/// results are cached too; most query keys miss the index.
const POSTING_CACHE_CAP: usize = 4_096;

/// Keys processed per worker unit; the deadline and cancellation token
/// are consulted once per chunk boundary and once per key.
const VOTE_CHUNK: usize = 64;

type PostingCache = Mutex<LruCache<Key, Option<Arc<Vec<u8>>>>>;

struct QueryContext<'a> {
    store: &'a ShardedStore,
    cfg: &'a IdentifyConfig,
    cache: PostingCache,
    deadline: Option<Instant>,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> QueryContext<'a> {
    fn check_time(&self) -> Result<()> {
        if self.cancel.is_some_and(|c| c.load(Ordering::Acquire)) {
            return Err(LandmarkError::Timeout);
        }
        if self.deadline.is_some_and(|d| Instant::now() > d) {
            return Err(LandmarkError::Timeout);
        }
        Ok(())
    }

    fn fetch(&self, key: &Key) -> Result<Option<Arc<Vec<u8>>>> {
        if let Some(hit) = self.cache.lock().get(key) {
            return Ok(hit.clone());
        }
        let shard = shard_for_key(key, &self.cfg.key_layout, self.store.shards());
        let value = self.store.get(shard, key)?.map(Arc::new);
        self.cache.lock().put(*key, value.clone());
        Ok(value)
    }
}

/// Reject the query if any indexed track was built under a different key
/// layout or analysis geometry.
fn check_compatibility(store: &ShardedStore, cfg: &IdentifyConfig) -> Result<()> {
    let expected_version = derive_version(&cfg.key_layout, &cfg.feature);
    for meta in store.track_metas()? {
        if meta.key_layout_version != expected_version {
            return Err(LandmarkError::ConfigMismatch(format!(
                "track {} was indexed with layout version {}, query uses {}",
                meta.track_id, meta.key_layout_version, expected_version
            )));
        }
        if meta.sr != cfg.feature.target_sr
            || meta.fft != cfg.feature.frame_size
            || meta.hop != cfg.feature.hop_size
        {
            return Err(LandmarkError::ConfigMismatch(format!(
                "track {} was indexed at sr={}/fft={}/hop={}, query uses sr={}/fft={}/hop={}",
                meta.track_id,
                meta.sr,
                meta.fft,
                meta.hop,
                cfg.feature.target_sr,
                cfg.feature.frame_size,
                cfg.feature.hop_size
            )));
        }
    }
    Ok(())
}

fn vote_offsets(ctx: &QueryContext, query_keys: &[KeyWithTime]) -> Result<VoteTable> {
    let delta_bin = ctx.cfg.pairing.delta_bin_frames;

    let partials: Vec<VoteTable> = query_keys
        .par_chunks(VOTE_CHUNK)
        .map(|chunk| -> Result<VoteTable> {
            let mut table = VoteTable::new();
            for kt in chunk {
                ctx.check_time()?;
                let Some(value) = ctx.fetch(&kt.key)? else {
                    continue;
                };
                for anchor in PostingIter::new(&value) {
                    let anchor = anchor?;
                    table.add(
                        anchor.track_id,
                        offset_bin(anchor.t_anchor, kt.t_anchor, delta_bin),
                    );
                }
            }
            Ok(table)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut votes = VoteTable::new();
    for partial in partials {
        votes.merge(partial);
    }
    Ok(votes)
}

/// Fraction of distinct query frames that contributed at least one vote
/// to the winning (track, offset-bin) pair. Runs against the posting
/// cache populated by the vote pass.
fn frame_coverage(
    ctx: &QueryContext,
    query_keys: &[KeyWithTime],
    best_track: u32,
    best_off: i32,
) -> Result<f32> {
    let delta_bin = ctx.cfg.pairing.delta_bin_frames;
    let mut emitted: HashSet<u32> = HashSet::new();
    let mut contributed: HashSet<u32> = HashSet::new();

    for kt in query_keys {
        ctx.check_time()?;
        emitted.insert(kt.t_anchor);
        if contributed.contains(&kt.t_anchor) {
            continue;
        }
        let Some(value) = ctx.fetch(&kt.key)? else {
            continue;
        };
        for anchor in PostingIter::new(&value) {
            let anchor = anchor?;
            if anchor.track_id == best_track
                && offset_bin(anchor.t_anchor, kt.t_anchor, delta_bin) == best_off
            {
                contributed.insert(kt.t_anchor);
                break;
            }
        }
    }

    if emitted.is_empty() {
        return Ok(0.0);
    }
    Ok(contributed.len() as f32 / emitted.len() as f32)
}

/// Identify decoded query audio against an open store.
pub fn identify_audio(
    audio: MidSide,
    cfg: &IdentifyConfig,
    store: &ShardedStore,
    cancel: Option<&AtomicBool>,
) -> Result<IdentifyOutcome> {
    cfg.validate()?;
    check_compatibility(store, cfg)?;

    let deadline = cfg
        .deadline_ms
        .map(|ms| Instant::now() + Duration::from_millis(ms));

    let extracted = extract_keys_for_track(audio, &cfg.feature, &cfg.pairing, &cfg.key_layout)?;
    let ctx = QueryContext {
        store,
        cfg,
        cache: Mutex::new(LruCache::new(
            NonZeroUsize::new(POSTING_CACHE_CAP).expect("nonzero cache capacity"),
        )),
        deadline,
        cancel,
    };

    let votes = vote_offsets(&ctx, &extracted.keys)?;
    if votes.is_empty() {
        tracing::debug!("query produced no votes");
        return Ok(IdentifyOutcome::NoMatch {
            reason: NoMatchReason::NoVotes,
        });
    }

    let Some(best) = select_best_by_votes(&votes) else {
        return Ok(IdentifyOutcome::NoMatch {
            reason: NoMatchReason::NoVotes,
        });
    };
    let coverage = frame_coverage(&ctx, &extracted.keys, best.track_id, best.off_bin)?;
    let hist = project_track_hist(&votes, best.track_id);
    let entropy = histogram_entropy(&hist, window_around(best.off_bin));

    tracing::debug!(
        track = best.track_id,
        off_bin = best.off_bin,
        peak = best.stats.peak,
        iqr = best.stats.iqr_bins,
        coverage,
        entropy,
        "winner selected"
    );

    if coverage < cfg.min_coverage {
        return Ok(IdentifyOutcome::NoMatch {
            reason: NoMatchReason::LowCoverage,
        });
    }
    if entropy > cfg.max_entropy {
        return Ok(IdentifyOutcome::NoMatch {
            reason: NoMatchReason::HighEntropy,
        });
    }

    let score = calibrate_confidence(best.stats.peak, coverage, entropy);
    let offset_seconds = bin_to_seconds(
        best.off_bin,
        cfg.pairing.delta_bin_frames,
        cfg.feature.hop_size,
        cfg.feature.target_sr,
    );

    Ok(IdentifyOutcome::Match {
        track_id: best.track_id,
        offset_seconds,
        score,
    })
}

/// Identify an audio file against the store at `db_path`.
pub fn identify_path(
    filepath: &str,
    cfg: &IdentifyConfig,
    db_path: impl AsRef<Path>,
) -> Result<IdentifyOutcome> {
    let store = ShardedStore::open_existing(db_path, OpenMode::ReadOnly)?;
    let audio = load_path(filepath)?;
    identify_audio(audio, cfg, &store, None)
}
