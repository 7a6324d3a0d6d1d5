//! Offset-vote ranking: accumulate (track, offset-bin) votes, select the
//! winner deterministically, and derive the compactness, coverage, and
//! entropy statistics the match gate runs on.

use std::collections::{BTreeMap, HashMap};
use std::ops::RangeInclusive;

/// Half-width of the entropy window around the winning offset bin.
pub const ENTROPY_WINDOW_HALF: i32 = 7;

/// Peak scale of the confidence calibration; vote peaks near this value
/// approach full confidence from the peak term.
const CALIBRATION_PEAK_SCALE: f32 = 12.0;

/// Sparse (track_id, off_bin) -> count table. Accumulation is commutative
/// and associative, so per-worker tables merge in any order; determinism
/// of the final decision comes from the winner comparator alone.
#[derive(Debug, Clone, Default)]
pub struct VoteTable {
    counts: HashMap<(u32, i32), u32>,
}

impl VoteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, track_id: u32, off_bin: i32) {
        *self.counts.entry((track_id, off_bin)).or_insert(0) += 1;
    }

    pub fn merge(&mut self, other: VoteTable) {
        for (key, count) in other.counts {
            *self.counts.entry(key).or_insert(0) += count;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(u32, i32), &u32)> {
        self.counts.iter()
    }

    pub fn get(&self, track_id: u32, off_bin: i32) -> u32 {
        self.counts.get(&(track_id, off_bin)).copied().unwrap_or(0)
    }
}

/// Signed offset bin between a reference anchor and a query anchor,
/// floored into `delta_bin_frames` units.
pub fn offset_bin(t_db: u32, t_q: u32, delta_bin_frames: u16) -> i32 {
    let diff = t_db as i64 - t_q as i64;
    diff.div_euclid(delta_bin_frames as i64) as i32
}

/// Peak height and compactness of the winning mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestStats {
    pub peak: u32,
    pub iqr_bins: f32,
}

/// Winning (track, offset-bin) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestByVotes {
    pub track_id: u32,
    pub off_bin: i32,
    pub stats: BestStats,
}

/// Select the winner: largest count, ties broken by smaller |off_bin|,
/// then smaller track id, then smaller off_bin. The comparator makes the
/// choice independent of map iteration order.
pub fn select_best_by_votes(votes: &VoteTable) -> Option<BestByVotes> {
    let (&(track_id, off_bin), &peak) = votes.iter().max_by(|a, b| {
        let (&(track_a, off_a), &count_a) = a;
        let (&(track_b, off_b), &count_b) = b;
        count_a
            .cmp(&count_b)
            .then_with(|| off_b.abs().cmp(&off_a.abs()))
            .then_with(|| track_b.cmp(&track_a))
            .then_with(|| off_b.cmp(&off_a))
    })?;

    let hist = project_track_hist(votes, track_id);
    Some(BestByVotes {
        track_id,
        off_bin,
        stats: BestStats {
            peak,
            iqr_bins: weighted_iqr_bins(&hist),
        },
    })
}

/// Project one track's votes to an ordered offset histogram.
pub fn project_track_hist(votes: &VoteTable, track_id: u32) -> BTreeMap<i32, u32> {
    votes
        .iter()
        .filter(|((track, _), _)| *track == track_id)
        .map(|((_, off), &count)| (*off, count))
        .collect()
}

/// Interquartile range (in bins) of a count-weighted offset histogram,
/// by weighted nearest-rank selection.
pub fn weighted_iqr_bins(hist: &BTreeMap<i32, u32>) -> f32 {
    let total: u64 = hist.values().map(|&c| c as u64).sum();
    if total == 0 {
        return 0.0;
    }
    let rank_of = |q: f64| -> i32 {
        let target = (q * total as f64).ceil().max(1.0) as u64;
        let mut cum = 0u64;
        for (&off, &count) in hist {
            cum += count as u64;
            if cum >= target {
                return off;
            }
        }
        *hist.keys().next_back().expect("non-empty histogram")
    };
    (rank_of(0.75) - rank_of(0.25)) as f32
}

/// Contiguous window of offset bins around the winning bin.
pub fn window_around(off_bin: i32) -> RangeInclusive<i32> {
    off_bin - ENTROPY_WINDOW_HALF..=off_bin + ENTROPY_WINDOW_HALF
}

/// Shannon entropy (bits) of the histogram restricted to a window.
/// A single dominant spike gives entropy near zero; votes smeared across
/// the window push it toward log2(window size).
pub fn histogram_entropy(hist: &BTreeMap<i32, u32>, window: RangeInclusive<i32>) -> f32 {
    let total: u64 = hist
        .range(window.clone())
        .map(|(_, &count)| count as u64)
        .sum();
    if total == 0 {
        return 0.0;
    }
    let mut entropy = 0.0f64;
    for (_, &count) in hist.range(window) {
        if count == 0 {
            continue;
        }
        let p = count as f64 / total as f64;
        entropy -= p * p.log2();
    }
    entropy as f32
}

/// Deterministic monotone calibration into [0, 1]: non-decreasing in peak
/// and coverage, non-increasing in entropy, exactly zero for a zero peak.
pub fn calibrate_confidence(peak: u32, coverage: f32, entropy: f32) -> f32 {
    if peak == 0 {
        return 0.0;
    }
    let peak_term = 1.0 - (-(peak as f32) / CALIBRATION_PEAK_SCALE).exp();
    let blend = 0.45 + 0.45 * coverage.clamp(0.0, 1.0) + 0.10 / (1.0 + entropy.max(0.0));
    (peak_term * blend).clamp(0.0, 1.0)
}
