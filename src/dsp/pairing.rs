//! Anchor/target pairing: each peak anchors up to `max_targets_per_anchor`
//! forward landmarks inside a bounded time window, with an optional
//! |df|-histogram deweighting that suppresses hot comb lines.

use crate::dsp::peaks::Peak;
use crate::models::PairingConfig;

/// Whole-track histogram of |f_target - f_anchor| over every admissible
/// pair, length `fprime`. Used by the histogram-weighted selection path.
pub fn histogram_abs_delta_f(peaks: &[Peak], fprime: u16, pair: &PairingConfig) -> Vec<u32> {
    let mut hist = vec![0u32; fprime as usize];
    for (a_idx, anchor) in peaks.iter().enumerate() {
        for target in forward_window(peaks, a_idx, pair) {
            let df = (target.f as i32 - anchor.f as i32).unsigned_abs() as usize;
            if df < hist.len() {
                hist[df] += 1;
            }
        }
    }
    hist
}

/// Peaks whose time sits in the anchor's forward pairing window. Peaks
/// must be sorted by (t, f).
fn forward_window<'a>(
    peaks: &'a [Peak],
    anchor_idx: usize,
    pair: &PairingConfig,
) -> impl Iterator<Item = &'a Peak> {
    let t_a = peaks[anchor_idx].t;
    let lo = t_a + pair.dt_min_frames as u32;
    let hi = t_a + pair.dt_max_frames as u32;
    peaks[anchor_idx + 1..]
        .iter()
        .skip_while(move |p| p.t < lo)
        .take_while(move |p| p.t <= hi)
}

fn select_ranked(
    peaks: &[Peak],
    anchor_idx: usize,
    pair: &PairingConfig,
    score: impl Fn(&Peak) -> f32,
) -> Vec<Peak> {
    let anchor = peaks[anchor_idx];
    let mut window: Vec<Peak> = forward_window(peaks, anchor_idx, pair).copied().collect();

    // Deterministic rank: score desc, |df| asc, then (t, f) asc.
    window.sort_by(|a, b| {
        score(b)
            .total_cmp(&score(a))
            .then_with(|| {
                let da = (a.f as i32 - anchor.f as i32).abs();
                let db = (b.f as i32 - anchor.f as i32).abs();
                da.cmp(&db)
            })
            .then_with(|| a.t.cmp(&b.t))
            .then_with(|| a.f.cmp(&b.f))
    });

    window.truncate(pair.max_targets_per_anchor as usize);
    window
}

/// Select up to `max_targets_per_anchor` targets for the anchor at
/// `anchor_idx`, ranked by raw strength.
pub fn select_targets(peaks: &[Peak], anchor_idx: usize, pair: &PairingConfig) -> Vec<Peak> {
    select_ranked(peaks, anchor_idx, pair, |p| p.strength)
}

/// Histogram-weighted variant: candidate scores are deweighted by how
/// common their |df| is across the whole track.
pub fn select_targets_with_hist(
    peaks: &[Peak],
    anchor_idx: usize,
    pair: &PairingConfig,
    df_hist: &[u32],
) -> Vec<Peak> {
    let f_a = peaks[anchor_idx].f as i32;
    select_ranked(peaks, anchor_idx, pair, |p| {
        let df = (p.f as i32 - f_a).unsigned_abs() as usize;
        let weight = 1.0 + df_hist.get(df).copied().unwrap_or(0) as f32;
        p.strength / weight
    })
}

/// Quantize a forward time delta into its bin. Returns `None` when the
/// rounded bin exceeds the field cap: such pairs are dropped rather than
/// clamped, so the cap value never aliases distant pairs.
pub fn quantize_dt(dt_frames: u32, delta_bin_frames: u16, bits_dt: u8) -> Option<u32> {
    let bin = (dt_frames as f64 / delta_bin_frames as f64).round() as u64;
    let cap = (1u64 << bits_dt) - 1;
    (bin <= cap).then_some(bin as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(t: u32, f: u16, strength: f32) -> Peak {
        Peak { t, f, strength }
    }

    fn cfg() -> PairingConfig {
        PairingConfig {
            dt_min_frames: 1,
            dt_max_frames: 10,
            delta_bin_frames: 1,
            max_targets_per_anchor: 2,
            use_df_histogram: false,
        }
    }

    #[test]
    fn window_is_bounded_both_sides() {
        let peaks = vec![
            peak(0, 5, 0.0),
            peak(0, 9, 0.0),  // same frame: dt=0 < dt_min
            peak(3, 7, 0.0),  // inside
            peak(10, 2, 0.0), // inside
            peak(11, 3, 0.0), // dt=11 > dt_max
        ];
        let targets = select_targets(&peaks, 0, &cfg());
        assert!(targets.iter().all(|p| {
            let dt = p.t - peaks[0].t;
            dt >= 1 && dt <= 10
        }));
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn budget_is_enforced() {
        let peaks: Vec<Peak> = (0..8).map(|i| peak(1 + i / 4, i as u16 * 8, 0.0)).collect();
        let mut all = vec![peak(0, 0, 1.0)];
        all.extend(peaks);
        let targets = select_targets(&all, 0, &cfg());
        assert!(targets.len() <= 2);
    }

    #[test]
    fn rank_prefers_strength_then_proximity() {
        let peaks = vec![
            peak(0, 10, 0.0),
            peak(2, 30, 5.0),
            peak(3, 12, 5.0), // same strength, closer in frequency
            peak(4, 11, 1.0),
        ];
        let targets = select_targets(&peaks, 0, &cfg());
        assert_eq!(targets.len(), 2);
        // Tie on strength resolves toward the smaller |df|.
        assert_eq!((targets[0].t, targets[0].f), (3, 12));
        assert_eq!((targets[1].t, targets[1].f), (2, 30));
    }

    #[test]
    fn histogram_deweights_hot_comb_lines() {
        // df=20 dominates the track; the weighted path should prefer the
        // rarer df=3 target even though it is slightly weaker.
        let peaks = vec![
            peak(0, 10, 0.0),
            peak(2, 30, 5.0), // df 20, hot
            peak(3, 13, 4.0), // df 3, rare
        ];
        let mut hist = vec![0u32; 64];
        hist[20] = 50;
        hist[3] = 1;
        let pair = PairingConfig {
            max_targets_per_anchor: 1,
            ..cfg()
        };
        let plain = select_targets(&peaks, 0, &pair);
        assert_eq!(plain[0].f, 30);
        let weighted = select_targets_with_hist(&peaks, 0, &pair, &hist);
        assert_eq!(weighted[0].f, 13);
    }

    #[test]
    fn df_histogram_counts_window_pairs_only() {
        let peaks = vec![peak(0, 4, 0.0), peak(2, 9, 0.0), peak(40, 6, 0.0)];
        let hist = histogram_abs_delta_f(&peaks, 16, &cfg());
        assert_eq!(hist[5], 1); // (0,4) -> (2,9)
        assert_eq!(hist.iter().sum::<u32>(), 1); // t=40 is out of window
    }

    #[test]
    fn quantize_rounds_and_drops_over_cap() {
        assert_eq!(quantize_dt(5, 2, 8), Some(3)); // 2.5 rounds away from zero
        assert_eq!(quantize_dt(4, 2, 8), Some(2));
        assert_eq!(quantize_dt(255, 1, 8), Some(255));
        assert_eq!(quantize_dt(256, 1, 8), None); // over cap: dropped
        assert_eq!(quantize_dt(511, 2, 8), None); // rounds to 256, dropped
        assert_eq!(quantize_dt(0, 1, 8), Some(0));
    }
}
