//! Peak extraction: per-frame SNR thresholds, strict 2-D local maxima on
//! the detection surface, confirmation on the base surface, and per-frame
//! non-maximum suppression with density control.

use crate::dsp::dog::Surfaces;
use crate::dsp::scale::ScaledSpectrogram;
use crate::error::{LandmarkError, Result};
use crate::models::FeatureConfig;

/// Spectral peak in band-limited coordinates. Strength is the base
/// surface value at (t, f).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Frame index
    pub t: u32,
    /// Banded frequency bin in [0, fprime)
    pub f: u16,
    pub strength: f32,
}

/// Per-frame detection threshold: the frame's noise floor (median across
/// the band) plus a fixed SNR margin.
pub fn per_frame_thresholds(base: &ScaledSpectrogram, snr_margin_db: f32) -> Vec<f32> {
    let (n_frames, n_bins) = base.val.dim();
    let mut thresholds = Vec::with_capacity(n_frames);
    let mut row_buf: Vec<f32> = Vec::with_capacity(n_bins);

    for t in 0..n_frames {
        row_buf.clear();
        row_buf.extend(base.val.row(t).iter().copied());
        row_buf.sort_by(f32::total_cmp);
        let median = if n_bins % 2 == 1 {
            row_buf[n_bins / 2]
        } else {
            0.5 * (row_buf[n_bins / 2 - 1] + row_buf[n_bins / 2])
        };
        thresholds.push(median + snr_margin_db);
    }

    thresholds
}

/// Strict 2-D local maxima on the detection surface over the rectangle
/// [t +- neigh_dt] x [f +- neigh_df]. Out-of-range neighbors are ignored.
pub fn detect_candidates(det: &ScaledSpectrogram, neigh_dt: u8, neigh_df: u8) -> Vec<Peak> {
    let (n_frames, n_bins) = det.val.dim();
    let mut candidates = Vec::new();

    for t in 0..n_frames {
        let t_lo = t.saturating_sub(neigh_dt as usize);
        let t_hi = (t + neigh_dt as usize).min(n_frames - 1);
        'cell: for f in 0..n_bins {
            let center = det.val[[t, f]];
            let f_lo = f.saturating_sub(neigh_df as usize);
            let f_hi = (f + neigh_df as usize).min(n_bins - 1);
            for tn in t_lo..=t_hi {
                for fn_ in f_lo..=f_hi {
                    if tn == t && fn_ == f {
                        continue;
                    }
                    if det.val[[tn, fn_]] >= center {
                        continue 'cell;
                    }
                }
            }
            candidates.push(Peak {
                t: t as u32,
                f: f as u16,
                strength: center,
            });
        }
    }

    candidates
}

/// Confirm candidates against the threshold vector, apply per-frame NMS
/// and density control, and return peaks sorted by (t, f).
///
/// Peak strengths are re-read from the base surface so later stages rank
/// by confirmed energy rather than the band-pass detection response.
pub fn filter_and_nms(
    candidates: Vec<Peak>,
    thresholds: &[f32],
    feat: &FeatureConfig,
    base: &ScaledSpectrogram,
) -> Result<Vec<Peak>> {
    let mut accepted: Vec<Peak> = Vec::new();
    let mut frame: Vec<Peak> = Vec::new();
    let sep = feat.nms_min_freq_sep_bins as i32;

    let mut idx = 0;
    while idx < candidates.len() {
        let t = candidates[idx].t;

        // Confirmed candidates of this frame, strength from base.
        frame.clear();
        while idx < candidates.len() && candidates[idx].t == t {
            let c = candidates[idx];
            let strength = base.val[[c.t as usize, c.f as usize]];
            if strength >= thresholds[c.t as usize] {
                frame.push(Peak { strength, ..c });
            }
            idx += 1;
        }
        if frame.is_empty() {
            continue;
        }

        // Strongest first; ties resolve toward the lower bin.
        frame.sort_by(|a, b| b.strength.total_cmp(&a.strength).then(a.f.cmp(&b.f)));

        let mut kept: Vec<Peak> = Vec::new();
        let mut rejected: Vec<Peak> = Vec::new();
        for &cand in frame.iter() {
            if kept.len() >= feat.max_peaks_per_frame as usize {
                break;
            }
            let clash = kept
                .iter()
                .any(|k| (k.f as i32 - cand.f as i32).abs() < sep);
            if clash {
                rejected.push(cand);
            } else {
                kept.push(cand);
            }
        }

        // Density floor: backfill the strongest rejects, separation waived.
        let mut backfill = rejected.into_iter();
        while kept.len() < feat.min_peaks_per_frame as usize {
            match backfill.next() {
                Some(p) => kept.push(p),
                None => break,
            }
        }

        accepted.extend(kept);
    }

    if accepted.is_empty() {
        return Err(LandmarkError::NoPeaks);
    }

    accepted.sort_by(|a, b| a.t.cmp(&b.t).then(a.f.cmp(&b.f)));
    tracing::debug!("peaks: {} accepted", accepted.len());
    Ok(accepted)
}

/// Convenience driver: thresholds, candidates, confirmation, NMS.
pub fn extract_peaks(surfaces: &Surfaces, feat: &FeatureConfig) -> Result<Vec<Peak>> {
    let thresholds = per_frame_thresholds(&surfaces.base, feat.snr_margin_db);
    let candidates = detect_candidates(&surfaces.det, feat.neigh_dt, feat.neigh_df);
    filter_and_nms(candidates, &thresholds, feat, &surfaces.base)
}
