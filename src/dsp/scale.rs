//! Magnitude scaling, band cropping, and percentile clipping.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::dsp::stft::Spectrogram;
use crate::error::{LandmarkError, Result};
use crate::models::FeatureConfig;

/// Floor under magnitudes before any log mapping.
const MAG_EPS: f32 = 1e-10;

/// PCEN parameters, fixed so index and query agree by construction.
const PCEN_SMOOTH: f32 = 0.025;
const PCEN_ALPHA: f32 = 0.98;
const PCEN_DELTA: f32 = 2.0;
const PCEN_ROOT: f32 = 0.5;

/// Cap on cells sorted for percentile selection; larger grids are strided.
const CLIP_SAMPLE_CAP: usize = 65_536;

/// Scale applied to the banded surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleUnit {
    LogDb,
    PcenLogDb,
}

/// Band-limited scaled surface, rows = frames, cols = banded bins.
#[derive(Debug, Clone)]
pub struct ScaledSpectrogram {
    pub val: Array2<f32>,
    pub sr: u32,
    pub fft: u32,
    pub hop: u32,
    /// Inclusive start bin within the original fft/2+1 grid
    pub f0_bin: u16,
    /// Banded bin count
    pub fprime: u16,
    pub unit: ScaleUnit,
}

impl ScaledSpectrogram {
    pub fn frames(&self) -> usize {
        self.val.nrows()
    }
}

/// Percentile clip bounds over the surface cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipBounds {
    pub lo: f32,
    pub hi: f32,
}

/// Scale magnitudes to a dB-like unit, crop to the configured band, and
/// clip to robust percentiles.
pub fn scale_and_band(spec: Spectrogram, feat: &FeatureConfig) -> Result<ScaledSpectrogram> {
    let n_bins = spec.bins();
    let bin_hz = spec.sr as f32 / spec.fft as f32;

    // Contiguous bins whose center frequencies fall inside the band.
    let f0_bin = (0..n_bins)
        .find(|&k| k as f32 * bin_hz >= feat.band_min_hz)
        .ok_or_else(|| {
            LandmarkError::InvalidArgument(format!(
                "band floor {} Hz above spectrum",
                feat.band_min_hz
            ))
        })?;
    let f1_bin = (f0_bin..n_bins)
        .take_while(|&k| k as f32 * bin_hz <= feat.band_max_hz)
        .last()
        .ok_or_else(|| {
            LandmarkError::InvalidArgument(format!(
                "band [{}, {}] Hz selects no bins",
                feat.band_min_hz, feat.band_max_hz
            ))
        })?;
    let fprime = f1_bin - f0_bin + 1;

    let banded = spec.mag.slice(ndarray::s![.., f0_bin..=f1_bin]).to_owned();

    let (mut val, unit) = if feat.use_pcen {
        (pcen_log_db(&banded), ScaleUnit::PcenLogDb)
    } else {
        (banded.mapv(|m| 20.0 * m.max(MAG_EPS).log10()), ScaleUnit::LogDb)
    };

    let bounds = percentile_clip_bounds(&val, feat.clip_low_pct, feat.clip_high_pct)?;
    val.mapv_inplace(|v| v.clamp(bounds.lo, bounds.hi));

    tracing::debug!(
        "scaled surface: {} frames x {} bins, f0_bin={}, unit={:?}, clip=[{:.1}, {:.1}]",
        val.nrows(),
        fprime,
        f0_bin,
        unit,
        bounds.lo,
        bounds.hi
    );

    Ok(ScaledSpectrogram {
        val,
        sr: spec.sr,
        fft: spec.fft,
        hop: spec.hop,
        f0_bin: f0_bin as u16,
        fprime: fprime as u16,
        unit,
    })
}

/// Per-Channel Energy Normalization with a first-order IIR smoother per
/// band, mapped onto a dB-like scale so thresholds stay comparable with
/// the plain log path.
fn pcen_log_db(mag: &Array2<f32>) -> Array2<f32> {
    let (n_frames, n_bins) = mag.dim();
    let mut out = Array2::<f32>::zeros((n_frames, n_bins));

    for f in 0..n_bins {
        let mut smoother = mag[[0, f]];
        for t in 0..n_frames {
            let m = mag[[t, f]];
            smoother = (1.0 - PCEN_SMOOTH) * smoother + PCEN_SMOOTH * m;
            let gain = (MAG_EPS + smoother).powf(PCEN_ALPHA);
            let pcen = (m / gain + PCEN_DELTA).powf(PCEN_ROOT) - PCEN_DELTA.powf(PCEN_ROOT);
            out[[t, f]] = 20.0 * (pcen + 1.0).max(MAG_EPS).log10();
        }
    }

    out
}

/// Robust clip bounds from the `p_lo` / `p_hi` percentiles of the cells.
/// Selection is deterministic: large grids are sampled with a fixed
/// stride from cell zero, then sorted with a total order.
pub fn percentile_clip_bounds(val: &Array2<f32>, p_lo: f32, p_hi: f32) -> Result<ClipBounds> {
    let cells = val.len();
    if cells == 0 {
        return Err(LandmarkError::NoFrames);
    }

    let stride = cells.div_ceil(CLIP_SAMPLE_CAP).max(1);
    let mut sampled: Vec<f32> = val.iter().copied().step_by(stride).collect();
    sampled.sort_by(f32::total_cmp);

    let pick = |pct: f32| -> f32 {
        // Nearest-rank selection.
        let rank = (pct / 100.0 * (sampled.len() - 1) as f32).round() as usize;
        sampled[rank.min(sampled.len() - 1)]
    };

    let lo = pick(p_lo);
    let hi = pick(p_hi);
    Ok(ClipBounds { lo, hi })
}
