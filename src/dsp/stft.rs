//! Short-time spectral analysis: Hann magnitude STFT and the optional
//! time-frequency reassigned magnitude.
//!
//! Reassignment convention: per cell, corrections are derived from the
//! derivative-window and time-weighted-window transforms,
//! `w_hat = w - Im(X_dh * conj(X_h)) / |X_h|^2` and
//! `t_hat = t + Re(X_th * conj(X_h)) / |X_h|^2`, and each cell's energy
//! `|X_h|^2` is deposited into the nearest reassigned grid cell.
//! Off-grid reassignments are dropped; the surface is the square root of
//! the accumulated energy.

use ndarray::Array2;
use num_complex::Complex32;
use rustfft::FftPlanner;
use std::f32::consts::PI;

use crate::audio::Pcm;
use crate::error::{LandmarkError, Result};
use crate::models::FeatureConfig;

/// Magnitude time-frequency grid, rows = frames, cols = fft/2+1 bins.
#[derive(Debug, Clone)]
pub struct Spectrogram {
    pub mag: Array2<f32>,
    pub sr: u32,
    pub fft: u32,
    pub hop: u32,
}

impl Spectrogram {
    pub fn frames(&self) -> usize {
        self.mag.nrows()
    }

    pub fn bins(&self) -> usize {
        self.mag.ncols()
    }
}

/// Number of full analysis frames for a signal of `n` samples.
/// Frames beyond the last full window are discarded.
pub fn num_frames(n: usize, fft: usize, hop: usize) -> usize {
    if n < fft {
        0
    } else {
        (n - fft) / hop + 1
    }
}

fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / (n as f32 - 1.0)).cos()))
        .collect()
}

/// Per-sample derivative of the Hann window.
fn hann_derivative(n: usize) -> Vec<f32> {
    let scale = 2.0 * PI / (n as f32 - 1.0);
    (0..n)
        .map(|i| 0.5 * scale * (scale * i as f32).sin())
        .collect()
}

/// Hann window weighted by centered sample index.
fn hann_time_weighted(n: usize) -> Vec<f32> {
    let center = (n as f32 - 1.0) / 2.0;
    hann_window(n)
        .into_iter()
        .enumerate()
        .map(|(i, w)| (i as f32 - center) * w)
        .collect()
}

/// Compute the magnitude STFT of conditioned PCM. With
/// `use_reassignment` set, the reassigned magnitude is returned instead.
pub fn stft_magnitude(pcm: &Pcm, feat: &FeatureConfig) -> Result<Spectrogram> {
    let fft_size = feat.frame_size as usize;
    let hop = feat.hop_size as usize;
    let n_frames = num_frames(pcm.samples.len(), fft_size, hop);
    if n_frames == 0 {
        return Err(LandmarkError::NoFrames);
    }

    let mag = if feat.use_reassignment {
        reassigned_magnitude(&pcm.samples, fft_size, hop, n_frames)
    } else {
        plain_magnitude(&pcm.samples, fft_size, hop, n_frames)
    };

    tracing::debug!(
        "stft: {} frames x {} bins (fft={}, hop={}, reassigned={})",
        n_frames,
        fft_size / 2 + 1,
        fft_size,
        hop,
        feat.use_reassignment
    );

    Ok(Spectrogram {
        mag,
        sr: pcm.sr,
        fft: feat.frame_size,
        hop: feat.hop_size,
    })
}

fn plain_magnitude(samples: &[f32], fft_size: usize, hop: usize, n_frames: usize) -> Array2<f32> {
    let n_bins = fft_size / 2 + 1;
    let mut mag = Array2::<f32>::zeros((n_frames, n_bins));

    let window = hann_window(fft_size);

    // FFT planner (reused across frames)
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);
    let mut buffer = vec![Complex32::new(0.0, 0.0); fft_size];

    for frame_idx in 0..n_frames {
        let start = frame_idx * hop;
        for i in 0..fft_size {
            buffer[i] = Complex32::new(samples[start + i] * window[i], 0.0);
        }
        fft.process(&mut buffer);
        for (k, c) in buffer.iter().take(n_bins).enumerate() {
            mag[[frame_idx, k]] = c.norm();
        }
    }

    mag
}

fn reassigned_magnitude(
    samples: &[f32],
    fft_size: usize,
    hop: usize,
    n_frames: usize,
) -> Array2<f32> {
    const EPS: f32 = 1e-12;

    let n_bins = fft_size / 2 + 1;
    let mut energy = Array2::<f32>::zeros((n_frames, n_bins));

    let w_h = hann_window(fft_size);
    let w_dh = hann_derivative(fft_size);
    let w_th = hann_time_weighted(fft_size);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);

    let mut buf_h = vec![Complex32::new(0.0, 0.0); fft_size];
    let mut buf_dh = vec![Complex32::new(0.0, 0.0); fft_size];
    let mut buf_th = vec![Complex32::new(0.0, 0.0); fft_size];

    // Bin spacing in radians per sample.
    let bin_step = 2.0 * PI / fft_size as f32;

    for frame_idx in 0..n_frames {
        let start = frame_idx * hop;
        for i in 0..fft_size {
            let s = samples[start + i];
            buf_h[i] = Complex32::new(s * w_h[i], 0.0);
            buf_dh[i] = Complex32::new(s * w_dh[i], 0.0);
            buf_th[i] = Complex32::new(s * w_th[i], 0.0);
        }
        fft.process(&mut buf_h);
        fft.process(&mut buf_dh);
        fft.process(&mut buf_th);

        for k in 0..n_bins {
            let xh = buf_h[k];
            let p = xh.norm_sqr();
            if p <= EPS {
                // Negligible energy carries no reliable correction.
                energy[[frame_idx, k]] += p;
                continue;
            }
            let cross_dh = buf_dh[k] * xh.conj();
            let cross_th = buf_th[k] * xh.conj();
            let dw = -cross_dh.im / p; // rad/sample
            let dt = cross_th.re / p; // samples

            let k_hat = k as f32 + dw / bin_step;
            let t_hat = frame_idx as f32 + dt / hop as f32;

            let k_new = k_hat.round();
            let t_new = t_hat.round();
            if k_new < 0.0
                || k_new >= n_bins as f32
                || t_new < 0.0
                || t_new >= n_frames as f32
            {
                continue;
            }
            energy[[t_new as usize, k_new as usize]] += p;
        }
    }

    energy.mapv_into(f32::sqrt)
}
