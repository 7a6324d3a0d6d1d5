//! Frequency-axis Difference-of-Gaussians enhancement. Blurring runs along
//! frequency only, so tonal ridges survive while broadband texture and
//! slow spectral tilt cancel out of the detection surface.

use ndarray::Array2;

use crate::dsp::scale::ScaledSpectrogram;
use crate::error::{LandmarkError, Result};
use crate::models::FeatureConfig;

/// Detection and confirmation surfaces consumed by peak extraction.
/// With DoG disabled both are the scaled surface itself.
#[derive(Debug, Clone)]
pub struct Surfaces {
    /// Where local maxima are searched
    pub det: ScaledSpectrogram,
    /// Where candidates are confirmed and strengths are read
    pub base: ScaledSpectrogram,
}

/// Symmetric Gaussian kernel truncated at ceil(3 sigma), normalized to
/// unit sum.
fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil() as usize;
    let mut kernel = Vec::with_capacity(2 * radius + 1);
    let denom = 2.0 * sigma * sigma;
    for i in 0..=(2 * radius) {
        let d = i as f32 - radius as f32;
        kernel.push((-d * d / denom).exp());
    }
    let sum: f32 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Separable Gaussian blur along the frequency axis of a [T, F'] grid.
/// Edges renormalize over the in-range taps, so border bins are not
/// dimmed relative to the interior.
pub fn gaussian_blur_freq(m: &Array2<f32>, sigma: f32) -> Array2<f32> {
    let (n_frames, n_bins) = m.dim();
    let kernel = gaussian_kernel(sigma);
    let radius = kernel.len() / 2;
    let mut out = Array2::<f32>::zeros((n_frames, n_bins));

    for t in 0..n_frames {
        for f in 0..n_bins {
            let mut acc = 0.0f32;
            let mut weight = 0.0f32;
            for (ki, &kv) in kernel.iter().enumerate() {
                let offset = ki as isize - radius as isize;
                let src = f as isize + offset;
                if src < 0 || src >= n_bins as isize {
                    continue;
                }
                acc += kv * m[[t, src as usize]];
                weight += kv;
            }
            out[[t, f]] = acc / weight;
        }
    }

    out
}

/// Build the detection/base surface pair from the scaled spectrogram.
pub fn enhance(scaled: ScaledSpectrogram, feat: &FeatureConfig) -> Result<Surfaces> {
    if !feat.use_dog {
        return Ok(Surfaces {
            det: scaled.clone(),
            base: scaled,
        });
    }
    if feat.dog_sigma2_bins <= feat.dog_sigma1_bins {
        return Err(LandmarkError::InvalidArgument(
            "dog_sigma2_bins must exceed dog_sigma1_bins".into(),
        ));
    }

    let g1 = gaussian_blur_freq(&scaled.val, feat.dog_sigma1_bins);
    let g2 = gaussian_blur_freq(&scaled.val, feat.dog_sigma2_bins);
    let det_val = &g1 - &g2;

    let det = ScaledSpectrogram {
        val: det_val,
        ..scaled.clone()
    };
    let base = ScaledSpectrogram { val: g1, ..scaled };
    Ok(Surfaces { det, base })
}
