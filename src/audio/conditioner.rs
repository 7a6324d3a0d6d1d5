//! Signal conditioning ahead of spectral analysis: DC/rumble removal,
//! anti-alias filtering, and rate conversion to the configured target rate.

use crate::audio::loader::{MidSide, Pcm};
use crate::error::{LandmarkError, Result};
use crate::models::FeatureConfig;

/// Sample rates accepted on either side of the rate conversion.
const MIN_SR: u32 = 4_000;
const MAX_SR: u32 = 384_000;

/// Biquad filter coefficients (Direct Form II Transposed).
#[derive(Debug, Clone, Copy)]
pub struct BiquadCoeffs {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    z1: f64,
    z2: f64,
}

impl BiquadCoeffs {
    /// Low-pass coefficients (RBJ cookbook).
    pub fn lowpass(sample_rate: f64, cutoff_hz: f64, q: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * cutoff_hz / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let b0 = (1.0 - cos_w0) / 2.0;
        let b1 = 1.0 - cos_w0;
        let b2 = (1.0 - cos_w0) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// High-pass coefficients (RBJ cookbook).
    pub fn highpass(sample_rate: f64, cutoff_hz: f64, q: f64) -> Self {
        let w0 = 2.0 * std::f64::consts::PI * cutoff_hz / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let b0 = (1.0 + cos_w0) / 2.0;
        let b1 = -(1.0 + cos_w0);
        let b2 = (1.0 + cos_w0) / 2.0;
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha;

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    #[inline]
    fn process_sample(&self, input: f64, state: &mut BiquadState) -> f64 {
        let output = self.b0 * input + state.z1;
        state.z1 = self.b1 * input - self.a1 * output + state.z2;
        state.z2 = self.b2 * input - self.a2 * output;
        output
    }
}

fn run_cascade(samples: &[f32], stages: &[BiquadCoeffs]) -> Vec<f32> {
    let mut out: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
    for coeffs in stages {
        let mut state = BiquadState::default();
        for sample in out.iter_mut() {
            *sample = coeffs.process_sample(*sample, &mut state);
        }
    }
    out.into_iter().map(|s| s as f32).collect()
}

/// Remove DC offset and rumble with a deterministic second-order high-pass.
/// Filter state starts at zero, so output depends only on the input.
pub fn dc_highpass(x: Pcm, cutoff_hz: f32) -> Result<Pcm> {
    if x.samples.is_empty() {
        return Err(LandmarkError::EmptyAudio);
    }
    if cutoff_hz <= 0.0 || cutoff_hz as f64 >= x.sr as f64 / 2.0 {
        return Err(LandmarkError::InvalidArgument(format!(
            "high-pass cutoff {} Hz out of range for {} Hz input",
            cutoff_hz, x.sr
        )));
    }
    let coeffs = BiquadCoeffs::highpass(x.sr as f64, cutoff_hz as f64, std::f64::consts::FRAC_1_SQRT_2);
    Ok(Pcm {
        samples: run_cascade(&x.samples, &[coeffs]),
        sr: x.sr,
    })
}

/// Anti-alias low-pass applied before any downsample: two cascaded
/// second-order sections at 0.45 x target Nyquist-safe cutoff.
pub fn pre_resample_lowpass(x: Pcm, target_sr: u32) -> Result<Pcm> {
    if x.samples.is_empty() {
        return Err(LandmarkError::EmptyAudio);
    }
    let cutoff = 0.45 * target_sr as f64;
    if cutoff >= x.sr as f64 / 2.0 {
        // Upsampling or equal rates: nothing to protect against.
        return Ok(x);
    }
    let q = std::f64::consts::FRAC_1_SQRT_2;
    let stages = [
        BiquadCoeffs::lowpass(x.sr as f64, cutoff, q),
        BiquadCoeffs::lowpass(x.sr as f64, cutoff, q),
    ];
    Ok(Pcm {
        samples: run_cascade(&x.samples, &stages),
        sr: x.sr,
    })
}

/// Deterministic linear-interpolation rate conversion. The anti-alias
/// filter must already have been applied when downsampling.
pub fn resample_linear(x: &Pcm, target_sr: u32) -> Result<Pcm> {
    if x.samples.is_empty() {
        return Err(LandmarkError::EmptyAudio);
    }
    if x.sr == target_sr {
        return Ok(x.clone());
    }
    if !(MIN_SR..=MAX_SR).contains(&x.sr) || !(MIN_SR..=MAX_SR).contains(&target_sr) {
        return Err(LandmarkError::Resample(format!(
            "unsupported rate conversion {} -> {} Hz",
            x.sr, target_sr
        )));
    }

    let ratio = x.sr as f64 / target_sr as f64;
    let out_len = (x.samples.len() as f64 / ratio).floor() as usize;
    if out_len == 0 {
        return Err(LandmarkError::Resample(format!(
            "input too short to resample to {} Hz",
            target_sr
        )));
    }
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;
        let s0 = x.samples.get(idx).copied().unwrap_or(0.0);
        let s1 = x.samples.get(idx + 1).copied().unwrap_or(s0);
        out.push(s0 + (s1 - s0) * frac);
    }
    Ok(Pcm {
        samples: out,
        sr: target_sr,
    })
}

/// Full conditioning chain: high-pass, anti-alias, resample. Side (when
/// present) receives the same treatment so collaborators see a coherent
/// pair. Equal input/output rates skip the resample step.
pub fn condition(input: MidSide, feat: &FeatureConfig) -> Result<MidSide> {
    let input_sr = input.mid.sr;
    tracing::debug!(
        "conditioning {} samples: {} Hz -> {} Hz",
        input.mid.samples.len(),
        input_sr,
        feat.target_sr
    );

    let condition_one = |pcm: Pcm| -> Result<Pcm> {
        let pcm = dc_highpass(pcm, feat.dc_cutoff_hz)?;
        if pcm.sr == feat.target_sr {
            return Ok(pcm);
        }
        let pcm = pre_resample_lowpass(pcm, feat.target_sr)?;
        resample_linear(&pcm, feat.target_sr)
    };

    let mid = condition_one(input.mid)?;
    let side = input.side.map(condition_one).transpose()?;
    Ok(MidSide { mid, side })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: u32, n: usize) -> Pcm {
        let samples = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect();
        Pcm { samples, sr }
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn highpass_removes_dc() {
        let sr = 16_000;
        let pcm = Pcm {
            samples: vec![0.5; sr as usize],
            sr,
        };
        let out = dc_highpass(pcm, 30.0).unwrap();
        // Steady-state tail should sit near zero once the filter settles.
        let tail = &out.samples[out.samples.len() / 2..];
        assert!(rms(tail) < 0.01, "tail rms {}", rms(tail));
    }

    #[test]
    fn highpass_passes_band_content() {
        let pcm = sine(1_000.0, 16_000, 16_000);
        let before = rms(&pcm.samples);
        let out = dc_highpass(pcm, 30.0).unwrap();
        let after = rms(&out.samples);
        assert!((after / before) > 0.9);
    }

    #[test]
    fn antialias_attenuates_above_target_band() {
        // 7 kHz tone at 48 kHz would alias when dropping to 8 kHz.
        let pcm = sine(7_000.0, 48_000, 48_000);
        let before = rms(&pcm.samples);
        let out = pre_resample_lowpass(pcm, 8_000).unwrap();
        let after = rms(&out.samples[out.samples.len() / 2..]);
        assert!(after < before * 0.3, "insufficient attenuation: {after}");
    }

    #[test]
    fn resample_preserves_duration() {
        let pcm = sine(440.0, 48_000, 48_000);
        let out = resample_linear(&pcm, 16_000).unwrap();
        assert_eq!(out.sr, 16_000);
        let expect = 16_000.0;
        assert!((out.samples.len() as f64 - expect).abs() <= 1.0);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let pcm = sine(440.0, 16_000, 1_024);
        let out = resample_linear(&pcm, 16_000).unwrap();
        assert_eq!(out.samples, pcm.samples);
    }

    #[test]
    fn resample_rejects_silly_rates() {
        let pcm = Pcm {
            samples: vec![0.0; 100],
            sr: 1_000,
        };
        assert!(matches!(
            resample_linear(&pcm, 16_000),
            Err(LandmarkError::Resample(_))
        ));
    }

    #[test]
    fn condition_is_deterministic() {
        let input = MidSide {
            mid: sine(440.0, 44_100, 44_100),
            side: None,
        };
        let feat = FeatureConfig::default();
        let a = condition(input.clone(), &feat).unwrap();
        let b = condition(input, &feat).unwrap();
        assert_eq!(a.mid.samples, b.mid.samples);
        assert_eq!(a.mid.sr, feat.target_sr);
    }
}
