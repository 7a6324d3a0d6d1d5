use serde::{Deserialize, Serialize};

use crate::error::{LandmarkError, Result};

/// Byte order used when serializing packed keys to their 16-byte on-disk
/// form. The logical integer is endian-independent; only the serialization
/// changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    Little,
    Big,
}

/// Feature extraction configuration. Shared verbatim between index build
/// and query; any drift is caught through the layout version byte stored in
/// per-track metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Target sample rate after conditioning (Hz)
    pub target_sr: u32,
    /// FFT frame size in samples
    pub frame_size: u32,
    /// Hop size in samples
    pub hop_size: u32,
    /// DC/rumble high-pass cutoff (Hz)
    pub dc_cutoff_hz: f32,
    /// Apply PCEN instead of plain log compression
    pub use_pcen: bool,
    /// Apply frequency-only Difference-of-Gaussians enhancement
    pub use_dog: bool,
    /// Use time-frequency reassigned magnitude
    pub use_reassignment: bool,
    /// Lower band edge (Hz), inclusive
    pub band_min_hz: f32,
    /// Upper band edge (Hz), inclusive
    pub band_max_hz: f32,
    /// Lower percentile for value clipping
    pub clip_low_pct: f32,
    /// Upper percentile for value clipping
    pub clip_high_pct: f32,
    /// SNR margin added to the per-frame noise floor (dB)
    pub snr_margin_db: f32,
    /// Minimum frequency separation between peaks within a frame (bins)
    pub nms_min_freq_sep_bins: u8,
    /// Local-maximum neighborhood half-width in time (frames)
    pub neigh_dt: u8,
    /// Local-maximum neighborhood half-width in frequency (bins)
    pub neigh_df: u8,
    /// Upper peak count cap per frame
    pub max_peaks_per_frame: u8,
    /// Lower peak count bound per frame (backfilled if short)
    pub min_peaks_per_frame: u8,
    /// Narrow DoG sigma (bins)
    pub dog_sigma1_bins: f32,
    /// Wide DoG sigma (bins)
    pub dog_sigma2_bins: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            target_sr: 16_000,
            frame_size: 1024,
            hop_size: 512,
            dc_cutoff_hz: 30.0,
            use_pcen: false,
            use_dog: true,
            use_reassignment: false,
            band_min_hz: 300.0,
            band_max_hz: 6_000.0,
            clip_low_pct: 5.0,
            clip_high_pct: 99.5,
            snr_margin_db: 6.0,
            nms_min_freq_sep_bins: 3,
            neigh_dt: 2,
            neigh_df: 3,
            max_peaks_per_frame: 5,
            min_peaks_per_frame: 1,
            dog_sigma1_bins: 1.0,
            dog_sigma2_bins: 2.5,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target_sr == 0 {
            return Err(LandmarkError::InvalidArgument(
                "target_sr must be > 0".into(),
            ));
        }
        if self.frame_size == 0 || self.hop_size == 0 {
            return Err(LandmarkError::InvalidArgument(
                "frame_size and hop_size must be > 0".into(),
            ));
        }
        if self.band_max_hz <= self.band_min_hz {
            return Err(LandmarkError::InvalidArgument(format!(
                "band [{}, {}] Hz is empty",
                self.band_min_hz, self.band_max_hz
            )));
        }
        if !(0.0..=100.0).contains(&self.clip_low_pct)
            || !(0.0..=100.0).contains(&self.clip_high_pct)
            || self.clip_high_pct <= self.clip_low_pct
        {
            return Err(LandmarkError::InvalidArgument(format!(
                "clip percentiles [{}, {}] out of order",
                self.clip_low_pct, self.clip_high_pct
            )));
        }
        if self.use_dog && self.dog_sigma2_bins <= self.dog_sigma1_bins {
            return Err(LandmarkError::InvalidArgument(
                "dog_sigma2_bins must exceed dog_sigma1_bins".into(),
            ));
        }
        if self.min_peaks_per_frame > self.max_peaks_per_frame {
            return Err(LandmarkError::InvalidArgument(
                "min_peaks_per_frame exceeds max_peaks_per_frame".into(),
            ));
        }
        Ok(())
    }
}

/// Anchor/target pairing window and budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Minimum forward distance from anchor to target (frames)
    pub dt_min_frames: u16,
    /// Maximum forward distance from anchor to target (frames)
    pub dt_max_frames: u16,
    /// Quantization step for the time delta (frames)
    pub delta_bin_frames: u16,
    /// Maximum targets paired with one anchor
    pub max_targets_per_anchor: u8,
    /// Rank targets by strength deweighted by the whole-track |df|
    /// histogram, suppressing hot comb lines
    pub use_df_histogram: bool,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            dt_min_frames: 1,
            dt_max_frames: 64,
            delta_bin_frames: 1,
            max_targets_per_anchor: 3,
            use_df_histogram: false,
        }
    }
}

impl PairingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dt_min_frames >= self.dt_max_frames {
            return Err(LandmarkError::InvalidArgument(format!(
                "pairing window [{}, {}] is empty",
                self.dt_min_frames, self.dt_max_frames
            )));
        }
        if self.delta_bin_frames == 0 {
            return Err(LandmarkError::InvalidArgument(
                "delta_bin_frames must be >= 1".into(),
            ));
        }
        if self.max_targets_per_anchor == 0 {
            return Err(LandmarkError::InvalidArgument(
                "max_targets_per_anchor must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

/// Bit budget of the packed landmark key. Field order within the logical
/// integer, most significant first: shard, version, anchor frequency,
/// target frequency, time-delta bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyLayout {
    /// Total packed width: 32, 40, 48, or 64 bits
    pub total_bits: u8,
    /// Bits for the anchor frequency bin
    pub bits_fa: u8,
    /// Bits for the target frequency bin
    pub bits_ft: u8,
    /// Bits for the quantized time delta
    pub bits_dt: u8,
    /// Optional shard prefix bits (0 = hashed sharding)
    pub bits_shard: u8,
    /// Optional version nibble bits
    pub bits_ver: u8,
    /// On-disk byte order of the 16-byte serialized key
    pub endian: Endianness,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self {
            total_bits: 64,
            bits_fa: 12,
            bits_ft: 12,
            bits_dt: 14,
            bits_shard: 8,
            bits_ver: 4,
            endian: Endianness::Little,
        }
    }
}

impl KeyLayout {
    /// Sum of all field widths.
    pub fn used_bits(&self) -> u32 {
        self.bits_fa as u32
            + self.bits_ft as u32
            + self.bits_dt as u32
            + self.bits_shard as u32
            + self.bits_ver as u32
    }

    pub fn validate(&self) -> Result<()> {
        if !matches!(self.total_bits, 32 | 40 | 48 | 64) {
            return Err(LandmarkError::InvalidArgument(format!(
                "unsupported key width: {} bits",
                self.total_bits
            )));
        }
        if self.used_bits() > self.total_bits as u32 {
            return Err(LandmarkError::InvalidArgument(format!(
                "field bits ({}) exceed key width ({})",
                self.used_bits(),
                self.total_bits
            )));
        }
        if self.bits_fa == 0 || self.bits_ft == 0 || self.bits_dt == 0 {
            return Err(LandmarkError::InvalidArgument(
                "fa/ft/dt fields must all be present".into(),
            ));
        }
        Ok(())
    }
}

/// Index build configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub feature: FeatureConfig,
    pub pairing: PairingConfig,
    pub key_layout: KeyLayout,
    /// Shard fan-out of the store created by the build
    pub shards: u16,
    /// Posting value compression; only "none" is supported
    pub value_compression: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            feature: FeatureConfig::default(),
            pairing: PairingConfig::default(),
            key_layout: KeyLayout::default(),
            shards: 16,
            value_compression: "none".into(),
        }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<()> {
        self.feature.validate()?;
        self.pairing.validate()?;
        self.key_layout.validate()?;
        if self.shards == 0 {
            return Err(LandmarkError::InvalidArgument("shards must be > 0".into()));
        }
        if self.value_compression != "none" {
            return Err(LandmarkError::InvalidArgument(format!(
                "unsupported value compression: {}",
                self.value_compression
            )));
        }
        Ok(())
    }
}

/// Query-time configuration. Feature, pairing, and layout must match the
/// configuration the index was built with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifyConfig {
    pub feature: FeatureConfig,
    pub pairing: PairingConfig,
    pub key_layout: KeyLayout,
    /// Minimum fraction of query frames voting for the winner
    pub min_coverage: f32,
    /// Maximum Shannon entropy (bits) of the offset mode window
    pub max_entropy: f32,
    /// Optional wall-clock budget for the whole query (milliseconds)
    pub deadline_ms: Option<u64>,
}

impl Default for IdentifyConfig {
    fn default() -> Self {
        Self {
            feature: FeatureConfig::default(),
            pairing: PairingConfig::default(),
            key_layout: KeyLayout::default(),
            min_coverage: 0.1,
            max_entropy: 3.0,
            deadline_ms: None,
        }
    }
}

impl IdentifyConfig {
    pub fn validate(&self) -> Result<()> {
        self.feature.validate()?;
        self.pairing.validate()?;
        self.key_layout.validate()?;
        if !(0.0..=1.0).contains(&self.min_coverage) {
            return Err(LandmarkError::InvalidArgument(
                "min_coverage must lie in [0, 1]".into(),
            ));
        }
        if self.max_entropy < 0.0 {
            return Err(LandmarkError::InvalidArgument(
                "max_entropy must be non-negative".into(),
            ));
        }
        Ok(())
    }
}
