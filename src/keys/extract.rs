//! Per-track landmark extraction: the full pipeline from decoded audio to
//! a stable-sorted list of packed keys with anchor times.

use std::collections::BTreeMap;

use crate::audio::{condition, MidSide};
use crate::dsp::{dog, peaks, pairing, scale, stft};
use crate::error::Result;
use crate::keys::pack::{derive_version, pack_key, Key, KeyWithTime};
use crate::models::{FeatureConfig, KeyLayout, PairingConfig};
use crate::util::crc64_of_samples;

/// Everything the index needs from one track.
#[derive(Debug, Clone)]
pub struct ExtractedTrack {
    /// Landmarks, stable-sorted by (t_anchor, key bytes)
    pub keys: Vec<KeyWithTime>,
    /// Analysis frame count of the conditioned track
    pub frames: u32,
    /// Checksum of the conditioned mono samples
    pub audio_crc64: u64,
}

/// Run the whole extraction pipeline on decoded audio.
///
/// Stages run sequentially and deterministically: conditioning, STFT,
/// scaling and band crop, optional DoG, peak extraction, pairing, and
/// key packing.
pub fn extract_keys_for_track(
    input: MidSide,
    feat: &FeatureConfig,
    pair: &PairingConfig,
    layout: &KeyLayout,
) -> Result<ExtractedTrack> {
    feat.validate()?;
    pair.validate()?;
    layout.validate()?;

    let conditioned = condition(input, feat)?;
    let audio_crc64 = crc64_of_samples(&conditioned.mid.samples);

    let spec = stft::stft_magnitude(&conditioned.mid, feat)?;
    let frames = spec.frames() as u32;

    let scaled = scale::scale_and_band(spec, feat)?;
    let fprime = scaled.fprime;
    let surfaces = dog::enhance(scaled, feat)?;
    let peaks = peaks::extract_peaks(&surfaces, feat)?;

    let df_hist = pair
        .use_df_histogram
        .then(|| pairing::histogram_abs_delta_f(&peaks, fprime, pair));

    let version = derive_version(layout, feat);
    let mut keys = Vec::new();
    for anchor_idx in 0..peaks.len() {
        let anchor = peaks[anchor_idx];
        let targets = match &df_hist {
            Some(hist) => pairing::select_targets_with_hist(&peaks, anchor_idx, pair, hist),
            None => pairing::select_targets(&peaks, anchor_idx, pair),
        };
        for target in targets {
            let dt_frames = target.t - anchor.t;
            let Some(dt_bin) = pairing::quantize_dt(dt_frames, pair.delta_bin_frames, layout.bits_dt)
            else {
                continue;
            };
            let key = pack_key(anchor.f as u32, target.f as u32, dt_bin, version, layout)?;
            keys.push(KeyWithTime {
                key,
                t_anchor: anchor.t,
            });
        }
    }

    keys.sort_by(|a, b| a.t_anchor.cmp(&b.t_anchor).then(a.key.cmp(&b.key)));

    tracing::debug!(
        "extracted {} keys from {} peaks over {} frames",
        keys.len(),
        peaks.len(),
        frames
    );

    Ok(ExtractedTrack {
        keys,
        frames,
        audio_crc64,
    })
}

/// Group landmarks by key, yielding sorted-unique anchor times per key.
pub fn group_times_by_key(keys: &[KeyWithTime]) -> BTreeMap<Key, Vec<u32>> {
    let mut grouped: BTreeMap<Key, Vec<u32>> = BTreeMap::new();
    for kt in keys {
        grouped.entry(kt.key).or_default().push(kt.t_anchor);
    }
    for times in grouped.values_mut() {
        times.sort_unstable();
        times.dedup();
    }
    grouped
}
