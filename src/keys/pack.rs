//! Fixed-width landmark key packing. The logical value is a `u128` whose
//! low `total_bits` hold, most significant first:
//! `[shard?] [ver?] [f_a] [f_t] [dt_bin]`. On disk a key is 16 bytes in
//! the layout's endianness with unused high bytes zeroed.

use crate::error::{LandmarkError, Result};
use crate::models::{Endianness, FeatureConfig, KeyLayout};
use crate::util::mix64;

/// Opaque packed landmark key: 16 raw bytes in canonical on-disk order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(pub [u8; 16]);

impl Key {
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Key(bytes)
    }

    /// Recover the logical integer from the serialized form.
    pub fn logical(&self, endian: Endianness) -> u128 {
        match endian {
            Endianness::Little => u128::from_le_bytes(self.0),
            Endianness::Big => u128::from_be_bytes(self.0),
        }
    }

    fn from_logical(value: u128, endian: Endianness) -> Self {
        let bytes = match endian {
            Endianness::Little => value.to_le_bytes(),
            Endianness::Big => value.to_be_bytes(),
        };
        Key(bytes)
    }
}

/// A landmark key with its anchor time in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyWithTime {
    pub key: Key,
    pub t_anchor: u32,
}

fn mask(bits: u8) -> u128 {
    if bits == 0 {
        0
    } else {
        (1u128 << bits) - 1
    }
}

fn check_fits(name: &str, value: u32, bits: u8) -> Result<()> {
    if (value as u128) > mask(bits) {
        return Err(LandmarkError::NumericOverflow(format!(
            "{} = {} does not fit in {} bits",
            name, value, bits
        )));
    }
    Ok(())
}

/// Pack one landmark into a key. The shard field, when present, is filled
/// from a pinned mix of the payload fields so sharding stays a pure
/// function of the key; the version field carries the low bits of
/// `version`.
pub fn pack_key(f_a: u32, f_t: u32, dt_bin: u32, version: u8, layout: &KeyLayout) -> Result<Key> {
    layout.validate()?;
    check_fits("f_a", f_a, layout.bits_fa)?;
    check_fits("f_t", f_t, layout.bits_ft)?;
    check_fits("dt_bin", dt_bin, layout.bits_dt)?;

    let payload = ((f_a as u128) << (layout.bits_ft + layout.bits_dt))
        | ((f_t as u128) << layout.bits_dt)
        | dt_bin as u128;

    let mut value = payload;
    let mut shift = layout.bits_fa + layout.bits_ft + layout.bits_dt;
    if layout.bits_ver > 0 {
        value |= ((version as u128) & mask(layout.bits_ver)) << shift;
        shift += layout.bits_ver;
    }
    if layout.bits_shard > 0 {
        let shard_bits = mix64(payload as u64) as u128 & mask(layout.bits_shard);
        value |= shard_bits << shift;
    }

    Ok(Key::from_logical(value, layout.endian))
}

/// Recover `(f_a, f_t, dt_bin)` from a packed key.
pub fn unpack_key(key: &Key, layout: &KeyLayout) -> Result<(u32, u32, u32)> {
    layout.validate()?;
    let value = key.logical(layout.endian);
    let dt_bin = (value & mask(layout.bits_dt)) as u32;
    let f_t = ((value >> layout.bits_dt) & mask(layout.bits_ft)) as u32;
    let f_a = ((value >> (layout.bits_dt + layout.bits_ft)) & mask(layout.bits_fa)) as u32;
    Ok((f_a, f_t, dt_bin))
}

/// Shard id for a key. Operates on the logical integer, never the
/// serialized bytes, so the result is independent of the declared
/// endianness.
pub fn shard_for_key(key: &Key, layout: &KeyLayout, shards: u16) -> u16 {
    debug_assert!(shards > 0);
    let value = key.logical(layout.endian);
    if layout.bits_shard > 0 {
        let shift = layout.bits_fa as u32
            + layout.bits_ft as u32
            + layout.bits_dt as u32
            + layout.bits_ver as u32;
        let field = (value >> shift) & mask(layout.bits_shard);
        (field % shards as u128) as u16
    } else {
        (mix64(value as u64) % shards as u64) as u16
    }
}

/// Version byte covering everything that changes key meaning: the bit
/// layout, the endianness, and the feature flags that alter the surface
/// the keys were extracted from. Indices whose bytes differ are never
/// comparable.
pub fn derive_version(layout: &KeyLayout, feat: &FeatureConfig) -> u8 {
    let endian_bit = match layout.endian {
        Endianness::Little => 0u64,
        Endianness::Big => 1u64,
    };
    let descriptor = layout.total_bits as u64
        | (layout.bits_fa as u64) << 8
        | (layout.bits_ft as u64) << 16
        | (layout.bits_dt as u64) << 24
        | (layout.bits_shard as u64) << 32
        | (layout.bits_ver as u64) << 40
        | endian_bit << 48
        | (feat.use_pcen as u64) << 49
        | (feat.use_dog as u64) << 50
        | (feat.use_reassignment as u64) << 51;
    (mix64(descriptor) & 0xFF) as u8
}
