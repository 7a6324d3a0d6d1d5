//! End-to-end scenarios over synthetic audio: index tone-complex tracks
//! into a temp-dir store, then identify full tracks, aligned clips,
//! unknown noise, and corrupted postings.

use std::f32::consts::PI;

use tempfile::TempDir;

use crate::audio::{MidSide, Pcm};
use crate::error::LandmarkError;
use crate::index::postings::{encode_posting_block, parse_posting_blocks, PostingIter};
use crate::index::store::{OpenMode, ShardedStore};
use crate::index::{build_index, ingest_track, TrackSource};
use crate::keys::{extract_keys_for_track, pack_key, shard_for_key};
use crate::models::{
    BuildConfig, Endianness, IdentifyConfig, IdentifyOutcome, KeyLayout, NoMatchReason,
};
use crate::search::identify_audio;
use crate::search::rank::{offset_bin, select_best_by_votes, VoteTable};
use crate::util::mix64;

const SR: u32 = 16_000;
/// Quarter-second segments keep landmarks time-localized.
const SEGMENT: usize = 4_000;

/// Deterministic tone-complex track: three partials re-drawn every
/// quarter second from a seeded generator, so the spectrum moves and
/// landmarks anchor to distinct times.
fn synth_track(seed: u64, seconds: f32) -> Vec<f32> {
    let n = (SR as f32 * seconds) as usize;
    let mut samples = vec![0.0f32; n];
    for (seg_idx, chunk) in samples.chunks_mut(SEGMENT).enumerate() {
        let mut state = mix64(seed ^ (seg_idx as u64).wrapping_mul(0x0BAD_5EED));
        let mut partials = [(0.0f32, 0.0f32); 3];
        for partial in partials.iter_mut() {
            state = mix64(state);
            let freq = 350.0 + (state % 5_000) as f32;
            state = mix64(state);
            let amp = 0.18 + (state % 100) as f32 / 500.0;
            *partial = (freq, amp);
        }
        for (i, sample) in chunk.iter_mut().enumerate() {
            let t = (seg_idx * SEGMENT + i) as f32 / SR as f32;
            *sample = partials
                .iter()
                .map(|(f, a)| a * (2.0 * PI * f * t).sin())
                .sum();
        }
    }
    samples
}

fn white_noise(seed: u64, seconds: f32) -> Vec<f32> {
    let n = (SR as f32 * seconds) as usize;
    (0..n)
        .map(|i| {
            let bits = mix64(seed ^ i as u64);
            (bits % 20_001) as f32 / 10_000.0 - 1.0
        })
        .map(|s| s * 0.5)
        .collect()
}

fn mono(samples: Vec<f32>) -> MidSide {
    MidSide {
        mid: Pcm { samples, sr: SR },
        side: None,
    }
}

fn clip(samples: &[f32], start_sec: f32, len_sec: f32) -> Vec<f32> {
    let start = (start_sec * SR as f32) as usize;
    let end = start + (len_sec * SR as f32) as usize;
    samples[start..end.min(samples.len())].to_vec()
}

fn build_store(dir: &TempDir, cfg: &BuildConfig, tracks: &[(u32, Vec<f32>)]) -> ShardedStore {
    let store = ShardedStore::open(dir.path(), OpenMode::Create, cfg.shards).unwrap();
    for (track_id, samples) in tracks {
        ingest_track(&store, *track_id, mono(samples.clone()), cfg).unwrap();
    }
    store.finalize_shards().unwrap();
    store
}

/// Minimal 16-bit mono PCM WAV writer for fixture files.
fn write_wav(path: &std::path::Path, samples: &[f32], sr: u32) {
    let data_len = (samples.len() * 2) as u32;
    let mut wav = Vec::with_capacity(44 + data_len as usize);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVEfmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sr.to_le_bytes());
    wav.extend_from_slice(&(sr * 2).to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        wav.extend_from_slice(&v.to_le_bytes());
    }
    std::fs::write(path, wav).unwrap();
}

#[test]
fn s1_self_identify_full_track() {
    let dir = TempDir::new().unwrap();
    let track = synth_track(7, 60.0);
    let build = BuildConfig::default();
    let store = build_store(&dir, &build, &[(1, track.clone())]);

    let cfg = IdentifyConfig::default();
    let outcome = identify_audio(mono(track), &cfg, &store, None).unwrap();
    match outcome {
        IdentifyOutcome::Match {
            track_id,
            offset_seconds,
            score,
        } => {
            assert_eq!(track_id, 1);
            let hop_sec = cfg.feature.hop_size as f64 / cfg.feature.target_sr as f64;
            assert!(
                offset_seconds.abs() <= hop_sec + 1e-9,
                "offset {} s",
                offset_seconds
            );
            assert!(score >= 0.9, "score {}", score);
        }
        other => panic!("expected match, got {:?}", other),
    }
}

#[test]
fn s2_aligned_clip_recovers_offset() {
    let dir = TempDir::new().unwrap();
    let track = synth_track(7, 60.0);
    let build = BuildConfig::default();
    let store = build_store(&dir, &build, &[(1, track.clone())]);

    let cfg = IdentifyConfig::default();
    let query = clip(&track, 20.0, 5.0);
    let outcome = identify_audio(mono(query), &cfg, &store, None).unwrap();
    match outcome {
        IdentifyOutcome::Match {
            track_id,
            offset_seconds,
            score,
        } => {
            assert_eq!(track_id, 1);
            assert!(
                (19.9..=20.1).contains(&offset_seconds),
                "offset {} s",
                offset_seconds
            );
            assert!(score >= 0.8, "score {}", score);
        }
        other => panic!("expected match, got {:?}", other),
    }
}

#[test]
fn s3_unknown_noise_is_rejected() {
    let dir = TempDir::new().unwrap();
    let track = synth_track(7, 60.0);
    let build = BuildConfig::default();
    let store = build_store(&dir, &build, &[(1, track)]);

    let cfg = IdentifyConfig::default();
    let outcome = identify_audio(mono(white_noise(99, 5.0)), &cfg, &store, None);
    match outcome {
        Ok(IdentifyOutcome::NoMatch { reason }) => {
            assert!(matches!(
                reason,
                NoMatchReason::LowCoverage | NoMatchReason::HighEntropy | NoMatchReason::NoVotes
            ));
        }
        // A noise query may also die earlier with no usable peaks.
        Err(LandmarkError::NoPeaks) => {}
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[test]
fn s4_distractor_corpus_still_finds_the_source() {
    let dir = TempDir::new().unwrap();
    let target = synth_track(7, 30.0);
    let mut tracks: Vec<(u32, Vec<f32>)> = (2..12)
        .map(|seed| (seed, synth_track(seed as u64 * 101, 20.0)))
        .collect();
    tracks.push((1, target.clone()));

    let build = BuildConfig::default();
    let store = build_store(&dir, &build, &tracks);

    let cfg = IdentifyConfig::default();
    let query = clip(&target, 10.0, 5.0);

    // The public outcome picks the right track...
    let outcome = identify_audio(mono(query.clone()), &cfg, &store, None).unwrap();
    match outcome {
        IdentifyOutcome::Match { track_id, .. } => assert_eq!(track_id, 1),
        other => panic!("expected match, got {:?}", other),
    }

    // ...and the winning peak strictly dominates every other track's peak.
    let extracted =
        extract_keys_for_track(mono(query), &cfg.feature, &cfg.pairing, &cfg.key_layout).unwrap();
    let mut votes = VoteTable::new();
    for kt in &extracted.keys {
        let shard = shard_for_key(&kt.key, &cfg.key_layout, store.shards());
        if let Some(value) = store.get(shard, &kt.key).unwrap() {
            for anchor in PostingIter::new(&value) {
                let anchor = anchor.unwrap();
                votes.add(
                    anchor.track_id,
                    offset_bin(anchor.t_anchor, kt.t_anchor, cfg.pairing.delta_bin_frames),
                );
            }
        }
    }
    let best = select_best_by_votes(&votes).unwrap();
    assert_eq!(best.track_id, 1);
    for track_id in 2..12u32 {
        let peak_other = votes
            .iter()
            .filter(|((track, _), _)| *track == track_id)
            .map(|(_, &count)| count)
            .max()
            .unwrap_or(0);
        assert!(
            peak_other < best.stats.peak,
            "track {} peak {} >= winner {}",
            track_id,
            peak_other,
            best.stats.peak
        );
    }
}

#[test]
fn s5_overflowing_field_fails_packing() {
    let layout = KeyLayout {
        total_bits: 32,
        bits_fa: 10,
        bits_ft: 10,
        bits_dt: 12,
        bits_shard: 0,
        bits_ver: 0,
        endian: Endianness::Little,
    };
    assert!(matches!(
        pack_key(1024, 0, 0, 0, &layout),
        Err(LandmarkError::NumericOverflow(_))
    ));
    assert!(pack_key(1023, 0, 0, 0, &layout).is_ok());
}

#[test]
fn s6_corrupted_posting_value_surfaces_integrity_error() {
    let mut value = encode_posting_block(1, &[10, 20, 30]).unwrap();
    let first_len = value.len();
    value.extend(encode_posting_block(2, &[100, 200, 300]).unwrap());

    // Flip a byte inside the second block's payload.
    let target = first_len + 3;
    value[target] ^= 0x80;

    match parse_posting_blocks(&value) {
        Err(LandmarkError::Integrity(_)) => {}
        Ok(anchors) => panic!("corruption went unnoticed: {:?}", anchors),
        Err(other) => panic!("unexpected error kind: {:?}", other),
    }

    // Streaming parse still yields the intact first block before failing.
    let mut good = Vec::new();
    let mut failed = false;
    for item in PostingIter::new(&value) {
        match item {
            Ok(anchor) => good.push(anchor),
            Err(_) => failed = true,
        }
    }
    assert!(failed);
    assert!(good.len() >= 3);
    assert!(good[..3].iter().all(|a| a.track_id == 1));
    assert_eq!(good[2].t_anchor, 30);
}

#[test]
fn rebuilt_index_is_byte_stable() {
    let track = synth_track(5, 10.0);
    let cfg = BuildConfig::default();

    let extract = |samples: &[f32]| {
        extract_keys_for_track(
            mono(samples.to_vec()),
            &cfg.feature,
            &cfg.pairing,
            &cfg.key_layout,
        )
        .unwrap()
    };
    let a = extract(&track);
    let b = extract(&track);
    assert_eq!(a.keys, b.keys);
    assert_eq!(a.audio_crc64, b.audio_crc64);
    assert_eq!(a.frames, b.frames);
}

#[test]
fn mismatched_layouts_refuse_to_compare() {
    let dir = TempDir::new().unwrap();
    let track = synth_track(3, 10.0);
    let build = BuildConfig::default();
    let store = build_store(&dir, &build, &[(1, track.clone())]);

    let cfg = IdentifyConfig {
        key_layout: KeyLayout {
            bits_fa: 11,
            bits_ft: 11,
            bits_dt: 12,
            ..KeyLayout::default()
        },
        ..IdentifyConfig::default()
    };
    assert!(matches!(
        identify_audio(mono(track), &cfg, &store, None),
        Err(LandmarkError::ConfigMismatch(_))
    ));
}

#[test]
fn wav_files_build_and_identify_end_to_end() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("db");

    let track1 = synth_track(7, 20.0);
    let track2 = synth_track(1_111, 15.0);
    let path1 = dir.path().join("track1.wav");
    let path2 = dir.path().join("track2.wav");
    write_wav(&path1, &track1, SR);
    write_wav(&path2, &track2, SR);

    let manifest = vec![
        TrackSource {
            track_id: 1,
            filepath: path1.to_string_lossy().into_owned(),
        },
        TrackSource {
            track_id: 2,
            filepath: path2.to_string_lossy().into_owned(),
        },
    ];
    let build = BuildConfig::default();
    let report = build_index(&manifest, &build, &db, None).unwrap();
    assert_eq!(report.tracks_ingested, 2);
    assert!(report.keys_total > 0);
    assert!(report.unique_keys > 0);
    assert!(report.warnings.is_empty());
    assert!(report.hotkey_histogram.iter().sum::<u32>() > 0);

    // Hop-aligned clip: 8.0 s is an exact multiple of hop/sr.
    let query_path = dir.path().join("query.wav");
    write_wav(&query_path, &clip(&track1, 8.0, 5.0), SR);

    let cfg = IdentifyConfig::default();
    let outcome = crate::search::identify_path(
        query_path.to_string_lossy().as_ref(),
        &cfg,
        &db,
    )
    .unwrap();
    match outcome {
        IdentifyOutcome::Match {
            track_id,
            offset_seconds,
            ..
        } => {
            assert_eq!(track_id, 1);
            assert!(
                (7.9..=8.1).contains(&offset_seconds),
                "offset {} s",
                offset_seconds
            );
        }
        other => panic!("expected match, got {:?}", other),
    }
}

#[test]
fn build_report_counts_reflect_the_manifest() {
    // Missing files become warnings; the store still finalizes cleanly
    // and reopens with the same shard count.
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("db");
    let manifest = vec![TrackSource {
        track_id: 9,
        filepath: "/nonexistent/ghost.flac".into(),
    }];
    let cfg = BuildConfig::default();
    let report = build_index(&manifest, &cfg, &db, None).unwrap();
    assert_eq!(report.tracks_ingested, 0);
    assert_eq!(report.keys_total, 0);
    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.hotkey_histogram.iter().sum::<u32>(), 0);

    let store = ShardedStore::open(&db, OpenMode::ReadOnly, cfg.shards).unwrap();
    assert_eq!(store.shards(), cfg.shards);
}
