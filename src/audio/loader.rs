use crate::error::{LandmarkError, Result};
use std::fs::File;
use std::io::Cursor;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream, ReadOnlySource};
use symphonia::core::probe::Hint;

/// Mono PCM buffer.
#[derive(Debug, Clone)]
pub struct Pcm {
    pub samples: Vec<f32>,
    pub sr: u32,
}

impl Pcm {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sr as f64
    }
}

/// Decoded audio split into mid (mono sum) and optional side (difference).
/// The pipeline only consumes mid; side is retained for collaborators.
#[derive(Debug, Clone)]
pub struct MidSide {
    pub mid: Pcm,
    pub side: Option<Pcm>,
}

/// Decode an audio file into mid/side PCM.
///
/// Container and codec handling is fully delegated to symphonia; metadata
/// is ignored. Stereo is downmixed as mid = (L+R)/2, side = (L-R)/2.
pub fn load_path(filepath: &str) -> Result<MidSide> {
    tracing::debug!("loading audio from {}", filepath);

    let file = File::open(filepath)
        .map_err(|e| LandmarkError::Decode(format!("{}: {}", filepath, e)))?;

    let mut hint = Hint::new();
    if let Some(ext) = std::path::Path::new(filepath).extension() {
        hint.with_extension(&ext.to_string_lossy());
    }

    decode_source(Box::new(ReadOnlySource::new(file)), hint)
}

/// Decode raw encoded bytes (any container symphonia can probe).
pub fn load_bytes(bytes: Vec<u8>) -> Result<MidSide> {
    decode_source(Box::new(Cursor::new(bytes)), Hint::new())
}

fn decode_source(source: Box<dyn MediaSource>, hint: Hint) -> Result<MidSide> {
    let mss = MediaSourceStream::new(source, Default::default());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &Default::default())
        .map_err(|e| LandmarkError::UnsupportedFormat(format!("failed to probe format: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.sample_rate.is_some())
        .ok_or_else(|| LandmarkError::Decode("no audio tracks found".to_string()))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| LandmarkError::Decode("no sample rate found".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| LandmarkError::Decode("no channel info found".to_string()))?
        .count();

    tracing::debug!("audio format: {} Hz, {} channels", sample_rate, channels);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| LandmarkError::Decode(format!("decoder error: {}", e)))?;

    let mut mid = Vec::new();
    let mut side = Vec::new();
    let keep_side = channels >= 2;

    loop {
        match format.next_packet() {
            Ok(packet) => match decoder.decode(&packet) {
                Ok(buf) => collect_mid_side(&mut mid, &mut side, keep_side, &buf),
                // Skip frames that can't be decoded
                Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
                Err(e) => return Err(LandmarkError::Decode(format!("{}", e))),
            },
            Err(symphonia::core::errors::Error::IoError(_)) => break,
            Err(symphonia::core::errors::Error::Unsupported(_)) => break,
            Err(e) => return Err(LandmarkError::Decode(format!("{}", e))),
        }
    }

    if mid.is_empty() {
        return Err(LandmarkError::EmptyAudio);
    }
    if !mid.iter().all(|s| s.is_finite()) {
        return Err(LandmarkError::Decode(
            "audio contains NaN or infinite values".to_string(),
        ));
    }

    tracing::debug!("decoded {} mid samples at {} Hz", mid.len(), sample_rate);

    Ok(MidSide {
        mid: Pcm {
            samples: mid,
            sr: sample_rate,
        },
        side: keep_side.then_some(Pcm {
            samples: side,
            sr: sample_rate,
        }),
    })
}

fn collect_mid_side(mid: &mut Vec<f32>, side: &mut Vec<f32>, keep_side: bool, buf: &AudioBufferRef) {
    // Helper macro to avoid code duplication across sample formats
    macro_rules! process_buffer {
        ($buf:expr, $norm_fn:expr) => {{
            let n_frames = $buf.frames();
            if n_frames == 0 {
                return;
            }
            let ch_count = $buf.spec().channels.count();
            for frame_idx in 0..n_frames {
                let left: f32 = $norm_fn($buf.chan(0)[frame_idx]);
                if ch_count >= 2 {
                    let right: f32 = $norm_fn($buf.chan(1)[frame_idx]);
                    mid.push((left + right) * 0.5);
                    if keep_side {
                        side.push((left - right) * 0.5);
                    }
                } else {
                    mid.push(left);
                    if keep_side {
                        side.push(0.0);
                    }
                }
            }
        }};
    }

    match buf {
        // Float formats
        AudioBufferRef::F32(fbuf) => process_buffer!(fbuf, |v: f32| v),
        AudioBufferRef::F64(fbuf) => process_buffer!(fbuf, |v: f64| v as f32),
        // Signed integer formats
        AudioBufferRef::S8(ibuf) => process_buffer!(ibuf, |v: i8| v as f32 / i8::MAX as f32),
        AudioBufferRef::S16(ibuf) => process_buffer!(ibuf, |v: i16| v as f32 / i16::MAX as f32),
        AudioBufferRef::S24(ibuf) => process_buffer!(ibuf, |v: symphonia::core::sample::i24| {
            v.into_i32() as f32 / (2_i32.pow(23) - 1) as f32
        }),
        AudioBufferRef::S32(ibuf) => process_buffer!(ibuf, |v: i32| v as f32 / i32::MAX as f32),
        // Unsigned integer formats (center at 0)
        AudioBufferRef::U8(ubuf) => {
            process_buffer!(ubuf, |v: u8| ((v as f32 / 255.0) - 0.5) * 2.0)
        }
        AudioBufferRef::U16(ubuf) => {
            process_buffer!(ubuf, |v: u16| ((v as f32 / 65535.0) - 0.5) * 2.0)
        }
        AudioBufferRef::U24(ubuf) => {
            process_buffer!(ubuf, |v: symphonia::core::sample::u24| {
                let norm = v.into_u32() as f32 / (2_u32.pow(24) - 1) as f32;
                (norm - 0.5) * 2.0
            })
        }
        AudioBufferRef::U32(ubuf) => {
            process_buffer!(ubuf, |v: u32| ((v as f32 / u32::MAX as f32) - 0.5) * 2.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_a_decode_error() {
        let err = load_path("/nonexistent/definitely-not-here.wav").unwrap_err();
        assert!(matches!(err, LandmarkError::Decode(_)));
    }

    #[test]
    fn garbage_bytes_are_unsupported() {
        let err = load_bytes(vec![0u8; 64]).unwrap_err();
        assert!(matches!(err, LandmarkError::UnsupportedFormat(_)));
    }

    #[test]
    fn wav_bytes_round_trip_mid_side() {
        // Minimal 16-bit stereo PCM WAV: L = 1000, R = -1000 per frame,
        // so mid should be ~0 and side ~1000/32767.
        let frames: u32 = 256;
        let sr: u32 = 8_000;
        let data_len = frames * 4;
        let mut wav = Vec::new();
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len).to_le_bytes());
        wav.extend_from_slice(b"WAVEfmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
        wav.extend_from_slice(&2u16.to_le_bytes()); // stereo
        wav.extend_from_slice(&sr.to_le_bytes());
        wav.extend_from_slice(&(sr * 4).to_le_bytes());
        wav.extend_from_slice(&4u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&data_len.to_le_bytes());
        for _ in 0..frames {
            wav.extend_from_slice(&1000i16.to_le_bytes());
            wav.extend_from_slice(&(-1000i16).to_le_bytes());
        }

        let ms = load_bytes(wav).unwrap();
        assert_eq!(ms.mid.sr, sr);
        assert_eq!(ms.mid.samples.len(), frames as usize);
        let side = ms.side.expect("stereo input retains side");
        assert!(ms.mid.samples.iter().all(|s| s.abs() < 1e-3));
        let expect = 1000.0 / i16::MAX as f32;
        assert!(side.samples.iter().all(|s| (s - expect).abs() < 1e-3));
    }
}
