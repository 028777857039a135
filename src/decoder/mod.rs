//! Audio decoding: file → mono float PCM at [`crate::dsp::SAMPLE_RATE`],
//! peak-normalized to 1.0 (spec §4.K.1, §6 decoder contract).
//!
//! Structured the way the teacher's `decoder` module is (a small trait
//! plus one concrete implementation), but backed directly by `symphonia`
//! rather than `rodio`, since this crate decodes once per file rather
//! than streaming for playback.

use std::fs::File;
use std::path::Path;

use log::{debug, warn};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::dsp::SAMPLE_RATE;
use crate::errors::{AnalysisError, AnalysisResult};

/// Decoded, resampled, peak-normalized track (spec §3 "Track").
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub duration_secs: f64,
}

const MIN_DURATION_SECS: f64 = 1.0;

/// Decode `path`, trying the primary probe first and falling through two
/// forced-format alternates if it fails, mirroring the original pipeline's
/// pydub-then-ffmpeg fallback chain (spec §4.K.1 / §6).
#[inline]
pub fn decode_with_fallback(path: &Path) -> AnalysisResult<DecodedAudio> {
    let attempts: [fn(&Path) -> AnalysisResult<DecodedAudio>; 3] =
        [decode_probed, |p| decode_forced(p, "mp3"), |p| decode_forced(p, "wav")];

    let mut last_err = None;
    for (i, attempt) in attempts.iter().enumerate() {
        match attempt(path) {
            Ok(audio) => {
                if i > 0 {
                    debug!("decoded {} via fallback path {i}", path.display());
                }
                return validate_duration(audio);
            }
            Err(e) => {
                warn!("decode attempt {i} failed for {}: {e}", path.display());
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or(AnalysisError::NoAudioStream))
}

fn validate_duration(audio: DecodedAudio) -> AnalysisResult<DecodedAudio> {
    if audio.duration_secs < MIN_DURATION_SECS {
        return Err(AnalysisError::InsufficientAudio);
    }
    Ok(audio)
}

fn decode_probed(path: &Path) -> AnalysisResult<DecodedAudio> {
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    decode_inner(path, hint)
}

fn decode_forced(path: &Path, ext_hint: &str) -> AnalysisResult<DecodedAudio> {
    let mut hint = Hint::new();
    hint.with_extension(ext_hint);
    decode_inner(path, hint)
}

fn decode_inner(path: &Path, hint: Hint) -> AnalysisResult<DecodedAudio> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(AnalysisError::DecodeError)?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or(AnalysisError::NoAudioStream)?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(AnalysisError::DecodeError)?;

    let mut spec: Option<SignalSpec> = None;
    let mut raw_samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(AnalysisError::DecodeError(e)),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => {
                if spec.is_none() {
                    spec = Some(*decoded.spec());
                }
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                buf.copy_interleaved_ref(decoded);
                raw_samples.extend_from_slice(buf.samples());
            }
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(AnalysisError::DecodeError(e)),
        }
    }

    let spec = spec.ok_or(AnalysisError::NoAudioStream)?;
    let mono = collapse_to_mono(&raw_samples, spec.channels.count());
    let resampled = resample(&mono, spec.rate, SAMPLE_RATE)?;
    let normalized = peak_normalize(resampled);
    let duration_secs = f64::from(normalized.len() as u32) / f64::from(SAMPLE_RATE);

    Ok(DecodedAudio {
        samples: normalized,
        sample_rate: SAMPLE_RATE,
        duration_secs,
    })
}

fn collapse_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample(mono: &[f32], from_rate: u32, to_rate: u32) -> AnalysisResult<Vec<f32>> {
    if from_rate == to_rate || mono.is_empty() {
        return Ok(mono.to_vec());
    }
    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let mut resampler = FastFixedIn::<f32>::new(ratio, 10.0, PolynomialDegree::Septic, mono.len(), 1)?;
    let out = resampler.process(&[mono], None)?;
    Ok(out.into_iter().next().unwrap_or_default())
}

fn peak_normalize(mut samples: Vec<f32>) -> Vec<f32> {
    let peak = samples.iter().fold(0.0_f32, |acc, &x| acc.max(x.abs()));
    if peak > 1e-9 {
        let gain = 1.0 / peak;
        for s in &mut samples {
            *s *= gain;
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_normalize_scales_to_unity() {
        let samples = vec![0.0, 0.25, -0.5, 0.1];
        let normalized = peak_normalize(samples);
        let peak = normalized.iter().fold(0.0_f32, |a, &x| a.max(x.abs()));
        assert!((peak - 1.0).abs() < 1e-6);
    }

    #[test]
    fn collapse_stereo_averages_channels() {
        let interleaved = vec![1.0, 3.0, 0.0, 0.0];
        let mono = collapse_to_mono(&interleaved, 2);
        assert_eq!(mono, vec![2.0, 0.0]);
    }

    #[test]
    fn resample_noop_when_rates_match() {
        let mono = vec![1.0, 2.0, 3.0];
        let out = resample(&mono, 22050, 22050).unwrap();
        assert_eq!(out, mono);
    }
}
