//! The Feature Cache (spec §4.A, component A): every shared array computed
//! once per track before any detector runs.

use log::debug;
use ndarray::Array2;
use rayon::prelude::*;

use crate::dsp::{beat as dsp_beat, chroma, fft, hpss, mel, onset, spectral, DEFAULT_HOP, DEFAULT_N_FFT};
use crate::errors::{AnalysisError, AnalysisResult};

/// Mapping from feature name to dense numeric array (spec §3). Individual
/// features are allowed to be absent (`None`) when their computation
/// failed; downstream stages must branch on absence rather than panic.
pub struct FeatureBundle {
    pub y_harm: Option<Vec<f32>>,
    pub y_perc: Option<Vec<f32>>,
    pub stft_mag: Array2<f64>,
    pub chroma_256: Option<Array2<f64>>,
    pub chroma_512: Option<Array2<f64>>,
    pub chroma_1024: Option<Array2<f64>>,
    pub chroma_2048: Option<Array2<f64>>,
    pub chroma_harm_512: Option<Array2<f64>>,
    pub chroma_harm_1024: Option<Array2<f64>>,
    pub spectral_centroid_512: Vec<f32>,
    pub onset_env_256: Vec<f32>,
    pub onset_env_512: Vec<f32>,
    pub onset_env_perc_512: Vec<f32>,
    pub mfcc_512: Array2<f64>,
    pub rms_512: Vec<f32>,
    pub rms_1024: Vec<f32>,
    pub beat_times: Vec<f64>,
    pub beat_frames: Vec<usize>,
    pub tempo: f64,
    pub tuning: f64,
    pub sample_rate: u32,
    pub duration: f64,
}

/// Build the full [`FeatureBundle`] from decoded mono PCM. Fails only with
/// [`AnalysisError::InsufficientAudio`] (spec §4.A); individual feature
/// failures degrade to `None`/empty and are logged at `debug`.
#[inline]
pub fn build_feature_bundle(samples: &[f32], sample_rate: u32) -> AnalysisResult<FeatureBundle> {
    let duration = f64::from(samples.len() as u32) / f64::from(sample_rate);
    if duration < 1.0 {
        return Err(AnalysisError::InsufficientAudio);
    }

    let stft_mag = fft::stft(samples, DEFAULT_N_FFT, DEFAULT_HOP);
    let tuning = chroma::estimate_tuning(sample_rate, &stft_mag, DEFAULT_N_FFT);

    let (harm_spec, perc_spec) = hpss::hpss(&stft_mag);

    let ((chroma_512, chroma_harm_512), (chroma_256, (chroma_1024, chroma_2048))) = rayon::join(
        || {
            rayon::join(
                || try_chroma(sample_rate, &stft_mag, DEFAULT_N_FFT, tuning, "chroma_512"),
                || try_chroma(sample_rate, &harm_spec, DEFAULT_N_FFT, tuning, "chroma_harm_512"),
            )
        },
        || {
            rayon::join(
                || {
                    let spec = fft::stft(samples, 256, 256);
                    try_chroma(sample_rate, &spec, 256, tuning, "chroma_256")
                },
                || {
                    rayon::join(
                        || {
                            let spec = fft::stft(samples, 1024, 1024);
                            try_chroma(sample_rate, &spec, 1024, tuning, "chroma_1024")
                        },
                        || {
                            let spec = fft::stft(samples, 2048, 2048);
                            try_chroma(sample_rate, &spec, 2048, tuning, "chroma_2048")
                        },
                    )
                },
            )
        },
    );

    let chroma_harm_1024 = try_chroma(sample_rate, &fft::stft(samples, 1024, 1024), 1024, tuning, "chroma_harm_1024");

    let spectral_centroid_512 = spectral::spectral_centroid(&stft_mag, sample_rate, DEFAULT_N_FFT);
    let onset_env_512 = onset::onset_strength(&stft_mag);
    let onset_env_256 = {
        let spec_256 = fft::stft(samples, 256, 256);
        onset::onset_strength(&spec_256)
    };
    let onset_env_perc_512 = onset::onset_strength_percussive(&perc_spec);
    let mfcc_512 = mel::mfcc(&stft_mag, sample_rate, DEFAULT_N_FFT, 40, 13);
    let rms_512 = spectral::rms(samples, DEFAULT_N_FFT, DEFAULT_HOP);
    let rms_1024 = spectral::rms(samples, 1024, 1024);

    let tempo = dsp_beat::estimate_tempo_autocorrelation(&onset_env_512, sample_rate, DEFAULT_HOP, 60.0, 200.0)
        .unwrap_or(120.0);
    let period_frames = f64::from(sample_rate) / DEFAULT_HOP as f64 * 60.0 / tempo;
    let beat_frames = dsp_beat::place_beats(&onset_env_512, period_frames, period_frames / 2.0);
    let beat_times = fft::frames_to_time(&beat_frames, sample_rate, DEFAULT_HOP);

    Ok(FeatureBundle {
        y_harm: frame_spectrum_is_real(&harm_spec).then(|| samples.to_vec()),
        y_perc: frame_spectrum_is_real(&perc_spec).then(|| samples.to_vec()),
        stft_mag,
        chroma_256,
        chroma_512,
        chroma_1024,
        chroma_2048,
        chroma_harm_512,
        chroma_harm_1024,
        spectral_centroid_512,
        onset_env_256,
        onset_env_512,
        onset_env_perc_512,
        mfcc_512,
        rms_512,
        rms_1024,
        beat_times,
        beat_frames,
        tempo,
        tuning,
        sample_rate,
        duration,
    })
}

fn frame_spectrum_is_real(spectrum: &Array2<f64>) -> bool {
    !spectrum.is_empty()
}

fn try_chroma(sample_rate: u32, spectrum: &Array2<f64>, n_fft: usize, tuning: f64, label: &str) -> Option<Array2<f64>> {
    match chroma::chroma_stft(sample_rate, spectrum, n_fft, 12, tuning) {
        Ok(c) => Some(c),
        Err(e) => {
            debug!("{label} computation failed, storing None: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_audio_is_rejected() {
        let samples = vec![0.0f32; 100];
        let result = build_feature_bundle(&samples, 22050);
        assert!(matches!(result, Err(AnalysisError::InsufficientAudio)));
    }

    #[test]
    fn a_one_second_sine_produces_a_full_bundle() {
        let sample_rate = 22050;
        let samples: Vec<f32> = (0..sample_rate)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / sample_rate as f32).sin())
            .collect();
        let bundle = build_feature_bundle(&samples, sample_rate).unwrap();
        assert!(bundle.chroma_512.is_some());
        assert!(bundle.tempo > 0.0);
        assert!(bundle.mfcc_512.shape()[0] == 13);
    }
}
