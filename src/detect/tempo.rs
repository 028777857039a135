//! Tempo Detector (spec §4.C, component C): four independent estimators,
//! combined via a half/double-aware vote into a snapped integer BPM.

use log::{debug, trace};
use ndarray::Axis;

use crate::dsp::beat::estimate_tempo_autocorrelation;
use crate::dsp::DEFAULT_HOP;
use crate::features::FeatureBundle;

const SNAP_TABLE: [f64; 23] = [
    90.0, 95.0, 100.0, 110.0, 115.0, 118.0, 120.0, 122.0, 124.0, 125.0, 126.0, 127.0, 128.0, 129.0, 130.0, 131.0,
    132.0, 133.0, 135.0, 138.0, 140.0, 145.0, 150.0,
];

const SOURCE_WEIGHTS: [f64; 4] = [0.25, 0.15, 0.45, 0.15];

/// Runs the ensemble and returns an integer BPM (spec §4.C). Never fails:
/// defaults to 120 if every estimator is unavailable.
#[must_use]
#[inline]
pub fn detect_tempo(bundle: &FeatureBundle) -> u32 {
    let mut estimates = [None; 4];
    estimates[0] = method_onset_enhanced(&bundle.onset_env_512, bundle.sample_rate);
    estimates[1] = method_spectral_periodicity(&bundle.stft_mag, bundle.sample_rate);
    estimates[2] = method_percussive_onset(&bundle.onset_env_perc_512, bundle.sample_rate);
    estimates[3] = method_multiscale_autocorr(&bundle.onset_env_256, bundle.sample_rate);

    for (i, e) in estimates.iter().enumerate() {
        trace!("tempo method {i} estimate: {e:?}");
    }

    if estimates.iter().all(Option::is_none) {
        debug!("tempo detection: all methods failed, defaulting to 120");
        return 120;
    }

    let mut scores: std::collections::HashMap<u32, f64> = std::collections::HashMap::new();
    for (i, est) in estimates.iter().enumerate() {
        let Some(bpm) = est else { continue };
        let weight = SOURCE_WEIGHTS[i];
        for (multiplier, boost) in [(1.0, 1.0), (0.5, 0.6), (2.0, 0.6)] {
            let candidate = bpm * multiplier;
            if (60.0..=200.0).contains(&candidate) {
                *scores.entry(candidate.round() as u32).or_insert(0.0) += weight * boost;
            }
        }
    }

    let winner = scores
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(bpm, _)| *bpm)
        .unwrap_or(120);

    let near: Vec<f64> = estimates
        .iter()
        .flatten()
        .copied()
        .filter(|&b| (b - f64::from(winner)).abs() <= 1.5)
        .collect();
    let refined = if near.is_empty() {
        f64::from(winner)
    } else {
        near.iter().sum::<f64>() / near.len() as f64
    };

    let snapped = SNAP_TABLE
        .iter()
        .find(|&&c| (refined - c).abs() <= 1.5)
        .copied()
        .unwrap_or(refined);

    let corrected = correct_octave(snapped);

    debug!("tempo detection winner: {corrected:.1} BPM");
    corrected.round() as u32
}

/// Folds an out-of-range snapped estimate into the plausible DJ tempo band
/// by doubling or halving, the same half/double correction each of the four
/// voting methods is itself susceptible to before the ensemble vote.
fn correct_octave(bpm: f64) -> f64 {
    if bpm < 70.0 && (60.0..=200.0).contains(&(bpm * 2.0)) {
        bpm * 2.0
    } else if bpm > 180.0 && (60.0..=200.0).contains(&(bpm / 2.0)) {
        bpm / 2.0
    } else {
        bpm
    }
}

fn method_onset_enhanced(onset_env: &[f32], sample_rate: u32) -> Option<f64> {
    let smoothed = smooth(onset_env, 2.0);
    let windows = [(60.0, 100.0), (100.0, 140.0), (120.0, 180.0), (140.0, 200.0)];
    let mut candidates: Vec<f64> = windows
        .iter()
        .filter_map(|&(lo, hi)| estimate_tempo_autocorrelation(&smoothed, sample_rate, DEFAULT_HOP, lo, hi))
        .collect();
    median(&mut candidates)
}

fn method_spectral_periodicity(spectrum: &ndarray::Array2<f64>, sample_rate: u32) -> Option<f64> {
    if spectrum.shape()[1] == 0 {
        return None;
    }
    let n_fft = 2 * (spectrum.shape()[0] - 1);
    let bin_hz = f64::from(sample_rate) / n_fft as f64;
    let lo_bin = (20.0 / bin_hz).floor().max(0.0) as usize;
    let hi_bin = ((250.0 / bin_hz).ceil() as usize).min(spectrum.shape()[0]);
    if hi_bin <= lo_bin {
        return None;
    }
    let band_energy: Vec<f32> = spectrum
        .axis_iter(Axis(1))
        .map(|col| col.slice(ndarray::s![lo_bin..hi_bin]).sum() as f32)
        .collect();
    let smoothed = smooth(&band_energy, 2.0);
    let frame_rate = f64::from(sample_rate) / 512.0;
    let min_lag = (0.3 * frame_rate).max(1.0) as usize;
    let max_lag = (frame_rate * 60.0 / 60.0) as usize;
    if smoothed.len() < min_lag + 2 {
        return None;
    }
    let autocorr = autocorrelate(&smoothed, max_lag.min(smoothed.len() - 1));
    let peak_max = autocorr.iter().copied().fold(0.0_f32, f32::max);
    let threshold = 0.3 * peak_max;
    let mut bpms: Vec<f64> = Vec::new();
    for (lag, &v) in autocorr.iter().enumerate().skip(min_lag) {
        if v >= threshold && lag > 0 {
            let bpm = frame_rate * 60.0 / lag as f64;
            if (60.0..=200.0).contains(&bpm) {
                bpms.push(bpm);
            }
        }
    }
    median(&mut bpms)
}

fn method_percussive_onset(onset_env_perc: &[f32], sample_rate: u32) -> Option<f64> {
    estimate_tempo_autocorrelation(onset_env_perc, sample_rate, DEFAULT_HOP, 90.0, 150.0)
}

fn method_multiscale_autocorr(onset_env_256: &[f32], sample_rate: u32) -> Option<f64> {
    let mut pooled = Vec::new();
    for &scale in &[1.0, 1.5, 2.0] {
        let resampled = resample_linear(onset_env_256, scale);
        if let Some(bpm) = estimate_tempo_autocorrelation(&resampled, sample_rate, 256, 60.0, 200.0) {
            let adjusted = bpm * scale;
            if (60.0..=200.0).contains(&adjusted) {
                pooled.push(adjusted);
            }
        }
    }
    median(&mut pooled)
}

fn resample_linear(signal: &[f32], scale: f64) -> Vec<f32> {
    if signal.is_empty() || (scale - 1.0).abs() < 1e-9 {
        return signal.to_vec();
    }
    let new_len = ((signal.len() as f64) * scale).round().max(1.0) as usize;
    (0..new_len)
        .map(|i| {
            let src_pos = i as f64 / scale;
            let lo = src_pos.floor() as usize;
            let hi = (lo + 1).min(signal.len() - 1);
            let frac = (src_pos - lo as f64) as f32;
            signal[lo.min(signal.len() - 1)] * (1.0 - frac) + signal[hi] * frac
        })
        .collect()
}

fn smooth(signal: &[f32], sigma: f64) -> Vec<f32> {
    let radius = (sigma * 2.0).ceil() as isize;
    let kernel: Vec<f64> = (-radius..=radius).map(|x| (-0.5 * (f64::from(x as i32) / sigma).powi(2)).exp()).collect();
    let kernel_sum: f64 = kernel.iter().sum();
    let n = signal.len() as isize;
    (0..n)
        .map(|t| {
            let mut acc = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let idx = (t + k as isize - radius).clamp(0, n - 1);
                acc += f64::from(signal[idx as usize]) * w;
            }
            (acc / kernel_sum) as f32
        })
        .collect()
}

fn autocorrelate(signal: &[f32], max_lag: usize) -> Vec<f32> {
    (0..=max_lag)
        .map(|lag| signal.iter().zip(signal.iter().skip(lag)).map(|(&a, &b)| a * b).sum())
        .collect()
}

fn median(values: &mut Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    Some(values[values.len() / 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn snap_table_contains_common_dance_tempos() {
        assert!(SNAP_TABLE.contains(&128.0));
        assert!(SNAP_TABLE.contains(&140.0));
    }

    #[rstest]
    #[case(65.0, 130.0)]
    #[case(69.9, 139.8)]
    #[case(128.0, 128.0)]
    #[case(175.0, 175.0)]
    #[case(185.0, 92.5)]
    #[case(35.0, 70.0)]
    fn octave_correction_folds_into_dj_range(#[case] bpm: f64, #[case] expected: f64) {
        assert!((correct_octave(bpm) - expected).abs() < 1e-9);
    }

    #[test]
    fn median_of_even_count_picks_upper_middle() {
        let mut v = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(median(&mut v), Some(3.0));
    }

    #[test]
    fn all_methods_absent_defaults_to_120() {
        let empty = Vec::new();
        assert!(method_onset_enhanced(&empty, 22050).is_none());
    }
}
