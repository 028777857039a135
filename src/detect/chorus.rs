//! Chorus/Hook Stage (spec §4.F, component F): multi-instance chorus and
//! hook detection from spectral-contrast/centroid novelty.

use crate::dsp::spectral;
use crate::features::FeatureBundle;
use crate::model::{CueType, CuePoint};

/// Detects chorus/hook instances. Returns an empty vector (stage
/// contributes no cues) if the feature bundle lacks what it needs.
#[must_use]
#[inline]
pub fn detect_chorus_hook(bundle: &FeatureBundle, bpm: u32) -> Vec<CuePoint> {
    let centroid = &bundle.spectral_centroid_512;
    let rms = &bundle.rms_512;
    if centroid.len() < 4 || rms.len() < 4 {
        return Vec::new();
    }
    let contrast = spectral::spectral_contrast(&bundle.stft_mag, bundle.sample_rate, crate::dsp::DEFAULT_N_FFT, 6);
    let contrast_mean: Vec<f32> = (0..contrast.shape()[1]).map(|c| contrast.column(c).mean().unwrap_or(0.0) as f32).collect();

    let n = centroid.len().min(contrast_mean.len()).min(rms.len());
    if n < 4 {
        return Vec::new();
    }

    let d_centroid = delta_abs(&centroid[..n]);
    let d_contrast = delta_abs(&contrast_mean[..n]);
    let d_rms = delta_abs(&rms[..n]);
    let novelty = d_centroid.clone(); // novelty proxy shares the centroid-delta signal

    let score: Vec<f32> = (0..n)
        .map(|i| normalize_at(&d_centroid, i) + normalize_at(&d_contrast, i) + 0.6 * normalize_at(&novelty, i) + 0.4 * normalize_at(&d_rms, i))
        .collect();

    let hop = crate::dsp::DEFAULT_HOP;
    let frame_duration = f64::from(hop) / f64::from(bundle.sample_rate);
    let bar_sec = if bpm > 0 { 240.0 / f64::from(bpm) } else { 2.0 };
    let min_distance_frames = ((8.0 * bar_sec) / frame_duration).max(1.0) as usize;

    let peaks = pick_peaks(&score, min_distance_frames);
    let max_score = score.iter().copied().fold(0.0_f32, f32::max).max(1e-6);

    let mut cues = Vec::new();
    let mut chorus_idx = 0u32;
    let mut hook_idx = 0u32;
    let min_time = (10.0_f64).max(4.0 * bar_sec);
    let mut last_chorus_frame: Option<usize> = None;

    for &p in &peaks {
        let time = p as f64 * frame_duration;
        if time < min_time {
            continue;
        }
        let ratio = score[p] / max_score;
        if ratio >= 0.70 {
            chorus_idx += 1;
            last_chorus_frame = Some(p);
            cues.push(make_cue(CueType::Chorus, chorus_idx, time, f64::from(ratio)));
        } else if ratio >= 0.50 {
            if let Some(lc) = last_chorus_frame {
                if p.abs_diff(lc) < min_distance_frames {
                    continue;
                }
            }
            hook_idx += 1;
            cues.push(make_cue(CueType::Hook, hook_idx, time, f64::from(ratio)));
        }
    }
    cues
}

fn make_cue(kind: CueType, instance: u32, time: f64, confidence: f64) -> CuePoint {
    CuePoint {
        name: format!("{kind}_{instance}"),
        kind,
        time,
        confidence: confidence.clamp(0.0, 1.0),
        reason: format!("{kind} candidate, score ratio {confidence:.2}"),
        stage: "chorus_hook".to_string(),
        instance: Some(instance),
    }
}

fn delta_abs(signal: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0; signal.len()];
    for i in 1..signal.len() {
        out[i] = (signal[i] - signal[i - 1]).abs();
    }
    out
}

fn normalize_at(signal: &[f32], idx: usize) -> f32 {
    let max = signal.iter().copied().fold(0.0_f32, f32::max).max(1e-9);
    signal[idx] / max
}

fn pick_peaks(signal: &[f32], min_distance: usize) -> Vec<usize> {
    let mut peaks = Vec::new();
    let mut last: Option<usize> = None;
    for i in 1..signal.len().saturating_sub(1) {
        if signal[i] >= signal[i - 1] && signal[i] >= signal[i + 1] {
            if let Some(l) = last {
                if i - l < min_distance {
                    continue;
                }
            }
            peaks.push(i);
            last = Some(i);
        }
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_abs_of_constant_signal_is_zero() {
        let signal = vec![1.0; 10];
        let d = delta_abs(&signal);
        assert!(d.iter().all(|&x| x == 0.0));
    }
}
