//! Energy Profile (spec §4.H, component H): per-cue energy, a continuous
//! curve, and an optional LUFS curve.

use crate::features::FeatureBundle;
use crate::model::{CuePoint, EnergyAnalysis, EnergyPoint};

const TARGET_LUFS: f64 = -14.0;

/// Optional loudness measurement backend (spec §9 "Fallbacks for optional
/// loudness"): `Absent` when no loudness measurer is wired up, `Present`
/// when one is (the core ships a simple RMS-based approximation).
pub enum LoudnessMeasurer {
    Absent,
    Present,
}

#[must_use]
#[inline]
pub fn compute_energy_profile(bundle: &FeatureBundle, cues: &[CuePoint], loudness: &LoudnessMeasurer) -> EnergyAnalysis {
    let per_cue = segment_aligned_profile(bundle, cues);
    let curve = continuous_curve(bundle);
    let (lufs_curve, integrated_lufs, gain_to_target) = match loudness {
        LoudnessMeasurer::Absent => (Vec::new(), None, None),
        LoudnessMeasurer::Present => {
            let (curve, integrated) = lufs_curve_and_integrated(bundle);
            (curve, Some(integrated), Some(TARGET_LUFS - integrated))
        }
    };

    EnergyAnalysis {
        per_cue,
        curve,
        lufs_curve,
        integrated_lufs,
        gain_to_target,
    }
}

fn segment_aligned_profile(bundle: &FeatureBundle, cues: &[CuePoint]) -> Vec<EnergyPoint> {
    let rms = &bundle.rms_512;
    if rms.is_empty() {
        return Vec::new();
    }
    let hop = crate::dsp::DEFAULT_HOP;
    let frame_duration = f64::from(hop) / f64::from(bundle.sample_rate);
    let bar_sec = if bundle.tempo > 0.0 { 240.0 / bundle.tempo } else { 2.0 };
    let window_secs = (8.0 * bar_sec).clamp(8.0, 30.0);

    let values: Vec<f64> = cues
        .iter()
        .take(16)
        .map(|cue| {
            let start = (cue.time / frame_duration) as usize;
            let end = (((cue.time + window_secs) / frame_duration) as usize).min(rms.len());
            if end > start {
                rms[start..end].iter().map(|&x| f64::from(x)).sum::<f64>() / (end - start) as f64
            } else {
                0.0
            }
        })
        .collect();

    let mapped = percentile_scale_to_1_10(&values);
    cues.iter().take(16).zip(mapped).map(|(cue, energy)| EnergyPoint { time: cue.time, energy }).collect()
}

fn continuous_curve(bundle: &FeatureBundle) -> Vec<EnergyPoint> {
    let rms = &bundle.rms_512;
    if rms.is_empty() {
        return Vec::new();
    }
    let db: Vec<f64> = rms.iter().map(|&x| 20.0 * f64::from(x.max(1e-9)).log10()).collect();
    let smoothed = gaussian_smooth(&db, 3.0);
    let mapped = percentile_scale_to_1_10(&smoothed);

    let hop = crate::dsp::DEFAULT_HOP;
    let frame_duration = f64::from(hop) / f64::from(bundle.sample_rate);
    let decimation = (mapped.len() / 400).max(1);
    mapped
        .iter()
        .enumerate()
        .step_by(decimation)
        .map(|(i, &energy)| EnergyPoint {
            time: i as f64 * frame_duration,
            energy,
        })
        .collect()
}

fn lufs_curve_and_integrated(bundle: &FeatureBundle) -> (Vec<EnergyPoint>, f64) {
    let rms = &bundle.rms_512;
    if rms.is_empty() {
        return (Vec::new(), -70.0);
    }
    let hop = crate::dsp::DEFAULT_HOP;
    let frame_duration = f64::from(hop) / f64::from(bundle.sample_rate);
    let window_frames = ((3.0 / frame_duration) as usize).max(1);

    let mut points = Vec::new();
    let mut i = 0;
    while i < rms.len() {
        let end = (i + window_frames).min(rms.len());
        let mean_sq: f64 = rms[i..end].iter().map(|&x| f64::from(x).powi(2)).sum::<f64>() / (end - i) as f64;
        let lufs = -0.691 + 10.0 * (mean_sq.max(1e-12)).log10();
        points.push(lufs);
        i += window_frames;
    }
    let decimation = (points.len() / 200).max(1);
    let curve: Vec<EnergyPoint> = points
        .iter()
        .enumerate()
        .step_by(decimation)
        .map(|(idx, &lufs)| EnergyPoint {
            time: idx as f64 * window_frames as f64 * frame_duration,
            energy: lufs,
        })
        .collect();

    let integrated = points.iter().sum::<f64>() / points.len().max(1) as f64;
    (curve, integrated)
}

fn gaussian_smooth(signal: &[f64], sigma: f64) -> Vec<f64> {
    let radius = (sigma * 3.0).ceil() as isize;
    let kernel: Vec<f64> = (-radius..=radius).map(|x| (-0.5 * (f64::from(x as i32) / sigma).powi(2)).exp()).collect();
    let kernel_sum: f64 = kernel.iter().sum();
    let n = signal.len() as isize;
    (0..n)
        .map(|t| {
            let mut acc = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let idx = (t + k as isize - radius).clamp(0, n - 1);
                acc += signal[idx as usize] * w;
            }
            acc / kernel_sum
        })
        .collect()
}

fn percentile_scale_to_1_10(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let p5 = quantile(&sorted, 0.05);
    let p95 = quantile(&sorted, 0.95);
    let span = (p95 - p5).max(1e-9);
    values.iter().map(|&v| (1.0 + 9.0 * ((v - p5) / span).clamp(0.0, 1.0))).collect()
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    let idx = (q * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_scale_bounds_are_one_to_ten() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 100.0];
        let scaled = percentile_scale_to_1_10(&values);
        for v in scaled {
            assert!((1.0..=10.0).contains(&v));
        }
    }
}
