//! Energy-Gap Stage (spec §4.G, component G): breakdown/bridge/build cues
//! from RMS/flatness valleys and the rises that follow them.

use crate::dsp::spectral;
use crate::features::FeatureBundle;
use crate::model::{CueType, CuePoint};

#[must_use]
#[inline]
pub fn detect_energy_gaps(bundle: &FeatureBundle, bpm: u32) -> Vec<CuePoint> {
    let rms = &bundle.rms_512;
    let centroid = &bundle.spectral_centroid_512;
    if rms.len() < 4 {
        return Vec::new();
    }
    let flatness = spectral::spectral_flatness(&bundle.stft_mag);
    let n = rms.len().min(flatness.len()).min(centroid.len().max(rms.len()));
    let n = n.min(rms.len());

    let rms_n = normalize_series(&rms[..n]);
    let flatness_n = normalize_series(&flatness[..n.min(flatness.len())]);
    let d_centroid: Vec<f32> = if centroid.len() >= n {
        delta_abs(&centroid[..n])
    } else {
        vec![0.0; n]
    };
    let d_centroid_n = normalize_series(&d_centroid);
    let novelty_n = rms_n.clone(); // reuse RMS-derived novelty proxy consistent with §4.F

    let hop = crate::dsp::DEFAULT_HOP;
    let frame_duration = f64::from(hop) / f64::from(bundle.sample_rate);
    let bar_sec = if bpm > 0 { 240.0 / f64::from(bpm) } else { 2.0 };

    let valley: Vec<f32> = (0..n)
        .map(|i| {
            (1.0 - rms_n.get(i).copied().unwrap_or(0.0))
                + (1.0 - flatness_n.get(i).copied().unwrap_or(0.0))
                + (1.0 - d_centroid_n.get(i).copied().unwrap_or(0.0))
                + (1.0 - novelty_n.get(i).copied().unwrap_or(0.0))
        })
        .collect();
    let valley_n = normalize_series(&valley);

    let mask_start = (8.0 / frame_duration) as usize;
    let mask_end = (((bundle.duration - 8.0).max(0.0)) / frame_duration) as usize;
    let mask_end = mask_end.min(n);

    let min_distance = ((8.0 * bar_sec) / frame_duration).max(1.0) as usize;
    let valleys = pick_valleys(&valley_n, mask_start, mask_end, 0.15, 0.3, min_distance);

    let mut cues = Vec::new();
    let mut breakdown_idx = 0u32;
    let mut bridge_idx = 0u32;
    let mut build_idx = 0u32;
    let mut last_build_frame: Option<usize> = None;
    let min_build_spacing = ((4.0 * bar_sec) / frame_duration).max(1.0) as usize;

    for &v in &valleys {
        let rms_at_valley = rms[v];
        let time = v as f64 * frame_duration;
        let kind = if rms_at_valley < 0.25 {
            breakdown_idx += 1;
            Some((CueType::Breakdown, breakdown_idx))
        } else if rms_at_valley < 0.55 {
            bridge_idx += 1;
            Some((CueType::Bridge, bridge_idx))
        } else {
            None
        };
        if let Some((kind, instance)) = kind {
            cues.push(make_cue(kind, instance, time, (1.0 - rms_at_valley).into()));
        }

        let window_end = (v + (16.0 * bar_sec / frame_duration) as usize).min(n);
        let window_start = (v + (4.0 * bar_sec / frame_duration) as usize).min(window_end);
        if let Some(rise_frame) = find_rise(&rms, window_start, window_end, 0.30) {
            let spaced_ok = last_build_frame.map_or(true, |l| rise_frame.abs_diff(l) >= min_build_spacing);
            if spaced_ok {
                build_idx += 1;
                last_build_frame = Some(rise_frame);
                let rise_time = rise_frame as f64 * frame_duration;
                cues.push(make_cue(CueType::Build, build_idx, rise_time, 0.6));
            }
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
        reason: format!("{kind} valley/rise detected"),
        stage: "energy_gaps".to_string(),
        instance: Some(instance),
    }
}

fn find_rise(rms: &[f32], start: usize, end: usize, threshold: f32) -> Option<usize> {
    if end <= start || end > rms.len() {
        return None;
    }
    let base = rms[start];
    for i in start..end {
        if rms[i] - base >= threshold {
            return Some(i);
        }
    }
    None
}

fn delta_abs(signal: &[f32]) -> Vec<f32> {
    let mut out = vec![0.0; signal.len()];
    for i in 1..signal.len() {
        out[i] = (signal[i] - signal[i - 1]).abs();
    }
    out
}

fn normalize_series(signal: &[f32]) -> Vec<f32> {
    let max = signal.iter().copied().fold(0.0_f32, f32::max).max(1e-9);
    signal.iter().map(|&x| x / max).collect()
}

fn pick_valleys(signal: &[f32], mask_start: usize, mask_end: usize, prominence: f32, height: f32, min_distance: usize) -> Vec<usize> {
    let mut valleys = Vec::new();
    let mut last: Option<usize> = None;
    let lo = mask_start.min(signal.len());
    let hi = mask_end.min(signal.len());
    if hi <= lo + 2 {
        return valleys;
    }
    for i in (lo + 1)..(hi - 1) {
        if signal[i] >= signal[i - 1] && signal[i] >= signal[i + 1] && signal[i] >= height {
            let local_min = signal[(i.saturating_sub(5))..(i + 5).min(signal.len())]
                .iter()
                .copied()
                .fold(f32::MAX, f32::min);
            if signal[i] - local_min < prominence {
                continue;
            }
            if let Some(l) = last {
                if i - l < min_distance {
                    continue;
                }
            }
            valleys.push(i);
            last = Some(i);
        }
    }
    valleys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_series_scales_to_unit_max() {
        let signal = vec![0.0, 1.0, 2.0, 4.0];
        let normalized = normalize_series(&signal);
        assert!((normalized[3] - 1.0).abs() < 1e-6);
    }
}
