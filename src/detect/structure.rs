//! Structure Stage (spec §4.E, component E): recurrence-matrix novelty
//! segmentation with repeat grouping and rule-based labeling.

use log::warn;
use ndarray::{Array1, Array2, Axis};

use crate::features::FeatureBundle;
use crate::model::Segment;

const CHECKERBOARD_SIZE: usize = 16;

/// Detects structural segments, or falls back to the three-segment
/// `[intro, verse, outro]` split on any failure (spec §4.E).
#[must_use]
#[inline]
pub fn detect_structure(bundle: &FeatureBundle) -> Vec<Segment> {
    match try_detect_structure(bundle) {
        Some(segments) if !segments.is_empty() => segments,
        _ => {
            warn!("structure detection failed or returned no boundaries, using 3-segment fallback");
            fallback_structure(bundle.duration)
        }
    }
}

fn try_detect_structure(bundle: &FeatureBundle) -> Option<Vec<Segment>> {
    let chroma_matrix = bundle.chroma_512.as_ref()?;
    let n_frames = chroma_matrix.shape()[1];
    if n_frames < CHECKERBOARD_SIZE * 2 {
        return None;
    }

    let beat_sync = beat_synchronize(chroma_matrix, &bundle.beat_frames);
    let recurrence = recurrence_matrix(&beat_sync);
    let novelty = checkerboard_novelty(&recurrence, CHECKERBOARD_SIZE);
    let smoothed = gaussian_smooth_1d(&novelty, 1.5);

    let min_distance = (smoothed.len() as f64 * 0.03).max(4.0) as usize;
    let height = percentile(&smoothed, 55.0);
    let peaks = pick_peaks(&smoothed, min_distance, height);
    if peaks.is_empty() {
        return None;
    }

    let bar_beats = 4usize;
    let mut boundary_times: Vec<f64> = peaks
        .iter()
        .map(|&p| {
            let snapped = (p / bar_beats) * bar_beats;
            beat_index_to_time(snapped, &bundle.beat_times, bundle.duration)
        })
        .collect();
    boundary_times.insert(0, 0.0);
    boundary_times.push(bundle.duration);
    boundary_times.sort_by(|a, b| a.partial_cmp(b).unwrap());
    boundary_times.dedup_by(|a, b| (*a - *b).abs() < 1e-6);

    Some(build_segments(bundle, &boundary_times))
}

/// Resolves a beat-synchronized segment index (as produced by
/// [`beat_synchronize`]'s one-column-per-beat layout) to a time in seconds
/// via the beat grid, falling back to the track duration for the trailing
/// segment `beat_synchronize` appends past the last real beat.
fn beat_index_to_time(beat_index: usize, beat_times: &[f64], duration: f64) -> f64 {
    beat_times.get(beat_index).copied().unwrap_or(duration)
}

fn beat_synchronize(chroma_matrix: &Array2<f64>, beat_frames: &[usize]) -> Array2<f64> {
    let n_frames = chroma_matrix.shape()[1];
    let boundaries: Vec<usize> = if beat_frames.len() < 2 {
        (0..=n_frames).step_by((n_frames / 32).max(1)).collect()
    } else {
        let mut b: Vec<usize> = beat_frames.iter().copied().filter(|&f| f < n_frames).collect();
        b.push(n_frames);
        b
    };
    let n_segments = boundaries.len().saturating_sub(1).max(1);
    let mut out = Array2::<f64>::zeros((12, n_segments));
    for (i, w) in boundaries.windows(2).enumerate() {
        let (s, e) = (w[0], w[1]);
        if e <= s {
            continue;
        }
        let slice = chroma_matrix.slice(ndarray::s![.., s..e]);
        let mut median_vec = Array1::<f64>::zeros(12);
        for row in 0..12 {
            let mut v: Vec<f64> = slice.row(row).to_vec();
            v.sort_by(|a, b| a.partial_cmp(b).unwrap());
            median_vec[row] = v.get(v.len() / 2).copied().unwrap_or(0.0);
        }
        out.column_mut(i).assign(&median_vec);
    }
    out
}

fn recurrence_matrix(beat_sync_chroma: &Array2<f64>) -> Array2<f64> {
    let n = beat_sync_chroma.shape()[1];
    let mut out = Array2::<f64>::zeros((n, n));
    let cols: Vec<Array1<f64>> = beat_sync_chroma.axis_iter(Axis(1)).map(|c| c.to_owned()).collect();
    for i in 0..n {
        for j in 0..n {
            out[[i, j]] = cosine_similarity(&cols[i], &cols[j]);
        }
    }
    out
}

fn cosine_similarity(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    let dot = a.dot(b);
    let norm_a = a.dot(a).sqrt();
    let norm_b = b.dot(b).sqrt();
    if norm_a < 1e-12 || norm_b < 1e-12 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn checkerboard_novelty(recurrence: &Array2<f64>, size: usize) -> Vec<f32> {
    let n = recurrence.shape()[0];
    let half = size / 2;
    (0..n)
        .map(|i| {
            if i < half || i + half >= n {
                return 0.0;
            }
            let mut score = 0.0;
            for a in 0..half {
                for b in 0..half {
                    let same_left = recurrence[[i - a - 1, i - b - 1]];
                    let same_right = recurrence[[i + a, i + b]];
                    let cross = recurrence[[i - a - 1, i + b]];
                    score += same_left + same_right - 2.0 * cross;
                }
            }
            score.max(0.0) as f32
        })
        .collect()
}

fn gaussian_smooth_1d(signal: &[f32], sigma: f64) -> Vec<f32> {
    let radius = (sigma * 3.0).ceil() as isize;
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

fn percentile(values: &[f32], pct: f64) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((pct / 100.0) * (v.len() - 1) as f64).round() as usize;
    v[idx.min(v.len() - 1)]
}

fn pick_peaks(signal: &[f32], min_distance: usize, height: f32) -> Vec<usize> {
    let mut peaks = Vec::new();
    let mut last_peak: Option<usize> = None;
    for i in 1..signal.len().saturating_sub(1) {
        if signal[i] > height && signal[i] >= signal[i - 1] && signal[i] >= signal[i + 1] {
            if let Some(last) = last_peak {
                if i - last < min_distance {
                    continue;
                }
            }
            peaks.push(i);
            last_peak = Some(i);
        }
    }
    peaks
}

fn build_segments(bundle: &FeatureBundle, boundaries: &[f64]) -> Vec<Segment> {
    let rms_curve = &bundle.rms_512;
    let hop = crate::dsp::DEFAULT_HOP;
    let frame_duration = hop as f64 / f64::from(bundle.sample_rate);

    let mut rms_per_segment = Vec::new();
    for w in boundaries.windows(2) {
        let (s, e) = (w[0], w[1]);
        let start_frame = (s / frame_duration) as usize;
        let end_frame = ((e / frame_duration) as usize).max(start_frame + 1).min(rms_curve.len());
        let segment_rms = if start_frame < rms_curve.len() && end_frame > start_frame {
            rms_curve[start_frame..end_frame].iter().map(|&x| f64::from(x)).sum::<f64>()
                / (end_frame - start_frame) as f64
        } else {
            0.0
        };
        rms_per_segment.push(segment_rms);
    }

    let mut sorted_rms = rms_per_segment.clone();
    sorted_rms.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let p25 = quantile(&sorted_rms, 0.25);
    let p50 = quantile(&sorted_rms, 0.50);
    let p75 = quantile(&sorted_rms, 0.75);
    let max_rms = sorted_rms.last().copied().unwrap_or(1.0).max(1e-9);

    let repeat_groups = group_by_similarity(bundle, boundaries);

    let n = boundaries.len() - 1;
    let mut counters: std::collections::HashMap<&'static str, u32> = std::collections::HashMap::new();
    let mut segments = Vec::with_capacity(n);
    for i in 0..n {
        let rms = rms_per_segment[i];
        let group = &repeat_groups[i];
        let is_repeated = repeat_groups.iter().filter(|g| *g == group).count() > 1;

        let kind = if i == 0 && rms < p50 {
            "intro"
        } else if i == n - 1 && rms < p50 {
            "outro"
        } else if is_repeated && rms >= p75 {
            "chorus"
        } else if is_repeated && rms < p50 {
            "verse"
        } else if !is_repeated && rms < p25 {
            "breakdown"
        } else if !is_repeated && rms < p50 {
            "bridge"
        } else if rms >= p75 {
            "chorus"
        } else {
            "verse"
        };

        let duration = boundaries[i + 1] - boundaries[i];
        let kind = if is_rising_build_candidate(&rms_per_segment, i, duration) {
            "build"
        } else {
            kind
        };

        let instance = {
            let c = counters.entry(label_key(kind)).or_insert(0);
            *c += 1;
            *c
        };

        let confidence = (0.70 + if is_repeated { 0.10 } else { 0.0 } + if (rms - p50).abs() > 0.3 * max_rms { 0.08 } else { 0.0 }).min(0.95);

        segments.push(Segment {
            kind: kind.to_string(),
            start: boundaries[i],
            end: boundaries[i + 1],
            duration,
            instance,
            energy: (1.0 + 9.0 * (rms / max_rms).clamp(0.0, 1.0)).clamp(1.0, 10.0),
            confidence,
            repeat_group: Some(group.clone()),
        });
    }
    segments
}

fn is_rising_build_candidate(rms_per_segment: &[f64], i: usize, duration: f64) -> bool {
    if !(4.0..=32.0).contains(&duration) || i + 1 >= rms_per_segment.len() {
        return false;
    }
    rms_per_segment[i + 1] > rms_per_segment[i] * 1.2
}

fn label_key(kind: &str) -> &'static str {
    match kind {
        "intro" => "intro",
        "outro" => "outro",
        "chorus" => "chorus",
        "verse" => "verse",
        "breakdown" => "breakdown",
        "bridge" => "bridge",
        "build" => "build",
        _ => "section",
    }
}

fn group_by_similarity(bundle: &FeatureBundle, boundaries: &[f64]) -> Vec<String> {
    let Some(chroma_matrix) = bundle.chroma_512.as_ref() else {
        return boundaries.windows(2).enumerate().map(|(i, _)| format!("{i}")).collect();
    };
    let hop = crate::dsp::DEFAULT_HOP;
    let frame_duration = hop as f64 / f64::from(bundle.sample_rate);
    let n_frames = chroma_matrix.shape()[1];

    let mut vectors = Vec::new();
    for w in boundaries.windows(2) {
        let start = ((w[0] / frame_duration) as usize).min(n_frames);
        let end = ((w[1] / frame_duration) as usize).max(start + 1).min(n_frames);
        let vector = if end > start {
            chroma_matrix.slice(ndarray::s![.., start..end]).mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(12))
        } else {
            Array1::zeros(12)
        };
        vectors.push(vector);
    }

    let mut labels = vec![String::new(); vectors.len()];
    let mut next_label = b'A';
    for i in 0..vectors.len() {
        if !labels[i].is_empty() {
            continue;
        }
        let label = (next_label as char).to_string();
        next_label += 1;
        labels[i] = label.clone();
        for j in (i + 1)..vectors.len() {
            if labels[j].is_empty() && cosine_similarity(&vectors[i], &vectors[j]) >= 0.85 {
                labels[j] = label.clone();
            }
        }
    }
    labels
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (q * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn fallback_structure(duration: f64) -> Vec<Segment> {
    vec![
        Segment {
            kind: "intro".to_string(),
            start: 0.0,
            end: duration * 0.15,
            duration: duration * 0.15,
            instance: 1,
            energy: 3.0,
            confidence: 0.5,
            repeat_group: None,
        },
        Segment {
            kind: "verse".to_string(),
            start: duration * 0.15,
            end: duration * 0.85,
            duration: duration * 0.70,
            instance: 1,
            energy: 5.0,
            confidence: 0.5,
            repeat_group: None,
        },
        Segment {
            kind: "outro".to_string(),
            start: duration * 0.85,
            end: duration,
            duration: duration * 0.15,
            instance: 1,
            energy: 3.0,
            confidence: 0.5,
            repeat_group: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_covers_full_duration() {
        let segments = fallback_structure(100.0);
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].start, 0.0);
        assert_eq!(segments.last().unwrap().end, 100.0);
    }

    #[test]
    fn fallback_energies_match_spec() {
        let segments = fallback_structure(60.0);
        assert_eq!(segments[0].energy, 3.0);
        assert_eq!(segments[1].energy, 5.0);
        assert_eq!(segments[2].energy, 3.0);
    }
}
