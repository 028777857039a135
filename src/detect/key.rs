//! Key Detector (spec §4.B, component B): five independent correlators,
//! each yielding `(pitch_class, mode, confidence)`, combined by a weighted
//! vote into a Camelot label.

use log::{debug, trace, warn};
use ndarray::{Array1, Array2, Axis};

use crate::dsp::chroma;
use crate::features::FeatureBundle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Major,
    Minor,
}

#[derive(Debug, Clone, Copy)]
struct Estimate {
    pitch_class: u8,
    mode: Mode,
    confidence: f64,
}

/// Krumhansl-Kessler major/minor key profiles.
const MAJOR_PROFILE: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const MINOR_PROFILE: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];
/// Alternative Temperley profile, used by the multi-resolution method.
const TEMPERLEY_MAJOR: [f64; 12] = [
    5.0, 2.0, 3.5, 2.0, 4.5, 4.0, 2.0, 4.5, 2.0, 3.5, 1.5, 4.0,
];
const TEMPERLEY_MINOR: [f64; 12] = [
    5.0, 2.0, 3.5, 4.5, 2.0, 4.0, 2.0, 4.5, 3.5, 2.0, 3.5, 2.5,
];

const PITCH_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

pub struct KeyResult {
    pub pitch_class: u8,
    pub mode: Mode,
    pub confidence: f64,
}

impl KeyResult {
    /// Camelot mapping: major -> `{1..12}B`, minor -> `{1..12}A`, per the
    /// canonical wheel (A = minor, B = major; spec §9 open question).
    #[must_use]
    #[inline]
    pub fn camelot(&self) -> String {
        let wheel_major = [8, 3, 10, 5, 12, 7, 2, 9, 4, 11, 6, 1];
        let wheel_minor = [5, 12, 7, 2, 9, 4, 11, 6, 1, 8, 3, 10];
        let (number, letter) = match self.mode {
            Mode::Major => (wheel_major[self.pitch_class as usize], 'B'),
            Mode::Minor => (wheel_minor[self.pitch_class as usize], 'A'),
        };
        format!("{number}{letter}")
    }

    #[must_use]
    #[inline]
    pub fn pitch_name(&self) -> &'static str {
        PITCH_NAMES[self.pitch_class as usize]
    }

    #[must_use]
    #[inline]
    pub fn mode_name(&self) -> &'static str {
        match self.mode {
            Mode::Major => "major",
            Mode::Minor => "minor",
        }
    }
}

/// Run all five methods and vote (spec §4.B). Never fails: defaults to
/// `8A`/minor/0.5 if every method is unavailable.
#[must_use]
#[inline]
pub fn detect_key(bundle: &FeatureBundle) -> KeyResult {
    let mut estimates = Vec::new();
    if let Some(c) = &bundle.chroma_512 {
        if let Some(e) = method_enhanced_chroma(c) {
            estimates.push((e, 0.38));
        }
    }
    if let Some(c) = &bundle.chroma_harm_1024 {
        if let Some(e) = method_harmonic(c) {
            estimates.push((e, 0.32));
        }
    }
    if let Some(e) = method_multi_resolution(bundle) {
        estimates.push((e, 0.18));
    }
    if let Some(c) = &bundle.chroma_512 {
        if let Some(e) = method_windowed_majority(c, &bundle.rms_512) {
            estimates.push((e, 0.12));
        }
    }
    if let Some(c) = &bundle.chroma_harm_512 {
        if let Some(e) = method_beat_synchronous(c, &bundle.beat_frames) {
            estimates.push((e, 0.084));
        }
    }

    if estimates.is_empty() {
        warn!("key detection: every method failed, using default 8A");
        return KeyResult {
            pitch_class: 9,
            mode: Mode::Minor,
            confidence: 0.5,
        };
    }

    let total_weight: f64 = estimates.iter().map(|(_, w)| w).sum();
    let mut tally = [[0.0f64; 2]; 12];
    for (est, weight) in &estimates {
        trace!(
            "key method estimate: {} {:?} conf={:.2} weight={:.2}",
            PITCH_NAMES[est.pitch_class as usize],
            est.mode,
            est.confidence,
            weight
        );
        let mode_idx = usize::from(est.mode == Mode::Major);
        tally[est.pitch_class as usize][mode_idx] += weight / total_weight * est.confidence.clamp(0.0, 1.0);
    }

    let mut best = (0u8, Mode::Minor, tally[0][0]);
    for (pc, row) in tally.iter().enumerate() {
        for (mode_idx, &score) in row.iter().enumerate() {
            if score > best.2 {
                best = (
                    pc as u8,
                    if mode_idx == 1 { Mode::Major } else { Mode::Minor },
                    score,
                );
            }
        }
    }
    let max_possible = tally.iter().flatten().copied().fold(f64::MIN, f64::max).max(1e-9);
    let confidence = (best.2 / max_possible).clamp(0.0, 1.0);
    debug!("key detection winner: {} {:?} conf={confidence:.2}", PITCH_NAMES[best.0 as usize], best.1);

    KeyResult {
        pitch_class: best.0,
        mode: best.1,
        confidence,
    }
}

fn mean_chroma_vector(chroma_matrix: &Array2<f64>, weights: Option<&[f32]>) -> Array1<f64> {
    let n_frames = chroma_matrix.shape()[1];
    if let Some(w) = weights {
        if w.len() == n_frames {
            let total: f64 = w.iter().map(|&x| f64::from(x * x)).sum::<f64>().max(1e-12);
            let mut acc = Array1::<f64>::zeros(12);
            for (col, &weight) in chroma_matrix.axis_iter(Axis(1)).zip(w.iter()) {
                acc += &(col.to_owned() * f64::from(weight * weight));
            }
            return acc / total;
        }
    }
    chroma_matrix.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(12))
}

/// Stretches/shrinks `values` (a per-frame series hopped at `DEFAULT_HOP`,
/// e.g. `spectral_centroid_512`) to `target_frames` entries via nearest-frame
/// lookup, so it can weight a chroma matrix computed at a different hop size
/// (spec §4.B method 3: "each chroma weighted by its spectral centroid").
fn resample_to_frame_count(values: &[f32], target_frames: usize) -> Vec<f32> {
    if values.is_empty() || target_frames == 0 {
        return vec![1.0; target_frames];
    }
    (0..target_frames)
        .map(|i| {
            let src_idx = i * values.len() / target_frames;
            values[src_idx.min(values.len() - 1)]
        })
        .collect()
}

fn correlate_with_profiles(vector: &Array1<f64>) -> Estimate {
    let mut best = Estimate {
        pitch_class: 0,
        mode: Mode::Major,
        confidence: 0.0,
    };
    for rotation in 0..12 {
        let major_corr = pearson(vector, &rotate(&MAJOR_PROFILE, rotation));
        let minor_corr = pearson(vector, &rotate(&MINOR_PROFILE, rotation));
        if major_corr > best.confidence {
            best = Estimate {
                pitch_class: rotation as u8,
                mode: Mode::Major,
                confidence: major_corr,
            };
        }
        if minor_corr > best.confidence {
            best = Estimate {
                pitch_class: rotation as u8,
                mode: Mode::Minor,
                confidence: minor_corr,
            };
        }
    }
    best
}

fn rotate(profile: &[f64; 12], by: usize) -> [f64; 12] {
    let mut out = [0.0; 12];
    for i in 0..12 {
        out[(i + by) % 12] = profile[i];
    }
    out
}

fn pearson(a: &Array1<f64>, b: &[f64; 12]) -> f64 {
    let mean_a = a.mean().unwrap_or(0.0);
    let mean_b = b.iter().sum::<f64>() / 12.0;
    let mut num = 0.0;
    let mut den_a = 0.0;
    let mut den_b = 0.0;
    for i in 0..12 {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        num += da * db;
        den_a += da * da;
        den_b += db * db;
    }
    if den_a < 1e-12 || den_b < 1e-12 {
        0.0
    } else {
        (num / (den_a.sqrt() * den_b.sqrt())).clamp(-1.0, 1.0).max(0.0)
    }
}

fn method_enhanced_chroma(chroma_matrix: &Array2<f64>) -> Option<Estimate> {
    if chroma_matrix.shape()[1] == 0 {
        return None;
    }
    let smoothed = gaussian_smooth_time(chroma_matrix, 1.0);
    let weights: Vec<f32> = smoothed
        .axis_iter(Axis(1))
        .map(|c| c.sum().powi(2) as f32)
        .collect();
    let vector = mean_chroma_vector(&smoothed, Some(&weights));
    Some(correlate_with_profiles(&vector))
}

fn method_harmonic(chroma_matrix: &Array2<f64>) -> Option<Estimate> {
    if chroma_matrix.shape()[1] == 0 {
        return None;
    }
    let floored = chroma_matrix.mapv(|x| x.max(0.1));
    let mut acc = Array1::<f64>::ones(12);
    for col in floored.axis_iter(Axis(1)) {
        acc *= &col;
    }
    let n = floored.shape()[1].max(1) as f64;
    let geo_mean = acc.mapv(|x| x.max(1e-12).ln() / n).mapv(f64::exp);
    Some(correlate_with_profiles(&geo_mean))
}

fn method_multi_resolution(bundle: &FeatureBundle) -> Option<Estimate> {
    let matrices: Vec<&Array2<f64>> = [&bundle.chroma_256, &bundle.chroma_512, &bundle.chroma_1024, &bundle.chroma_2048]
        .into_iter()
        .filter_map(|c| c.as_ref())
        .collect();
    if matrices.is_empty() {
        return None;
    }
    let mut acc = Array1::<f64>::zeros(12);
    for m in &matrices {
        let weights = resample_to_frame_count(&bundle.spectral_centroid_512, m.shape()[1]);
        acc += &mean_chroma_vector(m, Some(&weights));
    }
    acc /= matrices.len() as f64;

    let mut best = Estimate {
        pitch_class: 0,
        mode: Mode::Major,
        confidence: 0.0,
    };
    for rotation in 0..12 {
        let major_sim = cosine(&acc, &rotate(&TEMPERLEY_MAJOR, rotation));
        let minor_sim = cosine(&acc, &rotate(&TEMPERLEY_MINOR, rotation));
        if major_sim > best.confidence {
            best = Estimate {
                pitch_class: rotation as u8,
                mode: Mode::Major,
                confidence: major_sim,
            };
        }
        if minor_sim > best.confidence {
            best = Estimate {
                pitch_class: rotation as u8,
                mode: Mode::Minor,
                confidence: minor_sim,
            };
        }
    }
    Some(best)
}

fn cosine(a: &Array1<f64>, b: &[f64; 12]) -> f64 {
    let dot: f64 = (0..12).map(|i| a[i] * b[i]).sum();
    let norm_a = a.mapv(|x| x * x).sum().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a < 1e-12 || norm_b < 1e-12 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
    }
}

fn method_windowed_majority(chroma_matrix: &Array2<f64>, rms: &[f32]) -> Option<Estimate> {
    let n_frames = chroma_matrix.shape()[1];
    if n_frames == 0 {
        return None;
    }
    // window length proportional to track length, clamped [8, 20] frames as a stand-in
    // for the spec's duration-scaled window (frame-domain analogue of 8-20s)
    let window = n_frames.clamp(8, 20).min(n_frames);
    let hop = (window / 3).max(1);

    let mut votes = [[0.0f64; 2]; 12];
    let mut start = 0;
    while start < n_frames {
        let end = (start + window).min(n_frames);
        if end <= start {
            break;
        }
        let slice = chroma_matrix.slice(ndarray::s![.., start..end]).to_owned();
        let weight = rms.get(start..end).map_or(1.0, |w| w.iter().map(|&x| f64::from(x)).sum::<f64>().max(1e-6));
        let vector = slice.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(12));
        let est = correlate_with_profiles(&vector);
        votes[est.pitch_class as usize][usize::from(est.mode == Mode::Major)] += weight * est.confidence;
        start += hop;
    }
    best_of_tally(&votes)
}

fn method_beat_synchronous(chroma_matrix: &Array2<f64>, beat_frames: &[usize]) -> Option<Estimate> {
    if chroma_matrix.shape()[1] == 0 {
        return None;
    }
    let n_frames = chroma_matrix.shape()[1];
    let boundaries: Vec<usize> = if beat_frames.is_empty() {
        vec![0, n_frames]
    } else {
        let mut b: Vec<usize> = beat_frames.iter().copied().filter(|&f| f < n_frames).collect();
        b.push(n_frames);
        b
    };
    let mut acc = Array1::<f64>::zeros(12);
    let mut count = 0usize;
    for window in boundaries.windows(2) {
        let (start, end) = (window[0], window[1]);
        if end <= start {
            continue;
        }
        let segment = chroma_matrix.slice(ndarray::s![.., start..end]);
        let median_vec = median_axis1(&segment.to_owned());
        acc += &median_vec;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    acc /= count as f64;
    Some(correlate_with_profiles(&acc))
}

fn median_axis1(matrix: &Array2<f64>) -> Array1<f64> {
    let mut out = Array1::<f64>::zeros(12);
    for (row_idx, mut out_val) in (0..12).zip(out.iter_mut()) {
        let mut row: Vec<f64> = matrix.row(row_idx).to_vec();
        row.sort_by(|a, b| a.partial_cmp(b).unwrap());
        *out_val = row.get(row.len() / 2).copied().unwrap_or(0.0);
    }
    out
}

fn best_of_tally(votes: &[[f64; 2]; 12]) -> Option<Estimate> {
    let mut best: Option<Estimate> = None;
    for (pc, row) in votes.iter().enumerate() {
        for (mode_idx, &score) in row.iter().enumerate() {
            let improves = best.as_ref().map_or(true, |b| score > b.confidence);
            if improves && score > 0.0 {
                best = Some(Estimate {
                    pitch_class: pc as u8,
                    mode: if mode_idx == 1 { Mode::Major } else { Mode::Minor },
                    confidence: score,
                });
            }
        }
    }
    let max = votes.iter().flatten().copied().fold(f64::MIN, f64::max).max(1e-9);
    best.map(|mut e| {
        e.confidence = (e.confidence / max).clamp(0.0, 1.0);
        e
    })
}

fn gaussian_smooth_time(matrix: &Array2<f64>, sigma: f64) -> Array2<f64> {
    let radius = (sigma * 3.0).ceil() as isize;
    let kernel: Vec<f64> = (-radius..=radius)
        .map(|x| (-0.5 * (f64::from(x as i32) / sigma).powi(2)).exp())
        .collect();
    let kernel_sum: f64 = kernel.iter().sum();
    let n_frames = matrix.shape()[1] as isize;
    let mut out = matrix.clone();
    for row in 0..matrix.shape()[0] {
        for t in 0..n_frames {
            let mut acc = 0.0;
            for (k, &w) in kernel.iter().enumerate() {
                let offset = k as isize - radius;
                let idx = (t + offset).clamp(0, n_frames - 1);
                acc += matrix[[row, idx as usize]] * w;
            }
            out[[row, t as usize]] = acc / kernel_sum;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn c_major_profile_chroma_detects_c_major() {
        let mut chroma_matrix = Array2::<f64>::zeros((12, 4));
        for mut col in chroma_matrix.columns_mut() {
            for i in 0..12 {
                col[i] = MAJOR_PROFILE[i];
            }
        }
        let est = method_enhanced_chroma(&chroma_matrix).unwrap();
        assert_eq!(est.pitch_class, 0);
        assert_eq!(est.mode, Mode::Major);
    }

    #[rstest]
    #[case(9, Mode::Minor, "8A")]
    #[case(0, Mode::Major, "8B")]
    #[case(9, Mode::Major, "11B")]
    #[case(0, Mode::Minor, "5A")]
    #[case(7, Mode::Major, "9B")]
    fn camelot_mapping_matches_the_wheel(#[case] pitch_class: u8, #[case] mode: Mode, #[case] expected: &str) {
        let result = KeyResult {
            pitch_class,
            mode,
            confidence: 0.5,
        };
        assert_eq!(result.camelot(), expected);
    }

    #[test]
    fn default_on_no_estimates_is_8a_minor() {
        let bundle_like_empty = Array2::<f64>::zeros((12, 0));
        assert!(method_enhanced_chroma(&bundle_like_empty).is_none());
    }
}
