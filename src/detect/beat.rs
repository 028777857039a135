//! Beat Stage (spec §4.D, component D): beat grid, first-strong-beat, and
//! the synthesized-grid fallback.

use crate::features::FeatureBundle;
use crate::model::BeatGrid;

/// Builds the beat grid from the cached `beat_times`/`beat_frames`, or
/// synthesizes a uniform grid from BPM if the cache came up empty.
#[must_use]
#[inline]
pub fn detect_beat_grid(bundle: &FeatureBundle, bpm: u32) -> BeatGrid {
    let mut beat_times = bundle.beat_times.clone();
    if beat_times.is_empty() && bpm > 0 {
        let interval = 60.0 / f64::from(bpm);
        let first_onset = first_onset_time(bundle);
        let mut t = first_onset;
        while t < bundle.duration {
            beat_times.push(t);
            t += interval;
        }
    }

    let first_onset_ge_quarter = first_onset_time(bundle).max(0.25);
    let first_beat_ge_quarter = beat_times.iter().copied().find(|&t| t >= 0.25).unwrap_or(f64::MAX);
    let first_strong_beat = first_onset_ge_quarter.min(first_beat_ge_quarter);

    BeatGrid {
        beat_times,
        first_strong_beat,
        bpm,
    }
}

fn first_onset_time(bundle: &FeatureBundle) -> f64 {
    let hop = crate::dsp::DEFAULT_HOP;
    bundle
        .onset_env_512
        .iter()
        .position(|&v| v > 0.05)
        .map_or(0.0, |idx| (idx * hop) as f64 / f64::from(bundle.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn empty_bundle() -> FeatureBundle {
        FeatureBundle {
            y_harm: None,
            y_perc: None,
            stft_mag: Array2::zeros((0, 0)),
            chroma_256: None,
            chroma_512: None,
            chroma_1024: None,
            chroma_2048: None,
            chroma_harm_512: None,
            chroma_harm_1024: None,
            spectral_centroid_512: Vec::new(),
            onset_env_256: Vec::new(),
            onset_env_512: Vec::new(),
            onset_env_perc_512: Vec::new(),
            mfcc_512: Array2::zeros((13, 0)),
            rms_512: Vec::new(),
            rms_1024: Vec::new(),
            beat_times: Vec::new(),
            beat_frames: Vec::new(),
            tempo: 120.0,
            tuning: 0.0,
            sample_rate: 22050,
            duration: 10.0,
        }
    }

    #[test]
    fn synthesizes_uniform_grid_when_beats_missing() {
        let bundle = empty_bundle();
        let grid = detect_beat_grid(&bundle, 120);
        assert!(!grid.beat_times.is_empty());
        let interval = grid.beat_times[1] - grid.beat_times[0];
        assert!((interval - 0.5).abs() < 1e-6);
    }
}
