//! Onset strength envelopes (spectral flux), used by both the tempo
//! detector ensemble (spec §4.C) and the beat grid (spec §4.D).

use ndarray::{Array2, Axis};

/// Half-wave rectified spectral flux: the sum of positive frame-to-frame
/// magnitude increases, one value per STFT frame. Matches
/// `librosa.onset.onset_strength`'s default aggregation.
#[must_use]
#[inline]
pub fn onset_strength(spectrum: &Array2<f64>) -> Vec<f32> {
    let n_frames = spectrum.shape()[1];
    if n_frames < 2 {
        return vec![0.0; n_frames];
    }
    let mut env = vec![0.0f32; n_frames];
    let cols: Vec<_> = spectrum.axis_iter(Axis(1)).collect();
    for i in 1..n_frames {
        let flux: f64 = cols[i]
            .iter()
            .zip(cols[i - 1].iter())
            .map(|(&cur, &prev)| (cur - prev).max(0.0))
            .sum();
        env[i] = flux as f32;
    }
    normalize(&mut env);
    env
}

/// Onset strength restricted to a percussive component (spec §4.C method 3
/// / §4.D), computed the same way but over a separated percussive
/// magnitude spectrogram from [`crate::dsp::hpss`].
#[must_use]
#[inline]
pub fn onset_strength_percussive(percussive_spectrum: &Array2<f64>) -> Vec<f32> {
    onset_strength(percussive_spectrum)
}

fn normalize(env: &mut [f32]) {
    let max = env.iter().copied().fold(0.0_f32, f32::max);
    if max > 1e-9 {
        for v in env.iter_mut() {
            *v /= max;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_spectrum_has_no_onsets() {
        let spectrum = Array2::<f64>::ones((100, 10));
        let env = onset_strength(&spectrum);
        assert!(env.iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn a_sudden_energy_increase_produces_an_onset() {
        let mut spectrum = Array2::<f64>::zeros((100, 5));
        spectrum.column_mut(3).fill(1.0);
        let env = onset_strength(&spectrum);
        assert!(env[3] > 0.0);
        assert_eq!(env[0], 0.0);
    }
}
