//! Harmonic/percussive source separation via median filtering, the
//! classic Fitzgerald (2010) algorithm `librosa.effects.hpss` implements:
//! a horizontal median filter suppresses percussive transients (keeping
//! harmonic content), a vertical one suppresses sustained tones (keeping
//! percussive content), and a soft mask built from the two ratios splits
//! the original magnitude spectrogram between them.

use ndarray::{Array2, Axis};

const DEFAULT_MARGIN: f64 = 8.0;
const MEDIAN_WINDOW: usize = 17;

/// Returns `(harmonic, percussive)` magnitude spectrograms, same shape as
/// `spectrum`.
#[must_use]
#[inline]
pub fn hpss(spectrum: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
    hpss_with_margin(spectrum, DEFAULT_MARGIN)
}

#[must_use]
#[inline]
pub fn hpss_with_margin(spectrum: &Array2<f64>, margin: f64) -> (Array2<f64>, Array2<f64>) {
    let (rows, cols) = spectrum.dim();
    if rows == 0 || cols == 0 {
        return (spectrum.clone(), spectrum.clone());
    }

    let harm_med = median_filter_axis(spectrum, Axis(1), MEDIAN_WINDOW);
    let perc_med = median_filter_axis(spectrum, Axis(0), MEDIAN_WINDOW);

    let mut harmonic = Array2::<f64>::zeros((rows, cols));
    let mut percussive = Array2::<f64>::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            let h = harm_med[[r, c]];
            let p = perc_med[[r, c]];
            let total = margin.mul_add(h, p).max(1e-12);
            let harmonic_mask = (margin * h) / total;
            harmonic[[r, c]] = harmonic_mask * spectrum[[r, c]];
            percussive[[r, c]] = (1.0 - harmonic_mask) * spectrum[[r, c]];
        }
    }
    (harmonic, percussive)
}

/// 1-D median filter applied along `axis`, edge-padded.
fn median_filter_axis(input: &Array2<f64>, axis: Axis, window: usize) -> Array2<f64> {
    let mut out = input.clone();
    let half = window / 2;
    match axis {
        Axis(1) => {
            // filter along time (each row independently)
            for mut row in out.rows_mut() {
                let src: Vec<f64> = row.to_vec();
                for (i, dst) in row.iter_mut().enumerate() {
                    *dst = windowed_median(&src, i, half);
                }
            }
        }
        _ => {
            // filter along frequency (each column independently)
            for mut col in out.columns_mut() {
                let src: Vec<f64> = col.to_vec();
                for (i, dst) in col.iter_mut().enumerate() {
                    *dst = windowed_median(&src, i, half);
                }
            }
        }
    }
    out
}

fn windowed_median(src: &[f64], center: usize, half: usize) -> f64 {
    let lo = center.saturating_sub(half);
    let hi = (center + half + 1).min(src.len());
    let mut window: Vec<f64> = src[lo..hi].to_vec();
    window.sort_by(|a, b| a.partial_cmp(b).unwrap());
    window[window.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separation_preserves_energy_sum() {
        let mut spectrum = Array2::<f64>::zeros((32, 32));
        for r in 0..32 {
            for c in 0..32 {
                spectrum[[r, c]] = ((r + c) as f64).sin().abs();
            }
        }
        let (h, p) = hpss(&spectrum);
        for r in 0..32 {
            for c in 0..32 {
                let sum = h[[r, c]] + p[[r, c]];
                assert!((sum - spectrum[[r, c]]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn empty_spectrum_returns_empty() {
        let spectrum = Array2::<f64>::zeros((0, 0));
        let (h, p) = hpss(&spectrum);
        assert_eq!(h.dim(), (0, 0));
        assert_eq!(p.dim(), (0, 0));
    }
}
