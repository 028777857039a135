//! Mel filterbank and MFCCs, ported the same way the teacher crate ports
//! its chroma filter bank: direct translation of the `librosa` formulas
//! onto `ndarray`, using a type-II DCT for the cepstral step.

use ndarray::{Array1, Array2, Axis};

fn hz_to_mel(f: f64) -> f64 {
    2595.0 * (1.0 + f / 700.0).log10()
}

fn mel_to_hz(m: f64) -> f64 {
    700.0 * (10f64.powf(m / 2595.0) - 1.0)
}

/// `n_mels x (n_fft/2 + 1)` triangular mel filter bank.
#[must_use]
#[inline]
pub fn mel_filter(sample_rate: u32, n_fft: usize, n_mels: usize) -> Array2<f64> {
    let n_bins = n_fft / 2 + 1;
    let fmax = f64::from(sample_rate) / 2.0;
    let mel_min = hz_to_mel(0.0);
    let mel_max = hz_to_mel(fmax);
    let mel_points: Vec<f64> = (0..=n_mels + 1)
        .map(|i| mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64)
        .collect();
    let hz_points: Vec<f64> = mel_points.iter().map(|&m| mel_to_hz(m)).collect();
    let bin_points: Vec<f64> = hz_points
        .iter()
        .map(|&hz| (n_fft as f64 + 1.0) * hz / f64::from(sample_rate))
        .collect();

    let mut filter = Array2::<f64>::zeros((n_mels, n_bins));
    for m in 0..n_mels {
        let left = bin_points[m];
        let center = bin_points[m + 1];
        let right = bin_points[m + 2];
        for k in 0..n_bins {
            let kf = k as f64;
            let value = if kf >= left && kf <= center && center > left {
                (kf - left) / (center - left)
            } else if kf > center && kf <= right && right > center {
                (right - kf) / (right - center)
            } else {
                0.0
            };
            filter[[m, k]] = value.max(0.0);
        }
    }
    filter
}

/// Log-mel spectrogram (`n_mels x frames`) from a magnitude STFT.
#[must_use]
#[inline]
pub fn mel_spectrogram(spectrum: &Array2<f64>, sample_rate: u32, n_fft: usize, n_mels: usize) -> Array2<f64> {
    let power = spectrum.mapv(|x| x * x);
    let filter = mel_filter(sample_rate, n_fft, n_mels);
    let mel = filter.dot(&power);
    mel.mapv(|x| (x.max(1e-10)).ln())
}

/// MFCCs (`n_mfcc x frames`) via a type-II DCT of the log-mel spectrogram.
#[must_use]
#[inline]
pub fn mfcc(spectrum: &Array2<f64>, sample_rate: u32, n_fft: usize, n_mels: usize, n_mfcc: usize) -> Array2<f64> {
    let log_mel = mel_spectrogram(spectrum, sample_rate, n_fft, n_mels);
    let frames = log_mel.shape()[1];
    let mut out = Array2::<f64>::zeros((n_mfcc, frames));
    let dct_basis = dct_ii_basis(n_mels, n_mfcc);
    for f in 0..frames {
        let column: Array1<f64> = log_mel.index_axis(Axis(1), f).to_owned();
        let coeffs = dct_basis.dot(&column);
        out.column_mut(f).assign(&coeffs);
    }
    out
}

fn dct_ii_basis(n_in: usize, n_out: usize) -> Array2<f64> {
    let mut basis = Array2::<f64>::zeros((n_out, n_in));
    let scale0 = (1.0 / n_in as f64).sqrt();
    let scale = (2.0 / n_in as f64).sqrt();
    for k in 0..n_out {
        for n in 0..n_in {
            let angle = std::f64::consts::PI * (n as f64 + 0.5) * k as f64 / n_in as f64;
            basis[[k, n]] = angle.cos() * if k == 0 { scale0 } else { scale };
        }
    }
    basis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mel_filter_rows_have_nonzero_support() {
        let filter = mel_filter(22050, 2048, 40);
        assert_eq!(filter.shape(), &[40, 1025]);
        for row in filter.rows() {
            assert!(row.sum() > 0.0);
        }
    }

    #[test]
    fn mfcc_shape_matches_request() {
        let spectrum = Array2::<f64>::ones((1025, 6));
        let coeffs = mfcc(&spectrum, 22050, 2048, 40, 13);
        assert_eq!(coeffs.shape(), &[13, 6]);
    }
}
