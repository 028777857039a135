//! Frame-wise spectral descriptors: RMS, spectral centroid, flatness and
//! contrast. Unlike the teacher crate's `timbral.rs` (which only ever
//! needed a track-wide mean/std pair for an embedding vector), every stage
//! downstream here needs the full time series, so these operate on a
//! magnitude STFT and return one value per frame.

use ndarray::{Array1, Array2, Axis};

use super::fft::{geometric_mean, mean};

/// Per-frame RMS computed directly from raw samples (`window`, `hop`).
#[must_use]
#[inline]
pub fn rms(signal: &[f32], window: usize, hop: usize) -> Vec<f32> {
    if signal.is_empty() || window == 0 || hop == 0 {
        return Vec::new();
    }
    signal
        .windows(window.min(signal.len()))
        .step_by(hop)
        .map(|w| (w.iter().map(|&x| x * x).sum::<f32>() / w.len() as f32).sqrt())
        .collect()
}

/// Per-frame RMS derived from a magnitude STFT (`freq_bins x frames`),
/// used when we already have the spectrogram and want to avoid recomputing
/// one directly from samples.
#[must_use]
#[inline]
pub fn rms_from_stft(spectrum: &Array2<f64>, n_fft: usize) -> Vec<f32> {
    spectrum
        .axis_iter(Axis(1))
        .map(|col| {
            let energy: f64 = col.iter().map(|&m| m * m).sum::<f64>() * 2.0 / (n_fft as f64).powi(2);
            energy.sqrt() as f32
        })
        .collect()
}

/// Spectral centroid (Hz) per frame: the energy-weighted mean frequency.
#[must_use]
#[inline]
pub fn spectral_centroid(spectrum: &Array2<f64>, sample_rate: u32, n_fft: usize) -> Vec<f32> {
    let freqs: Vec<f64> = (0..spectrum.shape()[0])
        .map(|i| i as f64 * f64::from(sample_rate) / n_fft as f64)
        .collect();
    spectrum
        .axis_iter(Axis(1))
        .map(|col| {
            let total: f64 = col.sum();
            if total < 1e-12 {
                return 0.0;
            }
            let weighted: f64 = col.iter().zip(freqs.iter()).map(|(&m, &f)| m * f).sum();
            (weighted / total) as f32
        })
        .collect()
}

/// Spectral flatness per frame: geometric mean / arithmetic mean of the
/// magnitude spectrum, in `[0, 1]`. Distinguishes tonal content (low) from
/// noise-like content (high).
#[must_use]
#[inline]
pub fn spectral_flatness(spectrum: &Array2<f64>) -> Vec<f32> {
    spectrum
        .axis_iter(Axis(1))
        .map(|col| {
            let values: Vec<f64> = col.iter().map(|&x| x.max(1e-12)).collect();
            let gm = geometric_mean(&values);
            let am: f64 = values.iter().sum::<f64>() / values.len().max(1) as f64;
            if am < 1e-12 {
                0.0
            } else {
                (gm / am).clamp(0.0, 1.0) as f32
            }
        })
        .collect()
}

/// Octave-spaced sub-band contrast (peak-valley energy difference in dB),
/// one row per sub-band, mirroring `librosa.feature.spectral_contrast`'s
/// default six bands. Used by the chorus/hook stage (spec §4.F).
#[must_use]
#[inline]
pub fn spectral_contrast(spectrum: &Array2<f64>, sample_rate: u32, n_fft: usize, n_bands: usize) -> Array2<f64> {
    let n_bins = spectrum.shape()[0];
    let n_frames = spectrum.shape()[1];
    let mut out = Array2::<f64>::zeros((n_bands, n_frames));
    if n_bins < 2 || n_frames == 0 {
        return out;
    }
    let fmin = 200.0_f64;
    let nyquist = f64::from(sample_rate) / 2.0;
    // band edges spaced octaves apart starting at fmin
    let mut edges = vec![0.0];
    let mut f = fmin;
    for _ in 0..n_bands {
        edges.push(f.min(nyquist));
        f *= 2.0;
    }
    edges.push(nyquist);

    let bin_hz = f64::from(sample_rate) / n_fft as f64;
    for band in 0..n_bands {
        let lo = (edges[band] / bin_hz).floor() as usize;
        let hi = ((edges[band + 1] / bin_hz).ceil() as usize).clamp(lo + 1, n_bins);
        let quantile_idx = ((hi - lo) as f64 * 0.02).ceil().max(1.0) as usize;
        for (frame_idx, col) in spectrum.axis_iter(Axis(1)).enumerate() {
            let mut band_vals: Vec<f64> = col.slice(ndarray::s![lo..hi]).iter().copied().collect();
            band_vals.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let valley = mean_of(&band_vals[..quantile_idx.min(band_vals.len())]);
            let peak = mean_of(&band_vals[band_vals.len().saturating_sub(quantile_idx)..]);
            out[[band, frame_idx]] = (peak.max(1e-12) / valley.max(1e-12)).log10() * 20.0;
        }
    }
    out
}

fn mean_of(v: &[f64]) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        v.iter().sum::<f64>() / v.len() as f64
    }
}

/// Zero-crossing rate over the whole signal (kept from the teacher's
/// `timbral.rs`/`utils.rs`, used only as an ambient diagnostic field in
/// `AudioStats`, not part of any detector vote).
#[must_use]
#[inline]
pub fn zero_crossing_rate(signal: &[f32]) -> f32 {
    if signal.is_empty() {
        return 0.0;
    }
    let mut crossings = 0u32;
    let mut was_positive = signal[0] > 0.0;
    for &s in signal {
        let is_positive = s > 0.0;
        if was_positive != is_positive {
            crossings += 1;
            was_positive = is_positive;
        }
    }
    crossings as f32 / signal.len() as f32
}

#[must_use]
#[inline]
pub fn peak_dbfs(signal: &[f32]) -> f32 {
    let peak = signal.iter().fold(0.0_f32, |acc, &x| acc.max(x.abs()));
    20.0 * peak.max(1e-9).log10()
}

#[inline]
pub(crate) fn to_array1(v: &[f32]) -> Array1<f64> {
    v.iter().map(|&x| f64::from(x)).collect()
}

#[inline]
pub(crate) fn mean_f64(v: &[f32]) -> f32 {
    mean(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        let signal = vec![0.0f32; 2048];
        let frames = rms(&signal, 1024, 512);
        assert!(frames.iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn flatness_of_flat_spectrum_is_near_one() {
        let spectrum = Array2::<f64>::ones((100, 3));
        let flatness = spectral_flatness(&spectrum);
        for f in flatness {
            assert!((f - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn zcr_bounds() {
        let signal: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let zcr = zero_crossing_rate(&signal);
        assert!(zcr > 0.9);
    }
}
