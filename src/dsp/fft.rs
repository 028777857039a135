//! Low-level spectral primitives: reflect padding, the short-time Fourier
//! transform, and a few numeric helpers shared by the feature extractors.
//!
//! These are, like the teacher crate's `utils.rs`, more-or-less direct Rust
//! ports of the equivalent `librosa` routines: https://librosa.org.

use ndarray::{arr1, s, Array, Array2};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::f32::consts::PI;

#[must_use]
#[inline]
pub fn reflect_pad(array: &[f32], pad: usize) -> Vec<f32> {
    if array.len() <= pad {
        // too short to reflect losslessly; fall back to edge padding
        let mut out = vec![array.first().copied().unwrap_or(0.0); pad];
        out.extend_from_slice(array);
        out.extend(vec![array.last().copied().unwrap_or(0.0); pad]);
        return out;
    }
    let prefix = array[1..=pad].iter().rev().copied().collect::<Vec<f32>>();
    let suffix = array[(array.len() - 2) - pad + 1..array.len() - 1]
        .iter()
        .rev()
        .copied()
        .collect::<Vec<f32>>();
    let mut output = Vec::with_capacity(prefix.len() + array.len() + suffix.len());
    output.extend(prefix);
    output.extend(array);
    output.extend(suffix);
    output
}

/// Magnitude STFT of `signal`, shape `(window_length / 2 + 1, n_frames)`.
///
/// Frames are centered (reflect-padded) the way `librosa.stft` defaults to,
/// so `frame i` is centered at sample `i * hop_length`.
#[must_use]
#[inline]
pub fn stft(signal: &[f32], window_length: usize, hop_length: usize) -> Array2<f64> {
    if signal.len() < window_length || hop_length == 0 {
        return Array2::zeros((window_length / 2 + 1, 0));
    }
    let mut out = Array2::zeros((signal.len().div_ceil(hop_length), window_length / 2 + 1));
    let padded = reflect_pad(signal, window_length / 2);

    let mut hann_window = Array::zeros(window_length + 1);
    for n in 0..window_length {
        #[allow(clippy::cast_precision_loss)]
        let phase = 2. * n as f32 * PI / (window_length as f32);
        hann_window[[n]] = 0.5f32.mul_add(-f32::cos(phase), 0.5);
    }
    let hann_window = hann_window.slice_move(s![0..window_length]);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(window_length);

    for (window, mut col) in padded
        .windows(window_length)
        .step_by(hop_length)
        .zip(out.rows_mut())
    {
        let mut buf = (arr1(window) * &hann_window).mapv(|x| Complex::new(x, 0.));
        if let Some(s) = buf.as_slice_mut() {
            fft.process(s);
        } else {
            let mut v = buf.to_vec();
            fft.process(&mut v);
            buf = Array::from(v);
        }
        col.assign(
            &buf.slice(s![..=window_length / 2])
                .mapv(|x| f64::from(x.re.hypot(x.im))),
        );
    }
    out.permuted_axes((1, 0))
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
#[inline]
pub fn mean(input: &[f32]) -> f32 {
    if input.is_empty() {
        return 0.;
    }
    input.iter().sum::<f32>() / input.len() as f32
}

/// Only meaningful for strictly positive input; values outside `(0, 2^65]`
/// will not reflect a true geometric mean.
#[must_use]
#[inline]
pub fn geometric_mean(input: &[f64]) -> f64 {
    if input.is_empty() {
        return 0.0;
    }
    let log_sum: f64 = input.iter().map(|&x| x.max(1e-12).ln()).sum();
    #[allow(clippy::cast_precision_loss)]
    (log_sum / input.len() as f64).exp()
}

#[inline]
pub(crate) fn hz_to_octs_inplace(frequencies: &mut ndarray::Array1<f64>, tuning: f64, bins_per_octave: u32) {
    let a440 = 440.0 * (tuning / f64::from(bins_per_octave)).exp2();
    *frequencies /= a440 / 16.;
    frequencies.mapv_inplace(f64::log2);
}

/// Convert STFT frame indices to times in seconds.
#[must_use]
#[inline]
pub fn frames_to_time(frames: &[usize], sr: u32, hop_length: usize) -> Vec<f64> {
    frames
        .iter()
        .map(|&f| (f * hop_length) as f64 / f64::from(sr))
        .collect()
}

/// Convert times in seconds to the nearest STFT frame index.
#[must_use]
#[inline]
pub fn times_to_frames(times: &[f64], sr: u32, hop_length: usize) -> Vec<usize> {
    times
        .iter()
        .map(|&t| ((t * f64::from(sr)) / hop_length as f64).round().max(0.0) as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflect_pad_mirrors_edges() {
        let array: Vec<f32> = (0..10).map(|x| x as f32).collect();
        let out = reflect_pad(&array, 3);
        assert_eq!(&out[..3], &[3.0, 2.0, 1.0]);
        assert_eq!(&out[3..13], array.as_slice());
        assert_eq!(&out[13..16], &[8.0, 7.0, 6.0]);
    }

    #[test]
    fn mean_of_empty_is_zero() {
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn geometric_mean_constant_input() {
        let v = vec![2.0; 8];
        assert!((geometric_mean(&v) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn stft_shape_matches_hop_count() {
        let signal: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.01).sin()).collect();
        let spec = stft(&signal, 512, 256);
        assert_eq!(spec.shape()[0], 257);
        assert!(spec.shape()[1] > 0);
    }

    #[test]
    fn frame_time_roundtrip() {
        let times = [0.0, 1.0, 2.5];
        let frames = times_to_frames(&times, 22050, 512);
        let back = frames_to_time(&frames, 22050, 512);
        for (a, b) in times.iter().zip(back.iter()) {
            assert!((a - b).abs() < 0.03);
        }
    }
}
