//! Signal-processing primitives the detection stages build on.
//!
//! Each submodule is a small, direct port of one `librosa`-equivalent
//! routine, following the pattern already established in the upstream
//! `chroma`/`utils` modules this crate grew out of: own the math, keep it
//! frame-wise, and let the higher-level `detect` stages decide what to do
//! with the resulting time series.

pub mod beat;
pub mod chroma;
pub mod fft;
pub mod hpss;
pub mod mel;
pub mod onset;
pub mod spectral;

/// Analysis sample rate all decoded audio is resampled to before any
/// feature extraction runs (spec §1).
pub const SAMPLE_RATE: u32 = 22050;

/// Default STFT window used by most frame-wise features.
pub const DEFAULT_N_FFT: usize = 2048;
pub const DEFAULT_HOP: usize = 512;
