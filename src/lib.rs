//! DJ-grade music analysis core: key, tempo, beat grid, structure, and
//! cue-point detection for a single audio track.
//!
//! The pipeline (spec §1, §4) is a fixed sequence of stages, each reading a
//! shared [`features::FeatureBundle`] computed once per track:
//! decode → feature extraction → detection (key, tempo, beat, structure,
//! chorus/hook, energy gaps, energy profile) → cue orchestration → hot-cue
//! assignment → phrase/loop markers → caching. [`analyzer::Analyzer`] is
//! the single entry point that drives all of it.

#![deny(clippy::missing_inline_in_public_items)]

pub mod analyzer;
pub mod batch;
pub mod cache;
pub mod config;
pub mod cue;
pub mod decoder;
pub mod detect;
pub mod dsp;
pub mod errors;
pub mod features;
pub mod model;

pub use analyzer::Analyzer;
pub use batch::{BatchItemResult, BatchProgress, BatchReport, BatchRunner};
pub use config::AnalyzerConfig;
pub use errors::{AnalysisError, AnalysisResult, ErrorRecord};
pub use model::{AnalysisResult as Analysis, CuePoint, CueType, QuickAnalysisResult};
