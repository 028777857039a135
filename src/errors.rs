//! Error kinds for the analysis pipeline.
//!
//! Every stage is fail-closed to itself (see `cue::orchestrator` and
//! `analyzer`): a single feature or detector failing never aborts the whole
//! analysis. [`AnalysisError`] exists for the handful of places where there
//! really is nothing useful left to return (decode failure, a corrupt
//! feature bundle, a user-facing batch timeout).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("failed to open file: {0}")]
    FileOpenError(#[from] std::io::Error),
    #[error("failed to decode audio: {0}")]
    DecodeError(#[from] symphonia::core::errors::Error),
    #[error("failed to resample audio: {0}")]
    ResampleError(#[from] rubato::ResampleError),
    #[error("failed to create resampler: {0}")]
    ResamplerConstructionError(#[from] rubato::ResamplerConstructionError),
    #[error("no decodable audio stream was found in the file")]
    NoAudioStream,
    #[error("audio is shorter than the minimum analyzable duration (1.0s)")]
    InsufficientAudio,
    #[error("failure during analysis: {0}")]
    AnalysisError(String),
    #[error("samples are empty or too short")]
    EmptySamples,
    #[error("too many or too few features were produced by a stage")]
    InvalidFeaturesLen,
    #[error("a detection stage failed: {0}")]
    StageFailure(String),
    #[error("cue orchestrator rejected an input: {0}")]
    OrchestratorValidation(String),
    #[error("result cache is unavailable: {0}")]
    CacheUnavailable(String),
    #[error("analysis of '{0}' exceeded its timeout")]
    AnalysisTimeout(String),
    #[error("interrupted by signal {0}")]
    Interrupted(i32),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Stable error code for JSON-serialized, user-facing error records (spec §7).
impl AnalysisError {
    #[must_use]
    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::FileOpenError(_) => "FILE_OPEN_ERROR",
            Self::DecodeError(_) | Self::NoAudioStream => "DECODE_FAILURE",
            Self::ResampleError(_) | Self::ResamplerConstructionError(_) => "RESAMPLE_FAILURE",
            Self::InsufficientAudio => "INSUFFICIENT_AUDIO",
            Self::AnalysisError(_) | Self::EmptySamples | Self::InvalidFeaturesLen => {
                "FEATURE_COMPUTATION_FAILURE"
            }
            Self::StageFailure(_) => "STAGE_FAILURE",
            Self::OrchestratorValidation(_) => "ORCHESTRATOR_VALIDATION",
            Self::CacheUnavailable(_) => "CACHE_UNAVAILABLE",
            Self::AnalysisTimeout(_) => "ANALYSIS_TIMEOUT",
            Self::Interrupted(_) => "INTERRUPTED",
        }
    }
}

/// JSON-serializable error record, the only thing a failed analysis ever
/// surfaces to a caller (spec §7: "always returns either a complete result
/// or a single structured error record").
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorRecord {
    pub error: &'static str,
    pub message: String,
}

impl From<&AnalysisError> for ErrorRecord {
    fn from(e: &AnalysisError) -> Self {
        Self {
            error: e.code(),
            message: e.to_string(),
        }
    }
}
