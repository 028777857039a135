//! The Cue Orchestrator and Hot-Cue Assigner (spec §4.I, §4.J, components
//! I and J): the hardest part of the pipeline, merging every detector's
//! raw cue stream into one valid, musically-snapped, ordered sequence.

pub mod hotcue;
pub mod orchestrator;

/// Input contributed by an optional external intro/outro heuristic (spec
/// §4.I, §9; SPEC_FULL §E). Defaults to absent; when present its cues are
/// merged into the stream exactly like any detector's.
pub trait ExternalCueHeuristic: Send + Sync {
    fn detect(&self, duration: f64) -> Vec<crate::model::CuePoint>;
}
