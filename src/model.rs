//! The data model shared across every stage (spec §3).

use serde::{Deserialize, Serialize};

/// A single point of interest in the track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CuePoint {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CueType,
    pub time: f64,
    pub confidence: f64,
    pub reason: String,
    pub stage: String,
    pub instance: Option<u32>,
}

/// Closed set of cue types (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CueType {
    Intro,
    Outro,
    Drop,
    Chorus,
    Hook,
    Breakdown,
    Bridge,
    Build,
    PreChorus,
    Vocal,
    Verse,
    Phrase,
    Section,
}

impl CueType {
    /// Priority-ladder rank used by the orchestrator's conflict window
    /// (spec §4.I); lower is higher priority.
    #[must_use]
    #[inline]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Drop => 0,
            Self::Outro => 1,
            Self::Chorus | Self::Hook => 2,
            Self::Breakdown => 3,
            Self::Build => 4,
            Self::Bridge => 5,
            Self::PreChorus => 6,
            Self::Intro => 7,
            Self::Vocal => 8,
            Self::Section => 9,
            Self::Verse | Self::Phrase => 10,
        }
    }

    /// Types that get bar-snapped rather than beat-snapped (spec §4.I).
    #[must_use]
    #[inline]
    pub const fn bar_snapped(self) -> bool {
        matches!(self, Self::Intro | Self::Outro | Self::Drop | Self::Breakdown)
    }

    #[must_use]
    #[inline]
    pub const fn snap_eligible(self) -> bool {
        self.bar_snapped() || matches!(self, Self::Chorus | Self::Hook | Self::Bridge | Self::Build)
    }
}

/// A contiguous structural region (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Segment {
    #[serde(rename = "type")]
    pub kind: String,
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    pub instance: u32,
    pub energy: f64,
    pub confidence: f64,
    pub repeat_group: Option<String>,
}

/// One slot of the hot-cue bank.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HotCueSlot {
    pub slot: char,
    pub cue: CuePoint,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HotCueAssignment {
    pub slots: Vec<HotCueSlot>,
}

/// Energy value in `[1.0, 10.0]` at a point in time, used by both the
/// segment-aligned profile and the continuous curve (spec §4.H).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EnergyPoint {
    pub time: f64,
    pub energy: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EnergyAnalysis {
    pub per_cue: Vec<EnergyPoint>,
    pub curve: Vec<EnergyPoint>,
    pub lufs_curve: Vec<EnergyPoint>,
    pub integrated_lufs: Option<f64>,
    pub gain_to_target: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioStats {
    pub peak_dbfs: f32,
    pub rms_dbfs: f32,
    pub zero_crossing_rate: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BeatGrid {
    pub beat_times: Vec<f64>,
    pub first_strong_beat: f64,
    pub bpm: u32,
}

/// Full analysis output (spec §3). `--quick` mode (spec §6) emits only the
/// subset relevant fields, constructed via [`AnalysisResult::quick`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub file_path: String,
    pub duration: f64,
    pub sample_rate: u32,
    pub waveform_data: Vec<f32>,
    pub audio_stats: AudioStats,
    pub key: String,
    pub key_mode: String,
    pub key_confidence: f64,
    pub bpm: u32,
    pub cue_points: Vec<CuePoint>,
    pub song_structure: Vec<Segment>,
    pub energy_analysis: EnergyAnalysis,
    pub harmonic_mixing: Vec<String>,
    pub phrase_markers: Vec<f64>,
    pub loop_markers: Vec<(f64, f64)>,
    pub downbeats: Vec<f64>,
    pub hotcues: HotCueAssignment,
    pub beatgrid: BeatGrid,
    pub analysis_ms: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickAnalysisResult {
    pub bpm: u32,
    pub key: String,
    pub key_confidence: f64,
    pub waveform_data: Vec<f32>,
    pub duration: f64,
    pub sample_rate: u32,
}

impl AnalysisResult {
    #[must_use]
    #[inline]
    pub fn quick(&self) -> QuickAnalysisResult {
        QuickAnalysisResult {
            bpm: self.bpm,
            key: self.key.clone(),
            key_confidence: self.key_confidence,
            waveform_data: self.waveform_data.clone(),
            duration: self.duration,
            sample_rate: self.sample_rate,
        }
    }
}

/// The cached counterpart of an [`AnalysisResult`] (spec §3/§4.L). The
/// waveform is split out as its own little-endian float32 blob so the
/// cache can store/retrieve it without round-tripping through JSON.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub path: String,
    pub mtime: f64,
    pub analysis_json: String,
    pub waveform_blob: Vec<u8>,
}
