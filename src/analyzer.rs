//! Analyzer Facade (spec §4.K, component K): drives every stage in order
//! and assembles the final [`AnalysisResult`].

use std::path::Path;
use std::time::Instant;

use log::{debug, info};

use crate::cache::ResultCache;
use crate::config::AnalyzerConfig;
use crate::cue::orchestrator::{self, OrchestratorInput};
use crate::cue::hotcue;
use crate::cue::ExternalCueHeuristic;
use crate::decoder::decode_with_fallback;
use crate::detect::energy_profile::LoudnessMeasurer;
use crate::detect::{beat, chorus, energy_gaps, energy_profile, key, structure, tempo};
use crate::errors::{AnalysisError, AnalysisResult};
use crate::features::{build_feature_bundle, FeatureBundle};
use crate::model::{AnalysisResult as Result_, AudioStats, CuePoint};

const WAVEFORM_POINTS: usize = 1500;
const PHRASE_THRESHOLDS: [f64; 3] = [0.30, 0.36, 0.46];
const LOOP_MIN_SIMILARITY_BASE: f64 = 0.64;

/// Options the Facade is constructed with.
pub struct Analyzer<'a> {
    pub config: &'a AnalyzerConfig,
    pub cache: Option<&'a dyn ResultCache>,
    pub external_cue_heuristic: Option<Box<dyn ExternalCueHeuristic>>,
    pub loudness: LoudnessMeasurer,
}

impl<'a> Analyzer<'a> {
    #[must_use]
    #[inline]
    pub fn new(config: &'a AnalyzerConfig) -> Self {
        Self {
            config,
            cache: None,
            external_cue_heuristic: None,
            loudness: LoudnessMeasurer::Present,
        }
    }

    /// Runs the full pipeline for one file. Always returns either a
    /// complete result or a single structured error (spec §7 fail-open).
    #[inline]
    pub fn analyze(&self, path: &Path) -> AnalysisResult<Result_> {
        let start = Instant::now();
        let file_path = path.to_string_lossy().to_string();

        if let Some(cache) = self.cache {
            if let Ok(meta) = std::fs::metadata(path) {
                if let Ok(modified) = meta.modified() {
                    let mtime = system_time_to_f64(modified);
                    if let Some(entry) = cache.get(&file_path, mtime) {
                        if let Ok(result) = serde_json::from_str::<Result_>(&entry.analysis_json) {
                            info!("cache hit for {file_path}");
                            return Ok(result);
                        }
                    }
                }
            }
        }

        let decoded = decode_with_fallback(path)?;
        let bundle = build_feature_bundle(&decoded.samples, decoded.sample_rate)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.stage_pool_size.get())
            .build()
            .map_err(|e| AnalysisError::StageFailure(e.to_string()))?;

        // jobs split so that the bpm-independent stages run alongside tempo
        // detection, then the bpm-dependent stages fan out together
        let (key_result, (bpm, structure)) = pool.install(|| {
            rayon::join(
                || key::detect_key(&bundle),
                || rayon::join(|| tempo::detect_tempo(&bundle), || structure::detect_structure(&bundle)),
            )
        });

        let (beat_grid, (chorus_cues, gap_cues)) = pool.install(|| {
            rayon::join(
                || beat::detect_beat_grid(&bundle, bpm),
                || {
                    rayon::join(
                        || chorus::detect_chorus_hook(&bundle, bpm),
                        || energy_gaps::detect_energy_gaps(&bundle, bpm),
                    )
                },
            )
        });

        let mut all_cues: Vec<CuePoint> = Vec::new();
        all_cues.extend(chorus_cues);
        all_cues.extend(gap_cues);
        all_cues.extend(structure_to_cues(&structure));
        if let Some(heuristic) = &self.external_cue_heuristic {
            all_cues.extend(heuristic.detect(bundle.duration));
        } else {
            trace_no_external_heuristic();
        }

        let orchestrated = orchestrator::orchestrate(OrchestratorInput {
            cues: all_cues,
            beat_times: beat_grid.beat_times.clone(),
            bpm,
            duration: bundle.duration,
            rms_curve: bundle.rms_512.clone(),
            rms_hop_seconds: f64::from(crate::dsp::DEFAULT_HOP) / f64::from(bundle.sample_rate),
        });

        debug!("orchestrator trace ({} decisions): {:?}", orchestrated.trace.entries.len(), orchestrated.trace.entries);

        let hotcues = hotcue::assign_hotcues(&orchestrated.cues, bundle.duration);
        let energy_analysis = energy_profile::compute_energy_profile(&bundle, &orchestrated.cues, &self.loudness);
        let waveform = generate_waveform(&decoded.samples);
        let (phrase_markers, loop_markers) = compute_phrase_and_loop_markers(&bundle);

        let rms_mean = if bundle.rms_512.is_empty() {
            0.0
        } else {
            bundle.rms_512.iter().copied().sum::<f32>() / bundle.rms_512.len() as f32
        };
        let audio_stats = AudioStats {
            peak_dbfs: crate::dsp::spectral::peak_dbfs(&decoded.samples),
            rms_dbfs: 20.0 * rms_mean.max(1e-9).log10(),
            zero_crossing_rate: crate::dsp::spectral::zero_crossing_rate(&decoded.samples),
        };

        let result = Result_ {
            file_path: file_path.clone(),
            duration: bundle.duration,
            sample_rate: bundle.sample_rate,
            waveform_data: waveform,
            audio_stats,
            key: key_result.camelot(),
            key_mode: key_result.mode_name().to_string(),
            key_confidence: key_result.confidence,
            bpm,
            cue_points: orchestrated.cues,
            song_structure: structure,
            energy_analysis,
            harmonic_mixing: Vec::new(),
            phrase_markers,
            loop_markers,
            downbeats: beat_grid.beat_times.iter().copied().step_by(4).collect(),
            hotcues,
            beatgrid: beat_grid,
            analysis_ms: start.elapsed().as_millis(),
        };

        if let Some(cache) = self.cache {
            if let Ok(meta) = std::fs::metadata(path) {
                if let Ok(modified) = meta.modified() {
                    let mtime = system_time_to_f64(modified);
                    if let Ok(json) = serde_json::to_string(&result) {
                        cache.set(crate::model::CacheEntry {
                            path: file_path,
                            mtime,
                            analysis_json: json,
                            waveform_blob: waveform_to_blob(&result.waveform_data),
                        });
                    }
                }
            }
        }

        Ok(result)
    }
}

fn trace_no_external_heuristic() {
    log::trace!("no external cue heuristic configured, skipping");
}

fn structure_to_cues(segments: &[crate::model::Segment]) -> Vec<CuePoint> {
    use crate::model::CueType;
    segments
        .iter()
        .filter_map(|s| {
            let kind = match s.kind.as_str() {
                "intro" => CueType::Intro,
                "outro" => CueType::Outro,
                "chorus" => CueType::Chorus,
                "breakdown" => CueType::Breakdown,
                "bridge" => CueType::Bridge,
                "build" => CueType::Build,
                "verse" => CueType::Verse,
                _ => return None,
            };
            Some(CuePoint {
                name: format!("{}_{}", s.kind, s.instance),
                kind,
                time: s.start,
                confidence: s.confidence,
                reason: "structure segment boundary".to_string(),
                stage: "structure".to_string(),
                instance: Some(s.instance),
            })
        })
        .collect()
}

fn generate_waveform(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let window = (samples.len() / WAVEFORM_POINTS).max(1);
    let raw: Vec<f32> = samples
        .chunks(window)
        .map(|chunk| (chunk.iter().map(|&x| x * x).sum::<f32>() / chunk.len() as f32).sqrt())
        .collect();
    let max = raw.iter().copied().fold(0.0_f32, f32::max).max(1e-9);
    raw.iter().map(|&v| v / max).collect()
}

fn waveform_to_blob(waveform: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(waveform.len() * 4);
    for &v in waveform {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn compute_phrase_and_loop_markers(bundle: &FeatureBundle) -> (Vec<f64>, Vec<(f64, f64)>) {
    let bar_sec = if bundle.tempo > 0.0 { 240.0 / bundle.tempo } else { 2.0 };
    let mfcc_novelty = mfcc_novelty_curve(&bundle.mfcc_512);

    let mut phrase_markers = Vec::new();
    for (bars, threshold) in [(8usize, PHRASE_THRESHOLDS[0]), (16, PHRASE_THRESHOLDS[1]), (32, PHRASE_THRESHOLDS[2])] {
        let period = bar_sec * bars as f64;
        let mut t = period;
        while t < bundle.duration {
            if novelty_at(&mfcc_novelty, t, bundle).map_or(false, |n| n >= threshold) {
                phrase_markers.push(t);
            }
            t += period;
        }
    }
    phrase_markers.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let loop_markers = find_loop_markers(bundle, bar_sec);
    (phrase_markers, loop_markers)
}

fn mfcc_novelty_curve(mfcc: &ndarray::Array2<f64>) -> Vec<f32> {
    let n = mfcc.shape()[1];
    if n < 2 {
        return vec![0.0; n];
    }
    let mut out = vec![0.0f32; n];
    for i in 1..n {
        let prev = mfcc.column(i - 1);
        let cur = mfcc.column(i);
        let dist: f64 = prev.iter().zip(cur.iter()).map(|(&a, &b)| (a - b).powi(2)).sum::<f64>().sqrt();
        out[i] = dist as f32;
    }
    let max = out.iter().copied().fold(0.0_f32, f32::max).max(1e-9);
    out.iter().map(|&v| v / max).collect()
}

fn novelty_at(novelty: &[f32], time: f64, bundle: &FeatureBundle) -> Option<f32> {
    let frame_duration = f64::from(crate::dsp::DEFAULT_HOP) / f64::from(bundle.sample_rate);
    let idx = (time / frame_duration) as usize;
    novelty.get(idx).copied()
}

fn find_loop_markers(bundle: &FeatureBundle, bar_sec: f64) -> Vec<(f64, f64)> {
    let Some(chroma_matrix) = &bundle.chroma_512 else {
        return Vec::new();
    };
    let n_frames = chroma_matrix.shape()[1];
    let hop = crate::dsp::DEFAULT_HOP;
    let frame_duration = f64::from(hop) / f64::from(bundle.sample_rate);
    let bar_len = bar_sec;
    let bar_frames = (bar_len / frame_duration).max(1.0) as usize;

    let mut candidates: Vec<(f64, f64, f64)> = Vec::new();
    let mut start = 0usize;
    while start + bar_frames * 2 <= n_frames {
        let half1 = chroma_matrix.slice(ndarray::s![.., start..start + bar_frames]).mean_axis(ndarray::Axis(1));
        let half2 = chroma_matrix
            .slice(ndarray::s![.., start + bar_frames..start + 2 * bar_frames])
            .mean_axis(ndarray::Axis(1));
        if let (Some(a), Some(b)) = (half1, half2) {
            let sim = cosine(&a, &b);
            let threshold = LOOP_MIN_SIMILARITY_BASE + bar_len / 100.0;
            if sim >= threshold {
                let t0 = start as f64 * frame_duration;
                let t1 = (start + 2 * bar_frames) as f64 * frame_duration;
                candidates.push((t0, t1, sim));
            }
        }
        start += bar_frames;
    }

    candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap());
    let mut selected: Vec<(f64, f64)> = Vec::new();
    for (t0, t1, _) in candidates {
        if selected.iter().any(|&(s, e)| t0 < e && t1 > s) {
            continue;
        }
        selected.push((t0, t1));
        if selected.len() >= 8 {
            break;
        }
    }
    selected.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
    selected
}

fn cosine(a: &ndarray::Array1<f64>, b: &ndarray::Array1<f64>) -> f64 {
    let dot = a.dot(b);
    let norm_a = a.dot(a).sqrt();
    let norm_b = b.dot(b).sqrt();
    if norm_a < 1e-12 || norm_b < 1e-12 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn system_time_to_f64(t: std::time::SystemTime) -> f64 {
    t.duration_since(std::time::UNIX_EPOCH).map_or(0.0, |d| d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waveform_is_bounded_and_decimated() {
        let samples: Vec<f32> = (0..100_000).map(|i| (i as f32 * 0.001).sin()).collect();
        let waveform = generate_waveform(&samples);
        assert!(waveform.len() <= WAVEFORM_POINTS + 1);
        assert!(waveform.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }
}
