//! Cue Orchestrator (spec §4.I, component I).

use log::trace;

use crate::model::{CuePoint, CueType};

/// Textual trace of every merge/replace/snap/synthesis/discard decision
/// (spec §4.I "Logging"), kept alongside the normal log output.
#[derive(Debug, Default, Clone)]
pub struct OrchestratorTrace {
    pub entries: Vec<String>,
}

impl OrchestratorTrace {
    fn push(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        trace!("orchestrator: {msg}");
        self.entries.push(msg);
    }
}

pub struct OrchestratorInput {
    pub cues: Vec<CuePoint>,
    pub beat_times: Vec<f64>,
    pub bpm: u32,
    pub duration: f64,
    pub rms_curve: Vec<f32>,
    pub rms_hop_seconds: f64,
}

pub struct OrchestratorOutput {
    pub cues: Vec<CuePoint>,
    pub trace: OrchestratorTrace,
}

/// Runs the full orchestration pipeline (spec §4.I). Never panics and
/// never emits an invalid cue; invalid input is dropped with a trace
/// entry (fail-closed to validity per spec §7).
#[must_use]
#[inline]
pub fn orchestrate(input: OrchestratorInput) -> OrchestratorOutput {
    let mut trace_log = OrchestratorTrace::default();
    let bar_sec = if input.bpm > 0 { 240.0 / f64::from(input.bpm) } else { 2.0 };

    let mut cues = standardize(input.cues, input.duration, &mut trace_log);
    synthesize_defaults(&mut cues, &input, &mut trace_log);
    apply_ordering_validity(&mut cues, bar_sec, &mut trace_log);

    cues.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap());
    let merged = resolve_conflicts(cues, bar_sec, &mut trace_log);

    let mut snapped = snap_all(merged, &input.beat_times, bar_sec, &mut trace_log);
    snapped.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap());
    let deduped = final_dedup(snapped, input.duration, bar_sec, &mut trace_log);

    OrchestratorOutput {
        cues: deduped,
        trace: trace_log,
    }
}

fn standardize(cues: Vec<CuePoint>, duration: f64, trace_log: &mut OrchestratorTrace) -> Vec<CuePoint> {
    cues.into_iter()
        .filter(|c| {
            let valid_time = c.time.is_finite() && c.time >= 0.0 && c.time <= duration;
            if !valid_time {
                trace_log.push(format!("discard {} invalid time {}", c.name, c.time));
                return false;
            }
            if matches!(c.kind, CueType::Breakdown | CueType::Bridge) && c.time < 8.0 {
                trace_log.push(format!("discard {} ({}s < 8s minimum)", c.name, c.time));
                return false;
            }
            true
        })
        .collect()
}

fn synthesize_defaults(cues: &mut Vec<CuePoint>, input: &OrchestratorInput, trace_log: &mut OrchestratorTrace) {
    if !cues.iter().any(|c| c.kind == CueType::Intro) {
        let time = synth_intro_time(input);
        trace_log.push(format!("synthesize intro at {time:.2}s"));
        cues.push(standard_cue(CueType::Intro, "intro", time, 0.5, "synthesized structural default"));
    }
    if !cues.iter().any(|c| c.kind == CueType::Outro) {
        let time = synth_outro_time(input);
        trace_log.push(format!("synthesize outro at {time:.2}s"));
        cues.push(standard_cue(CueType::Outro, "outro", time, 0.5, "synthesized structural default"));
    }
}

fn synth_intro_time(input: &OrchestratorInput) -> f64 {
    let p80 = percentile(&input.rms_curve, 80.0);
    let threshold = 0.1 * p80;
    for (i, &r) in input.rms_curve.iter().enumerate() {
        if r > threshold {
            let time = i as f64 * input.rms_hop_seconds;
            return snap_to_nearest_bar(time, if input.bpm > 0 { 240.0 / f64::from(input.bpm) } else { 2.0 });
        }
    }
    0.0
}

fn synth_outro_time(input: &OrchestratorInput) -> f64 {
    let p80 = percentile(&input.rms_curve, 80.0);
    let threshold = 0.15 * p80;
    let start_idx = ((0.60 * input.duration) / input.rms_hop_seconds) as usize;
    for (i, &r) in input.rms_curve.iter().enumerate().skip(start_idx) {
        if r < threshold {
            let time = i as f64 * input.rms_hop_seconds;
            return snap_to_nearest_bar(time, if input.bpm > 0 { 240.0 / f64::from(input.bpm) } else { 2.0 });
        }
    }
    (input.duration - 12.0).max(0.0)
}

fn percentile(values: &[f32], pct: f64) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let idx = ((pct / 100.0) * (v.len() - 1) as f64).round() as usize;
    v[idx.min(v.len() - 1)]
}

fn standard_cue(kind: CueType, name: &str, time: f64, confidence: f64, reason: &str) -> CuePoint {
    CuePoint {
        name: name.to_string(),
        kind,
        time,
        confidence,
        reason: reason.to_string(),
        stage: "orchestrator".to_string(),
        instance: None,
    }
}

fn apply_ordering_validity(cues: &mut [CuePoint], bar_sec: f64, trace_log: &mut OrchestratorTrace) {
    let Some(intro_time) = cues.iter().find(|c| c.kind == CueType::Intro).map(|c| c.time) else {
        return;
    };
    for cue in cues.iter_mut() {
        if cue.kind == CueType::Drop && cue.time <= intro_time + bar_sec {
            let new_time = intro_time + bar_sec + 0.1;
            trace_log.push(format!("push drop from {:.2}s to {new_time:.2}s (too close to intro)", cue.time));
            cue.time = new_time;
        }
        if cue.kind == CueType::Outro && cue.time <= intro_time + bar_sec {
            let new_time = intro_time + bar_sec + 4.0;
            trace_log.push(format!("push outro from {:.2}s to {new_time:.2}s (too close to intro)", cue.time));
            cue.time = new_time;
        }
    }
}

fn resolve_conflicts(cues: Vec<CuePoint>, bar_sec: f64, trace_log: &mut OrchestratorTrace) -> Vec<CuePoint> {
    let window = (2.0 * bar_sec).clamp(3.0, 10.0);
    let mut accepted: Vec<CuePoint> = Vec::with_capacity(cues.len());

    for c in cues {
        let Some(last) = accepted.last().cloned() else {
            accepted.push(c);
            continue;
        };
        if (c.time - last.time).abs() >= window {
            accepted.push(c);
            continue;
        }
        let types = (c.kind, last.kind);
        if matches!(types, (CueType::Drop, CueType::Outro) | (CueType::Outro, CueType::Drop)) {
            let mut drop = if c.kind == CueType::Drop { c.clone() } else { last.clone() };
            let mut outro = if c.kind == CueType::Outro { c.clone() } else { last.clone() };
            if outro.time <= drop.time {
                outro.time = drop.time + 0.5;
            } else if drop.time >= outro.time {
                drop.time = outro.time - 0.5;
            }
            trace_log.push(format!("keep both drop@{:.2}s and outro@{:.2}s, forced separation", drop.time, outro.time));
            accepted.pop();
            accepted.push(drop);
            accepted.push(outro);
            continue;
        }
        if c.confidence > 0.75 && last.confidence <= 0.75 {
            trace_log.push(format!("replace {} with higher-confidence {}", last.name, c.name));
            accepted.pop();
            accepted.push(c);
            continue;
        }
        if last.confidence > 0.75 && c.confidence <= 0.75 {
            trace_log.push(format!("drop {} in favor of higher-confidence {}", c.name, last.name));
            continue;
        }
        if c_wins_on_priority(&c, &last) {
            trace_log.push(format!("replace {} with higher-priority {}", last.name, c.name));
            accepted.pop();
            accepted.push(c);
        } else {
            trace_log.push(format!("keep {} over lower-priority {}", last.name, c.name));
        }
    }
    accepted
}

fn c_wins_on_priority(c: &CuePoint, k: &CuePoint) -> bool {
    let (pc, pk) = (c.kind.priority(), k.kind.priority());
    if pc != pk {
        pc < pk
    } else if (c.confidence - k.confidence).abs() > 1e-9 {
        c.confidence > k.confidence
    } else {
        c.time < k.time
    }
}

fn snap_all(cues: Vec<CuePoint>, beat_times: &[f64], bar_sec: f64, trace_log: &mut OrchestratorTrace) -> Vec<CuePoint> {
    cues.into_iter()
        .map(|mut c| {
            if !c.kind.snap_eligible() {
                return c;
            }
            let original = c.time;
            if c.kind.bar_snapped() {
                let bar_snapped = snap_to_nearest_bar(c.time, bar_sec);
                if (bar_snapped - original).abs() < 2.0 {
                    c.time = bar_snapped;
                } else {
                    c.time = snap_to_nearest_beat(c.time, beat_times);
                }
            } else {
                c.time = snap_to_nearest_beat(c.time, beat_times);
            }
            if (c.time - original).abs() > 1e-6 {
                trace_log.push(format!("snap {} from {:.2}s to {:.2}s", c.name, original, c.time));
            }
            c
        })
        .collect()
}

fn snap_to_nearest_bar(time: f64, bar_sec: f64) -> f64 {
    if bar_sec <= 0.0 {
        return time;
    }
    (time / bar_sec).round() * bar_sec
}

fn snap_to_nearest_beat(time: f64, beat_times: &[f64]) -> f64 {
    if beat_times.is_empty() {
        return time;
    }
    *beat_times
        .iter()
        .min_by(|a, b| (**a - time).abs().partial_cmp(&(**b - time).abs()).unwrap())
        .unwrap_or(&time)
}

fn final_dedup(cues: Vec<CuePoint>, duration: f64, bar_sec: f64, trace_log: &mut OrchestratorTrace) -> Vec<CuePoint> {
    let spacing = (2.0 * bar_sec).clamp(3.0, 10.0);
    let mut out: Vec<CuePoint> = Vec::with_capacity(cues.len());
    for mut c in cues {
        c.time = c.time.clamp(0.0, (duration - 1e-6).max(0.0));
        if let Some(last) = out.last() {
            if (c.time - last.time).abs() < spacing {
                let types = (c.kind, last.kind);
                if matches!(types, (CueType::Drop, CueType::Outro) | (CueType::Outro, CueType::Drop)) {
                    let mut drop = if c.kind == CueType::Drop { c.clone() } else { last.clone() };
                    let mut outro = if c.kind == CueType::Outro { c.clone() } else { last.clone() };
                    if outro.time <= drop.time {
                        outro.time = (drop.time + 0.5).clamp(0.0, (duration - 1e-6).max(0.0));
                    } else if drop.time >= outro.time {
                        drop.time = (outro.time - 0.5).clamp(0.0, (duration - 1e-6).max(0.0));
                    }
                    trace_log.push(format!(
                        "dedup pass: keep both drop@{:.2}s and outro@{:.2}s, forced separation",
                        drop.time, outro.time
                    ));
                    out.pop();
                    out.push(drop);
                    out.push(outro);
                    continue;
                }
                if c.confidence > last.confidence {
                    trace_log.push(format!("dedup: drop {} for higher-confidence {}", last.name, c.name));
                    out.pop();
                    out.push(c);
                } else {
                    trace_log.push(format!("dedup: drop {} (within {spacing:.1}s of {})", c.name, last.name));
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(kind: CueType, time: f64, conf: f64) -> CuePoint {
        CuePoint {
            name: format!("{kind}"),
            kind,
            time,
            confidence: conf,
            reason: String::new(),
            stage: "test".to_string(),
            instance: None,
        }
    }

    #[test]
    fn synthesizes_intro_and_outro_when_missing() {
        let input = OrchestratorInput {
            cues: vec![cue(CueType::Chorus, 50.0, 0.9)],
            beat_times: (0..200).map(|i| f64::from(i) * 0.5).collect(),
            bpm: 120,
            duration: 100.0,
            rms_curve: vec![0.5; 200],
            rms_hop_seconds: 0.5,
        };
        let out = orchestrate(input);
        assert!(out.cues.iter().any(|c| c.kind == CueType::Intro));
        assert!(out.cues.iter().any(|c| c.kind == CueType::Outro));
    }

    #[test]
    fn invalid_times_are_dropped() {
        let input = OrchestratorInput {
            cues: vec![cue(CueType::Chorus, -5.0, 0.9), cue(CueType::Chorus, 200.0, 0.9)],
            beat_times: vec![],
            bpm: 120,
            duration: 100.0,
            rms_curve: vec![0.5; 50],
            rms_hop_seconds: 1.0,
        };
        let out = orchestrate(input);
        assert!(out.cues.iter().all(|c| c.time <= 100.0 && c.time >= 0.0));
    }

    #[test]
    fn drop_and_outro_both_survive_with_forced_separation() {
        use pretty_assertions::assert_eq;

        let input = OrchestratorInput {
            cues: vec![
                cue(CueType::Intro, 0.0, 0.8),
                cue(CueType::Drop, 60.0, 0.9),
                cue(CueType::Outro, 60.2, 0.9),
            ],
            beat_times: (0..400).map(|i| f64::from(i) * 0.5).collect(),
            bpm: 120,
            duration: 120.0,
            rms_curve: vec![0.5; 240],
            rms_hop_seconds: 0.5,
        };
        let out = orchestrate(input);
        let kinds: Vec<CueType> = out.cues.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![CueType::Intro, CueType::Drop, CueType::Outro]);
        let drop_time = out.cues.iter().find(|c| c.kind == CueType::Drop).unwrap().time;
        let outro_time = out.cues.iter().find(|c| c.kind == CueType::Outro).unwrap().time;
        assert!(outro_time > drop_time);
    }

    #[test]
    fn deduplication_respects_spacing() {
        let input = OrchestratorInput {
            cues: vec![cue(CueType::Verse, 40.0, 0.6), cue(CueType::Section, 41.0, 0.9)],
            beat_times: vec![],
            bpm: 120,
            duration: 100.0,
            rms_curve: vec![0.5; 50],
            rms_hop_seconds: 2.0,
        };
        let out = orchestrate(input);
        let close_pairs = out
            .cues
            .windows(2)
            .filter(|w| (w[1].time - w[0].time).abs() < 4.0)
            .count();
        assert_eq!(close_pairs, 0);
    }
}
