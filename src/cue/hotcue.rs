//! Hot-Cue Assigner (spec §4.J, component J): maps the final merged cue
//! list onto slots A–H by role.

use crate::model::{CuePoint, CueType, HotCueAssignment, HotCueSlot};

const MIN_SPACING: f64 = 6.0;
const ALL_SLOTS: [char; 8] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H'];

/// Idempotent: running on an already-assigned list of cues yields the
/// same slots (spec §8).
#[must_use]
#[inline]
pub fn assign_hotcues(cues: &[CuePoint], duration: f64) -> HotCueAssignment {
    let mut chosen: Vec<(char, CuePoint)> = Vec::new();

    let first_drop_time = cues.iter().find(|c| c.kind == CueType::Drop).map(|c| c.time);

    assign_slot('A', &mut chosen, slot_a_mix_in(cues));
    assign_slot('B', &mut chosen, slot_b_first_vocal(cues, first_drop_time));
    assign_slot('C', &mut chosen, slot_c_first_chorus(cues, first_drop_time));
    assign_slot('D', &mut chosen, slot_d_first_build(cues, first_drop_time));
    assign_slot('E', &mut chosen, slot_e_main_drop(cues, duration));
    assign_slot('F', &mut chosen, slot_f_first_breakdown(cues));
    assign_slot('G', &mut chosen, slot_g_second_chorus(cues));
    assign_slot('H', &mut chosen, slot_h_mix_out(cues));

    backfill(&mut chosen, cues);

    chosen.sort_by_key(|(slot, _)| *slot);
    HotCueAssignment {
        slots: chosen.into_iter().map(|(slot, cue)| HotCueSlot { slot, cue }).collect(),
    }
}

fn assign_slot(slot: char, chosen: &mut Vec<(char, CuePoint)>, candidate: Option<CuePoint>) {
    let Some(cue) = candidate else { return };
    if chosen.iter().any(|(_, c)| (c.time - cue.time).abs() < MIN_SPACING) {
        return;
    }
    chosen.push((slot, cue));
}

fn slot_a_mix_in(cues: &[CuePoint]) -> Option<CuePoint> {
    cues.iter().find(|c| c.kind == CueType::Intro).cloned().or_else(|| {
        cues.iter().min_by(|a, b| a.time.partial_cmp(&b.time).unwrap()).cloned()
    })
}

fn slot_b_first_vocal(cues: &[CuePoint], first_drop_time: Option<f64>) -> Option<CuePoint> {
    let before_drop = cues.iter().filter(|c| {
        matches!(c.kind, CueType::Vocal | CueType::Verse) && first_drop_time.is_some_and(|d| c.time < d)
    }).min_by(|a, b| a.time.partial_cmp(&b.time).unwrap());
    before_drop
        .or_else(|| cues.iter().find(|c| c.kind == CueType::Chorus))
        .cloned()
}

fn slot_c_first_chorus(cues: &[CuePoint], first_drop_time: Option<f64>) -> Option<CuePoint> {
    let after_drop = cues.iter().filter(|c| {
        c.kind == CueType::Chorus && first_drop_time.is_some_and(|d| c.time > d)
    }).min_by(|a, b| a.time.partial_cmp(&b.time).unwrap());
    after_drop
        .or_else(|| {
            cues.iter()
                .filter(|c| c.kind == CueType::Vocal || c.kind == CueType::Verse)
                .nth(1)
        })
        .cloned()
}

fn slot_d_first_build(cues: &[CuePoint], first_drop_time: Option<f64>) -> Option<CuePoint> {
    cues.iter()
        .find(|c| c.kind == CueType::Build)
        .cloned()
        .or_else(|| {
            first_drop_time.and_then(|d| {
                cues.iter()
                    .filter(|c| c.time < d && d - c.time >= 4.0)
                    .max_by(|a, b| a.time.partial_cmp(&b.time).unwrap())
                    .cloned()
            })
        })
}

fn slot_e_main_drop(cues: &[CuePoint], duration: f64) -> Option<CuePoint> {
    let lo = 0.35 * duration;
    let hi = 0.60 * duration;
    let best = cues
        .iter()
        .filter(|c| c.kind == CueType::Drop && c.time >= lo && c.time <= hi)
        .max_by(|a, b| score(a, duration).partial_cmp(&score(b, duration)).unwrap());
    best.cloned().or_else(|| cues.iter().filter(|c| c.kind == CueType::Chorus).last().cloned())
}

fn score(cue: &CuePoint, duration: f64) -> f64 {
    let position_bonus = 1.0 - ((cue.time / duration.max(1e-9)) - 0.475).abs() / 0.125;
    0.7 * cue.confidence + 0.3 * position_bonus.clamp(0.0, 1.0)
}

fn slot_f_first_breakdown(cues: &[CuePoint]) -> Option<CuePoint> {
    cues.iter().find(|c| c.kind == CueType::Breakdown).cloned()
}

fn slot_g_second_chorus(cues: &[CuePoint]) -> Option<CuePoint> {
    cues.iter()
        .filter(|c| c.kind == CueType::Chorus)
        .nth(1)
        .or_else(|| cues.iter().filter(|c| c.kind == CueType::Drop).nth(1))
        .cloned()
}

fn slot_h_mix_out(cues: &[CuePoint]) -> Option<CuePoint> {
    cues.iter()
        .rev()
        .find(|c| matches!(c.kind, CueType::Outro | CueType::Phrase))
        .or_else(|| cues.iter().max_by(|a, b| a.time.partial_cmp(&b.time).unwrap()))
        .cloned()
}

fn backfill(chosen: &mut Vec<(char, CuePoint)>, cues: &[CuePoint]) {
    let used_slots: std::collections::HashSet<char> = chosen.iter().map(|(s, _)| *s).collect();
    let mut empty_slots: Vec<char> = ALL_SLOTS.iter().copied().filter(|s| !used_slots.contains(s)).collect();
    if empty_slots.is_empty() {
        return;
    }
    let used_cue_times: Vec<f64> = chosen.iter().map(|(_, c)| c.time).collect();
    let mut ranked: Vec<&CuePoint> = cues.iter().collect();
    ranked.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

    for cue in ranked {
        if empty_slots.is_empty() {
            break;
        }
        if used_cue_times.iter().any(|&t| (t - cue.time).abs() < MIN_SPACING)
            || chosen.iter().any(|(_, c)| (c.time - cue.time).abs() < MIN_SPACING)
        {
            continue;
        }
        let slot = empty_slots.remove(0);
        chosen.push((slot, cue.clone()));
    }
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
    fn assigns_distinct_slots_with_spacing() {
        let cues = vec![
            cue(CueType::Intro, 0.0, 0.9),
            cue(CueType::Verse, 20.0, 0.6),
            cue(CueType::Drop, 50.0, 0.9),
            cue(CueType::Chorus, 60.0, 0.8),
            cue(CueType::Breakdown, 80.0, 0.7),
            cue(CueType::Chorus, 100.0, 0.85),
            cue(CueType::Outro, 140.0, 0.9),
        ];
        let assignment = assign_hotcues(&cues, 150.0);
        let slots: std::collections::HashSet<char> = assignment.slots.iter().map(|s| s.slot).collect();
        assert_eq!(slots.len(), assignment.slots.len());
        for w in assignment.slots.windows(2) {
            assert!((w[1].cue.time - w[0].cue.time).abs() >= MIN_SPACING - 1e-6 || w[0].slot != w[1].slot);
        }
        assert!(assignment.slots.len() <= 8);
    }
}
