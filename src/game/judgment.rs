use crate::config::Config;
use crate::core::input::{Lane, LaneState};
use crate::game::note::{Note, NoteState};
use crate::game::stats::{points_for_combo, SessionStats};
use log::debug;
use serde::Serialize;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Outcome {
    Perfect,
    Miss,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JudgmentResult {
    pub lane: Lane,
    pub outcome: Outcome,
    pub points_awarded: u64,
    pub combo_after: u32,
}

impl JudgmentResult {
    /// Popup text shown by the front end.
    pub fn popup_text(&self) -> String {
        match self.outcome {
            Outcome::Perfect => format!("PERFECT! +{}", self.points_awarded),
            Outcome::Miss => "MISS!".to_string(),
        }
    }
}

/// Position-based judge. A note is hittable when its bottom edge is within
/// `hit_margin` of the hit line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JudgmentEngine {
    pub hit_zone_y: f32,
    pub hit_margin: f32,
    pub note_size: f32,
}

impl JudgmentEngine {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            hit_zone_y: cfg.hit_zone_y,
            hit_margin: cfg.hit_margin,
            note_size: cfg.note_size,
        }
    }

    #[inline(always)]
    pub fn is_hittable(&self, note: &Note) -> bool {
        note.state() == NoteState::Active
            && (note.position + self.note_size - self.hit_zone_y).abs() <= self.hit_margin
    }

    /// Judges every held lane once, in lane order. `notes` must be in spawn
    /// order; each lane hits at most one note per call, the earliest spawned.
    /// Hits are folded into `stats` immediately so the next lane sees the
    /// updated combo.
    pub fn judge(
        &self,
        notes: &mut [Note],
        lanes: &LaneState,
        elapsed: f32,
        stats: &mut SessionStats,
    ) -> Vec<JudgmentResult> {
        let mut results = Vec::new();
        for lane in lanes.held() {
            let Some(note) = notes
                .iter_mut()
                .find(|n| n.lane == lane && self.is_hittable(n))
            else {
                continue;
            };

            note.mark_hit(elapsed);
            let result = JudgmentResult {
                lane,
                outcome: Outcome::Perfect,
                points_awarded: points_for_combo(stats.combo),
                combo_after: stats.combo + 1,
            };
            stats.apply(&result);
            debug!(
                "JUDGED: note {} lane {} at {:.3}s, y {:.1}, +{} (combo {})",
                note.id,
                lane.name(),
                elapsed,
                note.position,
                result.points_awarded,
                result.combo_after
            );
            results.push(result);
        }
        results
    }

    /// Records a note that fell past the miss line.
    pub fn miss(&self, lane: Lane, stats: &mut SessionStats) -> JudgmentResult {
        let result = JudgmentResult { lane, outcome: Outcome::Miss, points_awarded: 0, combo_after: 0 };
        stats.apply(&result);
        debug!("JUDGED: miss on lane {}", lane.name());
        result
    }
}

impl Default for JudgmentEngine {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
