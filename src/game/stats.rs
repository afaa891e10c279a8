use crate::config::{BASE_HIT_POINTS, COMBO_BONUS_POINTS, COMBO_BONUS_STEP};
use crate::game::judgment::{JudgmentResult, Outcome};

/// Points for a hit given the combo before it: 100 + floor(combo / 5) * 10.
#[inline(always)]
pub fn points_for_combo(combo_before: u32) -> u64 {
    BASE_HIT_POINTS + (combo_before / COMBO_BONUS_STEP) as u64 * COMBO_BONUS_POINTS
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub score: u64,
    pub combo: u32,
    pub max_combo: u32,
    pub total_notes_judged: u32,
    pub hit_notes: u32,
}

impl SessionStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Folds one judgment outcome into the counters.
    ///
    /// A Perfect counts toward `hit_notes` at once; the note is only added to
    /// `total_notes_judged` when its bounce finishes (`record_hit_retired`).
    pub fn apply(&mut self, result: &JudgmentResult) {
        match result.outcome {
            Outcome::Perfect => {
                self.score += result.points_awarded;
                self.combo += 1;
                self.hit_notes += 1;
                self.max_combo = self.max_combo.max(self.combo);
            }
            Outcome::Miss => {
                self.combo = 0;
                self.total_notes_judged += 1;
            }
        }
    }

    pub fn record_hit_retired(&mut self) {
        self.total_notes_judged += 1;
    }

    /// `hit / judged * 100`, or 0 before anything was judged. Notes still
    /// bouncing count as hit but not yet judged, so this may briefly read
    /// above 100.
    pub fn accuracy(&self) -> f32 {
        if self.total_notes_judged == 0 {
            return 0.0;
        }
        self.hit_notes as f32 / self.total_notes_judged as f32 * 100.0
    }
}
