use crate::core::input::Lane;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NoteState {
    Pending,
    Active,
    Hit,
    Missed,
    Retired,
}

#[derive(Clone, Debug)]
pub struct Note {
    pub id: usize,
    pub lane: Lane,
    pub spawn_time: f32,
    state: NoteState,
    hit_time: Option<f32>,
    /// Vertical position of the top edge, in screen units. Valid once Active.
    pub position: f32,
    /// Position at the instant of the hit; the bounce is drawn relative to it.
    pub hit_position: Option<f32>,
}

impl Note {
    pub fn new(id: usize, lane: Lane, spawn_time: f32) -> Self {
        debug_assert!(spawn_time >= 0.0, "negative spawn time {}", spawn_time);
        Self {
            id,
            lane,
            spawn_time,
            state: NoteState::Pending,
            hit_time: None,
            position: 0.0,
            hit_position: None,
        }
    }

    #[inline(always)]
    pub fn state(&self) -> NoteState {
        self.state
    }

    #[inline(always)]
    pub fn hit_time(&self) -> Option<f32> {
        self.hit_time
    }

    /// Still waiting for judgment.
    #[inline(always)]
    pub fn is_live(&self) -> bool {
        matches!(self.state, NoteState::Pending | NoteState::Active)
    }

    // Transitions below are the only way to move a note through its
    // lifecycle: Pending -> Active -> {Hit | Missed} -> Retired.

    pub(crate) fn activate(&mut self, elapsed: f32) {
        debug_assert!(elapsed >= self.spawn_time);
        if self.state == NoteState::Pending {
            self.state = NoteState::Active;
        }
    }

    pub(crate) fn mark_hit(&mut self, elapsed: f32) {
        debug_assert_eq!(self.state, NoteState::Active, "note {} hit while {:?}", self.id, self.state);
        self.state = NoteState::Hit;
        self.hit_time = Some(elapsed);
        self.hit_position = Some(self.position);
    }

    pub(crate) fn mark_missed(&mut self) {
        debug_assert_eq!(self.state, NoteState::Active, "note {} missed while {:?}", self.id, self.state);
        self.state = NoteState::Missed;
    }

    pub(crate) fn retire(&mut self) {
        debug_assert!(
            matches!(self.state, NoteState::Hit | NoteState::Missed),
            "note {} retired while {:?}",
            self.id,
            self.state
        );
        self.state = NoteState::Retired;
    }
}
