use crate::core::input::{Lane, LANE_COUNT};
use crate::game::motion::MotionModel;
use crate::game::note::{Note, NoteState};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Lifecycle changes produced by one `update`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimelineEvent {
    /// Fell past the miss line without being hit; already removed.
    Missed { id: usize, lane: Lane },
    /// Finished its bounce after a hit; already removed.
    HitRetired { id: usize, lane: Lane },
}

/// Owns every live note, in spawn order.
pub struct NoteTimeline {
    notes: Vec<Note>,
    rng: StdRng,
    motion: MotionModel,
    miss_line_y: f32,
    spawned: usize,
}

impl NoteTimeline {
    pub fn new(motion: MotionModel, miss_line_y: f32, rng: StdRng) -> Self {
        Self {
            notes: Vec::new(),
            rng,
            motion,
            miss_line_y,
            spawned: 0,
        }
    }

    pub fn with_seed(motion: MotionModel, miss_line_y: f32, seed: u64) -> Self {
        Self::new(motion, miss_line_y, StdRng::seed_from_u64(seed))
    }

    /// Replaces the lane source, e.g. with a fresh seed per song.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Creates one note per timestamp with a uniformly random lane.
    /// Any previous notes are discarded.
    pub fn spawn_all(&mut self, timestamps: &[f32]) -> usize {
        self.notes.clear();
        let mut times: Vec<f32> = timestamps
            .iter()
            .copied()
            .filter(|t| t.is_finite() && *t >= 0.0)
            .collect();
        times.sort_by(|a, b| a.total_cmp(b));

        self.notes.reserve(times.len());
        for (id, t) in times.into_iter().enumerate() {
            let lane = Lane::ALL[self.rng.random_range(0..LANE_COUNT)];
            self.notes.push(Note::new(id, lane, t));
        }
        self.spawned = self.notes.len();
        info!("Spawned {} notes.", self.spawned);
        self.spawned
    }

    /// Advances every note to `elapsed`: activates due notes, moves them,
    /// misses notes past the miss line and retires finished bounces.
    pub fn update(&mut self, elapsed: f32, speed: f32) -> Vec<TimelineEvent> {
        let mut events = Vec::new();
        for note in &mut self.notes {
            match note.state() {
                NoteState::Pending | NoteState::Active => {
                    if elapsed < note.spawn_time {
                        // Sorted by spawn time; nothing later is due either.
                        break;
                    }
                    note.activate(elapsed);
                    note.position = self.motion.position(note.spawn_time, elapsed, speed);
                    if note.position >= self.miss_line_y {
                        note.mark_missed();
                        note.retire();
                        events.push(TimelineEvent::Missed { id: note.id, lane: note.lane });
                    }
                }
                NoteState::Hit => {
                    let done = note
                        .hit_time()
                        .is_none_or(|t| self.motion.bounce_done(t, elapsed));
                    if done {
                        note.retire();
                        events.push(TimelineEvent::HitRetired { id: note.id, lane: note.lane });
                    }
                }
                NoteState::Missed | NoteState::Retired => {}
            }
        }
        if !events.is_empty() {
            self.notes.retain(|n| n.state() != NoteState::Retired);
        }
        events
    }

    #[inline(always)]
    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    #[inline(always)]
    pub fn notes_mut(&mut self) -> &mut [Note] {
        &mut self.notes
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn spawned_count(&self) -> usize {
        self.spawned
    }

    pub fn clear(&mut self) {
        self.notes.clear();
        self.spawned = 0;
    }
}
