use crate::config::{Config, SHAKE_AMPLITUDE, SHAKE_COMBO_THRESHOLD, TRANSIENT_MESSAGE_DURATION};
use crate::core::audio::{Playback, PlaybackError};
use crate::core::clock::{SongClock, TimeSource};
use crate::core::input::{Action, Lane, LaneState};
use crate::game::beats::{self, BeatAnalyzer};
use crate::game::judgment::{JudgmentEngine, JudgmentResult};
use crate::game::motion::MotionModel;
use crate::game::note::NoteState;
use crate::game::stats::SessionStats;
use crate::game::timeline::{NoteTimeline, TimelineEvent};
use chrono::{DateTime, Local};
use rand::Rng;
use log::{error, info};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const LOAD_ERROR_MESSAGE: &str = "ERROR LOADING SONG!";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Loading,
    Playing,
    Finished,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("playback failed: {0}")]
    Playback(#[from] PlaybackError),
    #[error("cannot start a song while {0:?}")]
    NotIdle(Phase),
}

/// Everything that changes while a song plays, owned in one place.
pub struct SessionState<T: TimeSource> {
    pub clock: SongClock<T>,
    pub timeline: NoteTimeline,
    pub stats: SessionStats,
    pub fast_mode: bool,
}

/// Read-only view of one drawable note.
#[derive(Clone, Debug, PartialEq)]
pub struct NoteView {
    pub id: usize,
    pub lane: Lane,
    pub state: NoteState,
    /// Top edge, including the bounce for hit notes.
    pub y: f32,
    /// Drawn with a small random jitter while the combo is high.
    pub shaking: bool,
}

impl NoteView {
    /// Per-frame draw offset `(dx, dy)`, within the shake amplitude while
    /// shaking and zero otherwise.
    pub fn shake_offset<R: Rng>(&self, rng: &mut R) -> (f32, f32) {
        if !self.shaking {
            return (0.0, 0.0);
        }
        (
            rng.random_range(-SHAKE_AMPLITUDE..=SHAKE_AMPLITUDE),
            rng.random_range(-SHAKE_AMPLITUDE..=SHAKE_AMPLITUDE),
        )
    }
}

/// What the render collaborator gets each tick.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub phase: Phase,
    pub notes: Vec<NoteView>,
    pub score: u64,
    pub combo: u32,
    pub max_combo: u32,
    pub accuracy: f32,
    pub paused: bool,
    pub fast_mode: bool,
    pub elapsed: f32,
    /// Song progress in [0, 1], when the song length is known.
    pub progress: Option<f32>,
    /// Judgments made during this tick.
    pub events: Vec<JudgmentResult>,
    pub shake: bool,
    pub message: Option<String>,
    pub song_title: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionResults {
    pub song_title: String,
    pub score: u64,
    pub accuracy: f32,
    pub max_combo: u32,
    pub hit_notes: u32,
    pub total_notes_judged: u32,
    pub fast_mode: bool,
    pub finished_at: DateTime<Local>,
}

struct TransientMessage {
    text: String,
    expires_at: Duration,
}

pub struct GameSession<P: Playback, T: TimeSource> {
    config: Config,
    motion: MotionModel,
    judge: JudgmentEngine,
    playback: P,
    state: SessionState<T>,
    phase: Phase,
    song_title: Option<String>,
    message: Option<TransientMessage>,
    pending_fast_restart: bool,
    results: Option<SessionResults>,
    log_timer: f32,
    last_elapsed: f32,
}

impl<P: Playback, T: TimeSource> GameSession<P, T> {
    pub fn new(config: Config, playback: P, time: T) -> Self {
        let motion = MotionModel::from_config(&config);
        let seed = config.lane_seed.unwrap_or_else(rand::random);
        let state = SessionState {
            clock: SongClock::new(time),
            timeline: NoteTimeline::with_seed(motion, config.miss_line_y, seed),
            stats: SessionStats::default(),
            fast_mode: config.start_in_fast_mode,
        };
        Self {
            judge: JudgmentEngine::from_config(&config),
            motion,
            config,
            playback,
            state,
            phase: Phase::Idle,
            song_title: None,
            message: None,
            pending_fast_restart: false,
            results: None,
            log_timer: 0.0,
            last_elapsed: 0.0,
        }
    }

    #[inline(always)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &SessionState<T> {
        &self.state
    }

    pub fn playback(&self) -> &P {
        &self.playback
    }

    pub fn playback_mut(&mut self) -> &mut P {
        &mut self.playback
    }

    /// Analyzes the song, spawns its notes and starts playback.
    ///
    /// Blocks for the whole analysis. On playback failure the session goes
    /// back to `Idle` and shows a transient load-error message.
    pub fn start_song(&mut self, path: &Path, analyzer: &dyn BeatAnalyzer) -> Result<usize, SessionError> {
        if self.phase != Phase::Idle {
            return Err(SessionError::NotIdle(self.phase));
        }
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        self.set_phase(Phase::Loading);
        info!("Loading '{}'...", title);

        let beats = beats::extract(analyzer, path);
        let seed = self.config.lane_seed.unwrap_or_else(rand::random);
        self.state.timeline.reseed(seed);
        self.state.stats.reset();
        self.state.clock.reset();
        let count = self.state.timeline.spawn_all(&beats);

        if let Err(e) = self.begin_playback(path) {
            error!("Failed to start '{}': {}", title, e);
            self.state.timeline.clear();
            self.show_message(LOAD_ERROR_MESSAGE);
            self.set_phase(Phase::Idle);
            return Err(e.into());
        }

        self.state.clock.start();
        self.song_title = Some(title);
        self.results = None;
        self.pending_fast_restart = false;
        self.log_timer = 0.0;
        self.last_elapsed = 0.0;
        self.set_phase(Phase::Playing);
        Ok(count)
    }

    fn begin_playback(&mut self, path: &Path) -> Result<(), PlaybackError> {
        self.playback.load(path)?;
        self.playback.play(0.0, self.state.fast_mode)?;
        info!("Playback started (fast mode: {}).", self.state.fast_mode);
        Ok(())
    }

    /// One frame: clock read, timeline update, judgment and stats fold, all
    /// against a single elapsed-time sample.
    pub fn tick(&mut self, lanes: &LaneState) -> Snapshot {
        let elapsed = self.state.clock.elapsed();
        let mut events = Vec::new();

        if self.phase == Phase::Playing && !self.state.clock.is_paused() {
            let speed = self.motion.speed(self.state.fast_mode);
            for event in self.state.timeline.update(elapsed, speed) {
                match event {
                    TimelineEvent::Missed { lane, .. } => {
                        events.push(self.judge.miss(lane, &mut self.state.stats));
                    }
                    TimelineEvent::HitRetired { .. } => self.state.stats.record_hit_retired(),
                }
            }

            let hits = self.judge.judge(
                self.state.timeline.notes_mut(),
                lanes,
                elapsed,
                &mut self.state.stats,
            );
            events.extend(hits);

            self.heartbeat(elapsed);

            if self.state.timeline.is_empty() && !self.playback.is_busy() && !self.state.clock.is_paused() {
                self.finish();
            }
        }

        self.snapshot(elapsed, events)
    }

    fn heartbeat(&mut self, elapsed: f32) {
        self.log_timer += (elapsed - self.last_elapsed).max(0.0);
        self.last_elapsed = elapsed;
        if self.log_timer >= 1.0 {
            info!(
                "Time: {:.2}, Score: {}, Combo: {}, Live notes: {}",
                elapsed,
                self.state.stats.score,
                self.state.stats.combo,
                self.state.timeline.len()
            );
            self.log_timer -= 1.0;
        }
    }

    fn finish(&mut self) {
        let stats = &self.state.stats;
        let results = SessionResults {
            song_title: self.song_title.clone().unwrap_or_default(),
            score: stats.score,
            accuracy: stats.accuracy(),
            max_combo: stats.max_combo,
            hit_notes: stats.hit_notes,
            total_notes_judged: stats.total_notes_judged,
            fast_mode: self.state.fast_mode,
            finished_at: Local::now(),
        };
        info!(
            "Song complete: score {}, accuracy {:.1}%, max combo {}.",
            results.score, results.accuracy, results.max_combo
        );
        self.results = Some(results);
        self.set_phase(Phase::Finished);
    }

    /// Applies a command. `Advance` on a finished song returns its results.
    pub fn handle(&mut self, action: Action) -> Option<SessionResults> {
        match (self.phase, action) {
            (Phase::Idle | Phase::Playing, Action::ToggleFastMode) => self.toggle_fast_mode(),
            (Phase::Playing, Action::TogglePause) => self.toggle_pause(),
            (Phase::Playing, Action::Abort) => {
                info!("Song aborted.");
                self.playback.stop();
                self.reset_to_idle();
            }
            (Phase::Finished, Action::Abort) => self.reset_to_idle(),
            (Phase::Finished, Action::Advance) => return self.results.clone(),
            _ => {}
        }
        None
    }

    fn toggle_pause(&mut self) {
        if self.state.clock.is_paused() {
            self.state.clock.resume();
            if self.pending_fast_restart {
                self.pending_fast_restart = false;
                self.restart_playback();
            } else {
                self.playback.unpause();
            }
            info!("Resumed at {:.2}s.", self.state.clock.elapsed());
        } else {
            self.state.clock.pause();
            self.playback.pause();
            info!("Paused at {:.2}s.", self.state.clock.elapsed());
        }
    }

    fn toggle_fast_mode(&mut self) {
        self.state.fast_mode = !self.state.fast_mode;
        info!("Fast mode {}.", if self.state.fast_mode { "on" } else { "off" });
        if self.phase != Phase::Playing {
            return;
        }
        if self.state.clock.is_paused() {
            self.pending_fast_restart = true;
        } else if self.playback.is_busy() {
            self.restart_playback();
        }
    }

    /// Restarts audio at the current song time with the current rate.
    fn restart_playback(&mut self) {
        let offset = self.state.clock.elapsed();
        self.playback.stop();
        if let Err(e) = self.playback.play(offset, self.state.fast_mode) {
            error!("Failed to restart playback at {:.2}s: {}", offset, e);
            self.show_message(LOAD_ERROR_MESSAGE);
        }
    }

    fn reset_to_idle(&mut self) {
        self.state.clock.reset();
        self.state.timeline.clear();
        self.state.stats.reset();
        self.pending_fast_restart = false;
        self.song_title = None;
        self.set_phase(Phase::Idle);
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            info!("Session phase: {:?} -> {:?}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn show_message(&mut self, text: &str) {
        let now = self.state.clock.time_source().now();
        self.message = Some(TransientMessage {
            text: text.to_string(),
            expires_at: now + Duration::from_secs_f32(TRANSIENT_MESSAGE_DURATION),
        });
    }

    fn current_message(&mut self) -> Option<String> {
        let now = self.state.clock.time_source().now();
        if self.message.as_ref().is_some_and(|m| now >= m.expires_at) {
            self.message = None;
        }
        self.message.as_ref().map(|m| m.text.clone())
    }

    fn snapshot(&mut self, elapsed: f32, events: Vec<JudgmentResult>) -> Snapshot {
        let stats = &self.state.stats;
        let shake = stats.combo > SHAKE_COMBO_THRESHOLD;
        let motion = &self.motion;

        let notes = self
            .state
            .timeline
            .notes()
            .iter()
            .filter_map(|n| {
                let y = match n.state() {
                    NoteState::Active => n.position,
                    NoteState::Hit => {
                        let base = n.hit_position.unwrap_or(n.position);
                        let progress = n.hit_time().map_or(1.0, |t| motion.bounce_progress(t, elapsed));
                        base - motion.bounce_offset(progress)
                    }
                    _ => return None,
                };
                Some(NoteView {
                    id: n.id,
                    lane: n.lane,
                    state: n.state(),
                    y,
                    shaking: shake && n.state() == NoteState::Active,
                })
            })
            .collect();

        let progress = self
            .playback
            .duration_seconds()
            .filter(|d| *d > 0.0)
            .map(|d| (elapsed / d).min(1.0));

        let snapshot = Snapshot {
            phase: self.phase,
            notes,
            score: stats.score,
            combo: stats.combo,
            max_combo: stats.max_combo,
            accuracy: stats.accuracy(),
            paused: self.state.clock.is_paused(),
            fast_mode: self.state.fast_mode,
            elapsed,
            progress,
            events,
            shake,
            message: None,
            song_title: self.song_title.clone(),
        };
        Snapshot { message: self.current_message(), ..snapshot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualTimeSource;
    use crate::game::beats::AnalysisError;
    use crate::game::judgment::Outcome;
    use approx::assert_abs_diff_eq;
    use std::collections::HashMap;
    use std::rc::Rc;

    const FRAME: f32 = 1.0 / 60.0;

    #[derive(Default)]
    struct FakePlayback {
        busy: bool,
        fail_load: bool,
        paused: bool,
        plays: Vec<(f32, bool)>,
        stops: usize,
        duration: Option<f32>,
    }

    impl Playback for FakePlayback {
        fn load(&mut self, _path: &Path) -> Result<(), PlaybackError> {
            if self.fail_load { Err(PlaybackError::NoDevice) } else { Ok(()) }
        }
        fn play(&mut self, start_offset: f32, fast: bool) -> Result<(), PlaybackError> {
            self.plays.push((start_offset, fast));
            self.paused = false;
            Ok(())
        }
        fn pause(&mut self) {
            self.paused = true;
        }
        fn unpause(&mut self) {
            self.paused = false;
        }
        fn stop(&mut self) {
            self.stops += 1;
        }
        fn is_busy(&self) -> bool {
            self.busy
        }
        fn position_seconds(&self) -> f32 {
            0.0
        }
        fn duration_seconds(&self) -> Option<f32> {
            self.duration
        }
    }

    struct FixedBeats(Vec<f32>);

    impl BeatAnalyzer for FixedBeats {
        fn analyze(&self, _path: &Path) -> Result<Vec<f32>, AnalysisError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    impl BeatAnalyzer for Broken {
        fn analyze(&self, _path: &Path) -> Result<Vec<f32>, AnalysisError> {
            Err(AnalysisError::NoOnsets)
        }
    }

    type TestSession = GameSession<FakePlayback, Rc<ManualTimeSource>>;

    fn session_with(playback: FakePlayback) -> (Rc<ManualTimeSource>, TestSession) {
        let time = Rc::new(ManualTimeSource::new());
        let config = Config { lane_seed: Some(1234), ..Config::default() };
        (Rc::clone(&time), GameSession::new(config, playback, time))
    }

    fn start(beats: Vec<f32>, playback: FakePlayback) -> (Rc<ManualTimeSource>, TestSession) {
        let (time, mut session) = session_with(playback);
        session.start_song(Path::new("song.wav"), &FixedBeats(beats)).unwrap();
        (time, session)
    }

    /// Ticks at 60 FPS from `from` to `to`, choosing held lanes per frame.
    fn run(
        time: &ManualTimeSource,
        session: &mut TestSession,
        from: f32,
        to: f32,
        mut lanes: impl FnMut(&TestSession) -> LaneState,
    ) {
        let frames = ((to - from) / FRAME).ceil() as usize;
        for i in 0..=frames {
            time.set_secs(from + i as f32 * FRAME);
            let held = lanes(session);
            session.tick(&held);
        }
    }

    fn lanes_of(session: &TestSession, pick: impl Fn(usize) -> bool) -> LaneState {
        let mut held = LaneState::none();
        for n in session.state().timeline.notes() {
            if n.state() == NoteState::Active && pick(n.id) {
                held.set(n.lane, true);
            }
        }
        held
    }

    #[test]
    fn single_note_hit_at_hit_zone() {
        let (time, mut session) = start(vec![0.0], FakePlayback { busy: true, ..Default::default() });
        let lane = session.state().timeline.notes()[0].lane;

        time.set_secs(0.729);
        let snap = session.tick(&LaneState::only(lane));
        assert_eq!(snap.events.len(), 1);
        assert_eq!(snap.events[0].outcome, Outcome::Perfect);
        assert_eq!(snap.score, 100);
        assert_eq!(snap.combo, 1);
        assert_eq!(snap.notes[0].state, NoteState::Hit);
    }

    #[test]
    fn no_input_misses_every_note_exactly_once() {
        let beats: Vec<f32> = (0..10).map(|i| i as f32 * 0.5).collect();
        let (time, mut session) = start(beats, FakePlayback::default());
        run(&time, &mut session, 0.0, 6.0, |_| LaneState::none());

        let stats = &session.state().stats;
        assert_eq!(stats.total_notes_judged, 10);
        assert_eq!(stats.hit_notes, 0);
        assert_eq!(stats.combo, 0);
        assert_eq!(stats.accuracy(), 0.0);
        assert_eq!(session.phase(), Phase::Finished);
    }

    #[test]
    fn holding_every_lane_hits_every_note_exactly_once() {
        let beats: Vec<f32> = (0..12).map(|i| i as f32 * 0.5).collect();
        let (time, mut session) = start(beats, FakePlayback::default());
        run(&time, &mut session, 0.0, 8.0, |_| LaneState::all());

        let stats = &session.state().stats;
        assert_eq!(stats.total_notes_judged, 12);
        assert_eq!(stats.hit_notes, 12);
        assert_eq!(stats.max_combo, 12);
        assert_abs_diff_eq!(stats.accuracy(), 100.0, epsilon = 1e-4);
        // 5 x 100, 5 x 110, 2 x 120
        assert_eq!(stats.score, 1290);
        assert_eq!(session.phase(), Phase::Finished);
    }

    #[test]
    fn seven_hits_of_ten_is_seventy_percent() {
        let beats: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let (time, mut session) = start(beats, FakePlayback::default());
        run(&time, &mut session, 0.0, 11.0, |s| lanes_of(s, |id| id < 7));

        let stats = &session.state().stats;
        assert_eq!(stats.hit_notes, 7);
        assert_eq!(stats.total_notes_judged, 10);
        assert_abs_diff_eq!(stats.accuracy(), 70.0, epsilon = 1e-4);
        assert_eq!(stats.combo, 0);
    }

    #[test]
    fn miss_resets_combo_and_points_follow_combo() {
        let beats: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let (time, mut session) = start(beats, FakePlayback::default());
        let mut seen = Vec::new();
        let frames = (9.0 / FRAME) as usize;
        for i in 0..=frames {
            time.set_secs(i as f32 * FRAME);
            let held = lanes_of(&session, |id| id != 6);
            let snap = session.tick(&held);
            seen.extend(snap.events);
        }

        let outcomes: Vec<(Outcome, u64, u32)> = seen
            .iter()
            .map(|e| (e.outcome, e.points_awarded, e.combo_after))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                (Outcome::Perfect, 100, 1),
                (Outcome::Perfect, 100, 2),
                (Outcome::Perfect, 100, 3),
                (Outcome::Perfect, 100, 4),
                (Outcome::Perfect, 100, 5),
                (Outcome::Perfect, 110, 6),
                (Outcome::Miss, 0, 0),
                (Outcome::Perfect, 100, 1),
            ]
        );
        assert_eq!(session.state().stats.max_combo, 6);
    }

    #[test]
    fn lifecycle_is_monotone() {
        fn rank(s: NoteState) -> u8 {
            match s {
                NoteState::Pending => 0,
                NoteState::Active => 1,
                NoteState::Hit | NoteState::Missed => 2,
                NoteState::Retired => 3,
            }
        }
        let beats: Vec<f32> = (0..20).map(|i| i as f32 * 0.3).collect();
        let (time, mut session) = start(beats, FakePlayback::default());
        let mut ranks: HashMap<usize, u8> = HashMap::new();

        for i in 0..=(8.0 / FRAME) as usize {
            let now = i as f32 * FRAME;
            time.set_secs(now);
            let held = lanes_of(&session, |id| id % 2 == 0);
            session.tick(&held);
            for n in session.state().timeline.notes() {
                let r = rank(n.state());
                if r > 0 {
                    assert!(now + 1e-4 >= n.spawn_time, "note {} active before spawn", n.id);
                }
                let prev = ranks.insert(n.id, r).unwrap_or(0);
                assert!(r >= prev, "note {} went from rank {} to {}", n.id, prev, r);
            }
        }
        assert_eq!(session.state().stats.total_notes_judged, 20);
    }

    #[test]
    fn pause_freezes_notes_and_judgment() {
        let (time, mut session) = start(vec![0.0], FakePlayback { busy: true, ..Default::default() });
        time.set_secs(0.5);
        let before = session.tick(&LaneState::none());

        session.handle(Action::TogglePause);
        assert!(session.playback().paused);
        time.set_secs(0.729);
        let during = session.tick(&LaneState::all());
        assert!(during.paused);
        assert!(during.events.is_empty());
        assert_eq!(during.notes[0].y, before.notes[0].y);
        assert_abs_diff_eq!(during.elapsed, 0.5, epsilon = 1e-5);

        time.set_secs(10.0);
        session.handle(Action::TogglePause);
        assert!(!session.playback().paused);
        time.set_secs(10.229);
        let after = session.tick(&LaneState::all());
        assert_abs_diff_eq!(after.elapsed, 0.729, epsilon = 1e-4);
        assert_eq!(after.events.len(), 1);
        assert_eq!(after.score, 100);
    }

    #[test]
    fn fast_toggle_restarts_playback_at_current_time() {
        let (time, mut session) = start(
            beats::fallback_beats(),
            FakePlayback { busy: true, ..Default::default() },
        );
        run(&time, &mut session, 0.0, 12.0, |_| LaneState::none());

        let before = session.state().clock.elapsed();
        session.handle(Action::ToggleFastMode);
        let after = session.state().clock.elapsed();

        assert!((after - before).abs() < FRAME);
        let pb = session.playback();
        assert_eq!(pb.stops, 1);
        let (offset, fast) = *pb.plays.last().unwrap();
        assert_abs_diff_eq!(offset, 12.0, epsilon = 1e-3);
        assert!(fast);
        assert_eq!(session.motion.speed(session.state().fast_mode), 1700.0);
    }

    #[test]
    fn fast_toggle_while_paused_restarts_on_resume() {
        let (time, mut session) = start(vec![0.0, 5.0], FakePlayback { busy: true, ..Default::default() });
        time.set_secs(3.0);
        session.tick(&LaneState::none());
        session.handle(Action::TogglePause);
        session.handle(Action::ToggleFastMode);
        assert_eq!(session.playback().plays.len(), 1, "no restart while paused");

        time.set_secs(20.0);
        session.handle(Action::TogglePause);
        let (offset, fast) = *session.playback().plays.last().unwrap();
        assert_eq!(session.playback().plays.len(), 2);
        assert_abs_diff_eq!(offset, 3.0, epsilon = 1e-4);
        assert!(fast);
        assert!(!session.state().clock.is_paused());
    }

    #[test]
    fn load_failure_returns_to_idle_with_message() {
        let (time, mut session) = session_with(FakePlayback { fail_load: true, ..Default::default() });
        let err = session.start_song(Path::new("broken.wav"), &Broken).unwrap_err();
        assert!(matches!(err, SessionError::Playback(_)));
        assert_eq!(session.phase(), Phase::Idle);
        assert!(session.state().timeline.is_empty());

        let snap = session.tick(&LaneState::none());
        assert_eq!(snap.message.as_deref(), Some(LOAD_ERROR_MESSAGE));
        time.advance_secs(1.1);
        assert_eq!(session.tick(&LaneState::none()).message, None);
    }

    #[test]
    fn finish_waits_for_audio_then_results_and_restart() {
        let (time, mut session) = start(vec![0.0], FakePlayback { busy: true, ..Default::default() });
        run(&time, &mut session, 0.0, 2.0, |_| LaneState::none());
        assert!(session.state().timeline.is_empty());
        assert_eq!(session.phase(), Phase::Playing);

        session.playback_mut().busy = false;
        time.set_secs(2.1);
        let snap = session.tick(&LaneState::none());
        assert_eq!(snap.phase, Phase::Finished);

        assert!(matches!(
            session.start_song(Path::new("x.wav"), &Broken),
            Err(SessionError::NotIdle(Phase::Finished))
        ));

        let results = session.handle(Action::Advance).unwrap();
        assert_eq!(results.song_title, "song");
        assert_eq!(results.total_notes_judged, 1);
        assert_eq!(results.score, 0);
        let json = serde_json::to_string(&results).unwrap();
        assert!(json.contains("\"finished_at\""));

        session.handle(Action::Abort);
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn finish_is_blocked_while_paused() {
        let (time, mut session) = start(vec![0.0], FakePlayback::default());
        time.set_secs(0.5);
        session.tick(&LaneState::none());
        session.handle(Action::TogglePause);
        time.set_secs(5.0);
        assert_eq!(session.tick(&LaneState::none()).phase, Phase::Playing);
    }

    #[test]
    fn failed_analysis_still_plays_fallback_chart() {
        let (_time, mut session) = session_with(FakePlayback::default());
        let count = session.start_song(Path::new("song.wav"), &Broken).unwrap();
        assert_eq!(count, 30);
        assert_eq!(session.phase(), Phase::Playing);
        assert_eq!(session.playback().plays, vec![(0.0, false)]);
    }

    #[test]
    fn abort_stops_playback_and_resets() {
        let (time, mut session) = start(vec![0.0, 1.0], FakePlayback { busy: true, ..Default::default() });
        time.set_secs(0.3);
        session.tick(&LaneState::none());
        session.handle(Action::Abort);
        assert_eq!(session.phase(), Phase::Idle);
        assert_eq!(session.playback().stops, 1);
        assert!(session.state().timeline.is_empty());
        assert_eq!(session.state().clock.elapsed(), 0.0);
    }

    #[test]
    fn abort_clears_stats_in_idle_snapshot() {
        let (time, mut session) = start(vec![0.0, 1.0], FakePlayback { busy: true, ..Default::default() });
        let lane = session.state().timeline.notes()[0].lane;
        time.set_secs(0.729);
        let hit = session.tick(&LaneState::only(lane));
        assert!(hit.score > 0);
        assert_eq!(hit.combo, 1);

        session.handle(Action::Abort);
        let idle = session.tick(&LaneState::none());
        assert_eq!(idle.phase, Phase::Idle);
        assert_eq!(idle.score, 0);
        assert_eq!(idle.combo, 0);
        assert_eq!(idle.max_combo, 0);
        assert_eq!(idle.accuracy, 0.0);
        assert_eq!(session.state().stats, SessionStats::default());
    }

    #[test]
    fn snapshot_reports_progress_bounce_and_shake() {
        let (time, mut session) = start(
            vec![0.0],
            FakePlayback { busy: true, duration: Some(10.0), ..Default::default() },
        );
        let lane = session.state().timeline.notes()[0].lane;
        time.set_secs(0.729);
        let hit = session.tick(&LaneState::only(lane));
        let hit_y = hit.notes[0].y;

        time.set_secs(0.829);
        let snap = session.tick(&LaneState::none());
        assert_abs_diff_eq!(snap.progress.unwrap(), 0.0829, epsilon = 1e-4);
        // Halfway through the bounce: 30 * 0.75 above the hit position.
        assert_abs_diff_eq!(snap.notes[0].y, hit_y - 22.5, epsilon = 0.1);
        assert!(!snap.shake);
        assert!(!snap.notes[0].shaking);
    }

    #[test]
    fn shake_offset_stays_within_amplitude() {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mut view = NoteView { id: 0, lane: Lane::Left, state: NoteState::Active, y: 100.0, shaking: false };
        assert_eq!(view.shake_offset(&mut rng), (0.0, 0.0));

        view.shaking = true;
        for _ in 0..100 {
            let (dx, dy) = view.shake_offset(&mut rng);
            assert!(dx.abs() <= SHAKE_AMPLITUDE && dy.abs() <= SHAKE_AMPLITUDE);
        }
    }
}
