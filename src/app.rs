use crate::config::{self, Config, FPS, SCREEN_HEIGHT, SCREEN_WIDTH, WINDOW_TITLE};
use crate::core::audio::{CpalPlayback, FastModeAudio, Playback, SilentPlayback};
use crate::core::clock::SystemTimeSource;
use crate::core::input::{self, Action, LaneState};
use crate::core::songs::{self, SongEntry};
use crate::game::beats::SpectralFluxAnalyzer;
use crate::game::session::{GameSession, Phase, SessionResults, Snapshot};
use log::{debug, error, info, warn};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::PhysicalKey,
    window::Window,
};

const TITLE_REFRESH_SECS: f32 = 0.1;

type Session = GameSession<Box<dyn Playback>, SystemTimeSource>;

pub struct App {
    window: Option<Arc<Window>>,
    session: Session,
    analyzer: SpectralFluxAnalyzer,
    songs: Vec<SongEntry>,
    songs_dir: PathBuf,
    selected: usize,
    lanes: LaneState,
    autostart: Option<PathBuf>,
    shown_results: Option<SessionResults>,
    frame_count: u32,
    last_fps: f32,
    last_fps_update: Instant,
    last_title_update: Instant,
    next_frame: Instant,
}

impl App {
    fn new(config: Config, playback: Box<dyn Playback>, songs_dir: PathBuf, autostart: Option<PathBuf>) -> Self {
        let songs = songs::scan(&songs_dir);
        let now = Instant::now();
        Self {
            window: None,
            session: GameSession::new(config, playback, SystemTimeSource::new()),
            analyzer: SpectralFluxAnalyzer,
            songs,
            songs_dir,
            selected: 0,
            lanes: LaneState::none(),
            autostart,
            shown_results: None,
            frame_count: 0,
            last_fps: 0.0,
            last_fps_update: now,
            last_title_update: now,
            next_frame: now,
        }
    }

    fn start_song(&mut self, path: &Path) {
        self.lanes.clear();
        self.shown_results = None;
        match self.session.start_song(path, &self.analyzer) {
            Ok(count) => info!("Playing '{}' with {} notes.", path.display(), count),
            Err(e) => warn!("Could not start '{}': {}", path.display(), e),
        }
    }

    fn start_selected(&mut self) {
        let Some(song) = self.songs.get(self.selected) else {
            info!("No songs in '{}'.", self.songs_dir.display());
            return;
        };
        let path = song.path.clone();
        self.start_song(&path);
    }

    fn on_key_pressed(&mut self, action: Action, event_loop: &ActiveEventLoop) {
        match (self.session.phase(), action) {
            (Phase::Idle, Action::SelectPrevious) if !self.songs.is_empty() => {
                self.selected = (self.selected + self.songs.len() - 1) % self.songs.len();
            }
            (Phase::Idle, Action::SelectNext) if !self.songs.is_empty() => {
                self.selected = (self.selected + 1) % self.songs.len();
            }
            (Phase::Idle, Action::Start) => self.start_selected(),
            (Phase::Idle, Action::Abort) => {
                info!("Escape pressed on song select. Exiting.");
                event_loop.exit();
            }
            (Phase::Playing, Action::SelectPrevious | Action::SelectNext | Action::Start) => {}
            (Phase::Finished, Action::Advance) => {
                if let Some(results) = self.session.handle(Action::Advance) {
                    match serde_json::to_string(&results) {
                        Ok(json) => info!("Results: {}", json),
                        Err(e) => warn!("Could not serialize results: {}", e),
                    }
                    self.shown_results = Some(results);
                }
            }
            (_, action) => {
                self.session.handle(action);
                if self.session.phase() == Phase::Idle {
                    self.lanes.clear();
                    self.shown_results = None;
                }
            }
        }
    }

    fn update_title(&mut self, window: &Window, snapshot: &Snapshot, now: Instant) {
        self.frame_count += 1;
        let since_fps = now.duration_since(self.last_fps_update).as_secs_f32();
        if since_fps >= 1.0 {
            self.last_fps = self.frame_count as f32 / since_fps;
            self.frame_count = 0;
            self.last_fps_update = now;
        }

        if now.duration_since(self.last_title_update).as_secs_f32() < TITLE_REFRESH_SECS
            && snapshot.events.is_empty()
        {
            return;
        }
        self.last_title_update = now;

        let title = match snapshot.phase {
            Phase::Idle | Phase::Loading => menu_title(&self.songs, self.selected, snapshot),
            Phase::Playing => playing_title(snapshot, self.last_fps),
            Phase::Finished => match &self.shown_results {
                Some(results) => results_title(results),
                None => format!("{} | Song complete! Backspace: results", WINDOW_TITLE),
            },
        };
        window.set_title(&title);
    }
}

fn menu_title(songs: &[SongEntry], selected: usize, snapshot: &Snapshot) -> String {
    let mut title = match songs.get(selected) {
        Some(song) => format!(
            "{} | > {} ({}/{}) | Space: play",
            WINDOW_TITLE,
            song.title,
            selected + 1,
            songs.len()
        ),
        None => format!("{} | No songs found", WINDOW_TITLE),
    };
    if snapshot.fast_mode {
        title.push_str(" | FAST MODE");
    }
    if let Some(message) = &snapshot.message {
        title.push_str(" | ");
        title.push_str(message);
    }
    title
}

fn playing_title(snapshot: &Snapshot, fps: f32) -> String {
    let mut title = format!(
        "{} | Score: {} | Combo: {} | Accuracy: {:.1}%",
        snapshot.song_title.as_deref().unwrap_or(WINDOW_TITLE),
        snapshot.score,
        snapshot.combo,
        snapshot.accuracy
    );
    if let Some(progress) = snapshot.progress {
        title.push_str(&format!(" | {:.0}%", progress * 100.0));
    }
    if let Some(event) = snapshot.events.last() {
        title.push_str(" | ");
        title.push_str(&event.popup_text());
    }
    if snapshot.paused {
        title.push_str(" | PAUSED");
    }
    if snapshot.fast_mode {
        title.push_str(" | FAST MODE");
    }
    title.push_str(&format!(" | {:.0} FPS", fps));
    title
}

fn results_title(results: &SessionResults) -> String {
    format!(
        "{} | RESULTS {} | Score: {} | Accuracy: {:.1}% | Max combo: {} | Esc: menu",
        WINDOW_TITLE, results.song_title, results.score, results.accuracy, results.max_combo
    )
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attributes = Window::default_attributes()
            .with_title(WINDOW_TITLE)
            .with_inner_size(PhysicalSize::new(SCREEN_WIDTH, SCREEN_HEIGHT))
            .with_resizable(false);
        match event_loop.create_window(attributes) {
            Ok(window) => {
                self.window = Some(Arc::new(window));
                info!("Starting event loop...");
            }
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        }

        if let Some(path) = self.autostart.take() {
            self.start_song(&path);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(window) = self.window.as_ref().cloned() else { return; };
        if window_id != window.id() { return; }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested. Shutting down.");
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event: key_event, .. } => {
                if self.session.phase() == Phase::Playing {
                    self.lanes.handle_key_event(&key_event);
                }
                if key_event.state != ElementState::Pressed || key_event.repeat {
                    return;
                }
                if let PhysicalKey::Code(code) = key_event.physical_key {
                    if let Some(action) = input::action_from_keycode(code) {
                        self.on_key_pressed(action, event_loop);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                let snapshot = self.session.tick(&self.lanes);
                for event in &snapshot.events {
                    debug!("{} ({:?})", event.popup_text(), event.lane);
                }
                if snapshot.phase != Phase::Playing {
                    self.lanes.clear();
                }
                self.update_title(&window, &snapshot, Instant::now());
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let now = Instant::now();
        if now >= self.next_frame {
            if let Some(window) = &self.window {
                window.request_redraw();
            }
            self.next_frame = now + Duration::from_secs_f32(1.0 / FPS);
        }
        event_loop.set_control_flow(ControlFlow::WaitUntil(self.next_frame));
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if self.session.phase() == Phase::Playing {
            self.session.handle(Action::Abort);
        }
    }
}

/// Opens the output device, falling back to silent playback so the game
/// stays playable without audio hardware.
fn open_playback(cfg: &Config) -> Box<dyn Playback> {
    let fast = FastModeAudio::from_config(cfg);
    match CpalPlayback::new(fast) {
        Ok(playback) => Box::new(playback),
        Err(e) => {
            warn!("Audio output unavailable ({}); continuing without sound.", e);
            Box::new(SilentPlayback::new(fast))
        }
    }
}

pub fn run(song: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let cfg = config::get();
    let songs_dir = cfg.soundtrack_dir.clone().unwrap_or_else(songs::soundtrack_dir);
    songs::ensure_dir(&songs_dir);

    let playback = open_playback(&cfg);
    let event_loop = EventLoop::new()?;
    let mut app = App::new(cfg, playback, songs_dir, song);
    event_loop.run_app(&mut app)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::input::Lane;
    use crate::game::judgment::{JudgmentResult, Outcome};

    fn snapshot(phase: Phase) -> Snapshot {
        Snapshot {
            phase,
            notes: Vec::new(),
            score: 1290,
            combo: 12,
            max_combo: 12,
            accuracy: 100.0,
            paused: false,
            fast_mode: false,
            elapsed: 3.0,
            progress: Some(0.25),
            events: Vec::new(),
            shake: false,
            message: None,
            song_title: Some("Senbonzakura".to_string()),
        }
    }

    #[test]
    fn playing_title_shows_stats_and_flags() {
        let mut snap = snapshot(Phase::Playing);
        snap.paused = true;
        snap.fast_mode = true;
        snap.events.push(JudgmentResult {
            lane: Lane::Up,
            outcome: Outcome::Perfect,
            points_awarded: 120,
            combo_after: 12,
        });
        let title = playing_title(&snap, 60.0);
        assert!(title.starts_with("Senbonzakura | Score: 1290 | Combo: 12 | Accuracy: 100.0%"));
        assert!(title.contains("| 25%"));
        assert!(title.contains("PERFECT! +120"));
        assert!(title.contains("PAUSED"));
        assert!(title.contains("FAST MODE"));
    }

    #[test]
    fn menu_title_lists_selection_and_message() {
        let songs = vec![
            SongEntry { title: "a".into(), path: PathBuf::from("a.wav") },
            SongEntry { title: "b".into(), path: PathBuf::from("b.wav") },
        ];
        let mut snap = snapshot(Phase::Idle);
        snap.message = Some("ERROR LOADING SONG!".into());
        let title = menu_title(&songs, 1, &snap);
        assert!(title.contains("> b (2/2)"));
        assert!(title.ends_with("ERROR LOADING SONG!"));

        assert!(menu_title(&[], 0, &snap).contains("No songs found"));
    }
}
