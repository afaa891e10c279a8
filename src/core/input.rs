use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

pub const LANE_COUNT: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[repr(u8)]
pub enum Lane {
    Left = 0,
    Down = 1,
    Up = 2,
    Right = 3,
}

impl Lane {
    /// Judgment order within a tick.
    pub const ALL: [Lane; LANE_COUNT] = [Lane::Left, Lane::Down, Lane::Up, Lane::Right];

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline(always)]
    pub fn from_index(i: usize) -> Option<Lane> {
        Self::ALL.get(i).copied()
    }

    pub const fn name(self) -> &'static str {
        match self {
            Lane::Left => "Left",
            Lane::Down => "Down",
            Lane::Up => "Up",
            Lane::Right => "Right",
        }
    }
}

/// Lanes currently held down, polled once per tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LaneState([bool; LANE_COUNT]);

impl LaneState {
    pub const fn none() -> Self {
        Self([false; LANE_COUNT])
    }

    pub const fn all() -> Self {
        Self([true; LANE_COUNT])
    }

    pub fn only(lane: Lane) -> Self {
        let mut s = Self::none();
        s.set(lane, true);
        s
    }

    #[inline(always)]
    pub fn is_held(&self, lane: Lane) -> bool {
        self.0[lane.index()]
    }

    #[inline(always)]
    pub fn set(&mut self, lane: Lane, held: bool) {
        self.0[lane.index()] = held;
    }

    pub fn clear(&mut self) {
        self.0 = [false; LANE_COUNT];
    }

    /// Held lanes in judgment order.
    pub fn held(&self) -> impl Iterator<Item = Lane> + '_ {
        Lane::ALL.into_iter().filter(|l| self.is_held(*l))
    }

    /// Applies a keyboard event; returns true if it touched a lane.
    pub fn handle_key_event(&mut self, event: &KeyEvent) -> bool {
        let PhysicalKey::Code(code) = event.physical_key else {
            return false;
        };
        match lane_from_keycode(code) {
            Some(lane) => {
                self.set(lane, event.state == ElementState::Pressed);
                true
            }
            None => false,
        }
    }
}

/// Non-lane commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    ToggleFastMode,
    TogglePause,
    Abort,
    Advance,
    Start,
    SelectPrevious,
    SelectNext,
}

#[inline(always)]
pub const fn lane_from_keycode(code: KeyCode) -> Option<Lane> {
    match code {
        KeyCode::ArrowLeft => Some(Lane::Left),
        KeyCode::ArrowDown => Some(Lane::Down),
        KeyCode::ArrowUp => Some(Lane::Up),
        KeyCode::ArrowRight => Some(Lane::Right),
        _ => None,
    }
}

/// Key-down mappings for commands. Arrow keys double as menu navigation,
/// so callers decide which table to consult per phase.
#[inline(always)]
pub const fn action_from_keycode(code: KeyCode) -> Option<Action> {
    match code {
        KeyCode::KeyF => Some(Action::ToggleFastMode),
        KeyCode::KeyP => Some(Action::TogglePause),
        KeyCode::Escape => Some(Action::Abort),
        KeyCode::Backspace => Some(Action::Advance),
        KeyCode::Space | KeyCode::Enter | KeyCode::NumpadEnter => Some(Action::Start),
        KeyCode::ArrowUp => Some(Action::SelectPrevious),
        KeyCode::ArrowDown => Some(Action::SelectNext),
        _ => None,
    }
}
