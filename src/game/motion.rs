//! Pure note motion: where a note is drawn at a given song time, and the
//! display-only bounce that follows a hit.

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionModel {
    /// Units per second at normal speed.
    pub fall_speed: f32,
    /// Notes enter fully above the screen at `-note_size`.
    pub note_size: f32,
    pub fast_multiplier: f32,
    pub bounce_duration: f32,
    pub bounce_height: f32,
}

impl MotionModel {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            fall_speed: cfg.fall_speed,
            note_size: cfg.note_size,
            fast_multiplier: cfg.fast_mode_multiplier,
            bounce_duration: cfg.bounce_duration,
            bounce_height: cfg.bounce_height,
        }
    }

    #[inline(always)]
    pub fn speed(&self, fast: bool) -> f32 {
        if fast { self.fall_speed * self.fast_multiplier } else { self.fall_speed }
    }

    #[inline(always)]
    pub fn spawn_offset(&self) -> f32 {
        -self.note_size
    }

    /// Top-edge position. Never above the spawn offset.
    #[inline(always)]
    pub fn position(&self, spawn_time: f32, elapsed: f32, speed: f32) -> f32 {
        position(self.spawn_offset(), spawn_time, elapsed, speed)
    }

    /// Fraction of the bounce completed, in [0, 1].
    #[inline(always)]
    pub fn bounce_progress(&self, hit_time: f32, elapsed: f32) -> f32 {
        if self.bounce_duration <= 0.0 {
            return 1.0;
        }
        ((elapsed - hit_time) / self.bounce_duration).clamp(0.0, 1.0)
    }

    #[inline(always)]
    pub fn bounce_done(&self, hit_time: f32, elapsed: f32) -> bool {
        elapsed - hit_time >= self.bounce_duration
    }

    /// Upward displacement of a hit note.
    #[inline(always)]
    pub fn bounce_offset(&self, progress: f32) -> f32 {
        bounce_curve(progress) * self.bounce_height
    }
}

impl Default for MotionModel {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[inline(always)]
pub fn position(base_offset: f32, spawn_time: f32, elapsed: f32, speed: f32) -> f32 {
    base_offset + speed * (elapsed - spawn_time).max(0.0)
}

/// Rises fast and eases to the peak: 1 - (p - 1)^2.
#[inline(always)]
pub fn bounce_curve(progress: f32) -> f32 {
    let p = progress.clamp(0.0, 1.0);
    1.0 - (p - 1.0) * (p - 1.0)
}
