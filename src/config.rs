use configparser::ini::Ini;
use log::{info, warn};
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

// Window
pub const WINDOW_TITLE: &str = "Anime Rhythm";
pub const SCREEN_WIDTH: u32 = 1280;
pub const SCREEN_HEIGHT: u32 = 720;
pub const FPS: f32 = 60.0;

// Gameplay Constants
pub const ARROW_SIZE: f32 = 80.0;
pub const ARROW_SPEED: f32 = 850.0; // Units per second, downward
pub const HIT_ZONE_Y: f32 = SCREEN_HEIGHT as f32 - 100.0;
pub const HIT_MARGIN: f32 = 15.0;
pub const MISS_LINE_Y: f32 = SCREEN_HEIGHT as f32;
pub const FAST_MODE_MULTIPLIER: f32 = 2.0;
pub const BOUNCE_DURATION: f32 = 0.2;
pub const BOUNCE_HEIGHT: f32 = 30.0;
pub const SHAKE_COMBO_THRESHOLD: u32 = 50;
pub const SHAKE_AMPLITUDE: f32 = 5.0;

// Scoring
pub const BASE_HIT_POINTS: u64 = 100;
pub const COMBO_BONUS_STEP: u32 = 5;
pub const COMBO_BONUS_POINTS: u64 = 10;

// Beat extraction fallback (used when audio analysis fails)
pub const FALLBACK_BEAT_SPACING: f32 = 0.5;
pub const FALLBACK_BEAT_COUNT: usize = 30;

// Audio
pub const FAST_MODE_VOLUME: f32 = 0.7;
pub const FAST_MODE_PLAYBACK_RATE: f32 = 1.0;

// Transient on-screen messages ("ERROR LOADING SONG!")
pub const TRANSIENT_MESSAGE_DURATION: f32 = 1.0;

// Song discovery
pub const SOUNDTRACK_DIR_NAME: &str = "Rhythm Game soundtrack";

const CONFIG_PATH: &str = "anime_rhythm.ini";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(String),
    #[error("invalid value for {section}.{key}: {value}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub fall_speed: f32,
    pub hit_zone_y: f32,
    pub hit_margin: f32,
    pub note_size: f32,
    pub miss_line_y: f32,
    pub fast_mode_multiplier: f32,
    pub bounce_duration: f32,
    pub bounce_height: f32,
    /// Fixed lane seed for reproducible charts; `None` draws a fresh seed per song.
    pub lane_seed: Option<u64>,
    pub fast_mode_volume: f32,
    pub fast_mode_playback_rate: f32,
    pub start_in_fast_mode: bool,
    pub soundtrack_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fall_speed: ARROW_SPEED,
            hit_zone_y: HIT_ZONE_Y,
            hit_margin: HIT_MARGIN,
            note_size: ARROW_SIZE,
            miss_line_y: MISS_LINE_Y,
            fast_mode_multiplier: FAST_MODE_MULTIPLIER,
            bounce_duration: BOUNCE_DURATION,
            bounce_height: BOUNCE_HEIGHT,
            lane_seed: None,
            fast_mode_volume: FAST_MODE_VOLUME,
            fast_mode_playback_rate: FAST_MODE_PLAYBACK_RATE,
            start_in_fast_mode: false,
            soundtrack_dir: None,
        }
    }
}

impl Config {
    /// Builds a config from parsed ini data. Missing keys keep their defaults;
    /// malformed ones are reported and also keep their defaults.
    pub fn from_ini(conf: &Ini) -> (Self, Vec<ConfigError>) {
        let mut cfg = Config::default();
        let mut errors = Vec::new();

        let mut read_f32 = |section: &'static str, key: &'static str, slot: &mut f32, positive: bool| {
            let Some(raw) = conf.get(section, key) else { return; };
            match raw.trim().parse::<f32>() {
                Ok(v) if v.is_finite() && (!positive || v > 0.0) => *slot = v,
                _ => errors.push(ConfigError::InvalidValue { section, key, value: raw }),
            }
        };

        read_f32("Gameplay", "FallSpeed", &mut cfg.fall_speed, true);
        read_f32("Gameplay", "HitZoneY", &mut cfg.hit_zone_y, false);
        read_f32("Gameplay", "HitMargin", &mut cfg.hit_margin, true);
        read_f32("Gameplay", "NoteSize", &mut cfg.note_size, true);
        read_f32("Gameplay", "MissLineY", &mut cfg.miss_line_y, false);
        read_f32("Gameplay", "FastModeMultiplier", &mut cfg.fast_mode_multiplier, true);
        read_f32("Gameplay", "BounceDuration", &mut cfg.bounce_duration, true);
        read_f32("Gameplay", "BounceHeight", &mut cfg.bounce_height, false);
        read_f32("Audio", "FastModeVolume", &mut cfg.fast_mode_volume, false);
        read_f32("Audio", "FastModePlaybackRate", &mut cfg.fast_mode_playback_rate, true);

        if let Some(raw) = conf.get("Gameplay", "LaneSeed") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                match trimmed.parse::<u64>() {
                    Ok(seed) => cfg.lane_seed = Some(seed),
                    Err(_) => errors.push(ConfigError::InvalidValue {
                        section: "Gameplay",
                        key: "LaneSeed",
                        value: raw,
                    }),
                }
            }
        }

        if let Some(raw) = conf.get("Audio", "StartInFastMode") {
            match raw.trim() {
                "1" | "true" | "True" => cfg.start_in_fast_mode = true,
                "0" | "false" | "False" => cfg.start_in_fast_mode = false,
                _ => errors.push(ConfigError::InvalidValue {
                    section: "Audio",
                    key: "StartInFastMode",
                    value: raw,
                }),
            }
        }

        if let Some(raw) = conf.get("Paths", "SoundtrackDir") {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                cfg.soundtrack_dir = Some(PathBuf::from(trimmed));
            }
        }

        cfg.fast_mode_volume = cfg.fast_mode_volume.clamp(0.0, 1.0);
        (cfg, errors)
    }

    pub fn from_ini_str(text: &str) -> Result<(Self, Vec<ConfigError>), ConfigError> {
        let mut conf = Ini::new_cs();
        conf.read(text.to_string()).map_err(ConfigError::Read)?;
        Ok(Self::from_ini(&conf))
    }
}

// Global static for the loaded configuration.
static CONFIG: Lazy<Mutex<Config>> = Lazy::new(|| Mutex::new(Config::default()));

fn create_default_file(path: &Path) -> Result<(), std::io::Error> {
    info!("Config file not found, creating defaults in '{}'.", path.display());
    let d = Config::default();
    let mut conf = Ini::new_cs();
    conf.set("Gameplay", "FallSpeed", Some(d.fall_speed.to_string()));
    conf.set("Gameplay", "HitZoneY", Some(d.hit_zone_y.to_string()));
    conf.set("Gameplay", "HitMargin", Some(d.hit_margin.to_string()));
    conf.set("Gameplay", "NoteSize", Some(d.note_size.to_string()));
    conf.set("Gameplay", "MissLineY", Some(d.miss_line_y.to_string()));
    conf.set("Gameplay", "FastModeMultiplier", Some(d.fast_mode_multiplier.to_string()));
    conf.set("Gameplay", "BounceDuration", Some(d.bounce_duration.to_string()));
    conf.set("Gameplay", "BounceHeight", Some(d.bounce_height.to_string()));
    conf.set("Gameplay", "LaneSeed", Some(String::new()));
    conf.set("Audio", "FastModeVolume", Some(d.fast_mode_volume.to_string()));
    conf.set("Audio", "FastModePlaybackRate", Some(d.fast_mode_playback_rate.to_string()));
    conf.set("Audio", "StartInFastMode", Some("0".to_string()));
    conf.set("Paths", "SoundtrackDir", Some(String::new()));
    conf.write(path)
}

pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        if let Err(e) = create_default_file(path) {
            warn!("Failed to create default config file: {}", e);
            return Config::default();
        }
    }

    let mut conf = Ini::new_cs();
    if let Err(e) = conf.load(path) {
        warn!("Failed to load '{}', using defaults: {}", path.display(), e);
        return Config::default();
    }

    let (cfg, errors) = Config::from_ini(&conf);
    for e in errors {
        warn!("{}; keeping default.", e);
    }
    cfg
}

pub fn load() {
    let cfg = load_from(Path::new(CONFIG_PATH));
    info!("Configuration loaded: {:?}", cfg);
    *CONFIG.lock().unwrap() = cfg;
}

/// Returns a copy of the currently loaded configuration.
pub fn get() -> Config {
    CONFIG.lock().unwrap().clone()
}
