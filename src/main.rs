use anime_rhythm::{app, config};
use log::{error, info, LevelFilter};
use std::error::Error;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn Error>> {
    // --- Logging Setup ---
    // Defaults first so RUST_LOG can override them.
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("anime_rhythm::core::audio", LevelFilter::Info)
        .filter_module("anime_rhythm::game", LevelFilter::Debug)
        .parse_default_env()
        .init();

    info!("Application starting...");
    config::load();

    // Optional: play a file directly instead of picking from the soundtrack folder.
    let song = std::env::args_os().nth(1).map(PathBuf::from);
    if let Some(path) = &song {
        info!("Song given on the command line: {}", path.display());
    }

    if let Err(e) = app::run(song) {
        error!("Application exited with error: {}", e);
        return Err(e);
    }

    info!("Application exited gracefully.");
    Ok(())
}
