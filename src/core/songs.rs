use crate::config::SOUNDTRACK_DIR_NAME;
use directories::UserDirs;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongEntry {
    pub title: String,
    pub path: PathBuf,
}

/// `<downloads>/Rhythm Game soundtrack`, falling back to the home directory
/// and finally the working directory when the platform has no Downloads folder.
pub fn soundtrack_dir() -> PathBuf {
    match UserDirs::new() {
        Some(dirs) => dirs
            .download_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dirs.home_dir().join("Downloads"))
            .join(SOUNDTRACK_DIR_NAME),
        None => PathBuf::from(SOUNDTRACK_DIR_NAME),
    }
}

/// Makes sure the folder exists so players know where to drop songs.
pub fn ensure_dir(dir: &Path) {
    if dir.is_dir() {
        return;
    }
    match fs::create_dir_all(dir) {
        Ok(()) => info!("Created soundtrack folder '{}'.", dir.display()),
        Err(e) => warn!("Could not create soundtrack folder '{}': {}", dir.display(), e),
    }
}

/// Lists `*.wav` files (case-insensitive) in `dir`, sorted by title.
pub fn scan(dir: &Path) -> Vec<SongEntry> {
    info!("Scanning for songs in '{}'...", dir.display());
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Songs directory '{}' not readable: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut songs: Vec<SongEntry> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_wav(path))
        .filter_map(|path| {
            let title = path.file_stem()?.to_string_lossy().into_owned();
            Some(SongEntry { title, path })
        })
        .collect();

    songs.sort_by(|a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()));
    info!("Finished scan. Found {} songs.", songs.len());
    songs
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"))
}
