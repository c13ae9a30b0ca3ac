use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "triquetra";
const LOG_FILE: &str = "triquetra.log";

/// Directory holding downloads and the run log.
///
/// `%ProgramData%\triquetra` on Windows, `~/.local/share/triquetra` elsewhere.
pub fn default_data_dir() -> PathBuf {
    let base = match env::consts::OS {
        "windows" => env::var_os("ProgramData")
            .map(PathBuf::from)
            .or_else(|| Some(PathBuf::from(r"C:\ProgramData"))),
        "macos" => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join("Library").join("Application Support")),
        _ => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".local").join("share")),
    }
    .unwrap_or_else(|| PathBuf::from("."));

    base.join(APP_DIR)
}

pub fn log_file(data_dir: &Path) -> PathBuf {
    data_dir.join(LOG_FILE)
}

pub fn log_file_name() -> &'static str {
    LOG_FILE
}

pub fn ensure_data_dir(data_dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(data_dir)
}
