//! Input discovery and display formatting
//!
//! Expands the paths given on the command line into a list of MP3 files and
//! formats durations and sizes for the probe listing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::audio::is_mp3_file;

/// Expand files and directories into the MP3 files to convert
///
/// Directories are walked recursively (sorted by name). Files are kept in the
/// order given; a file whose name matches an earlier one is skipped, since
/// both would produce the same output name.
pub fn collect_inputs(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen_names = HashSet::new();
    let mut inputs = Vec::new();

    for path in paths {
        for file in expand_path(path) {
            let Some(name) = file.file_name().map(|n| n.to_os_string()) else {
                continue;
            };
            if seen_names.insert(name) {
                inputs.push(file);
            } else {
                log::warn!("Skipping {}: a file with the same name is already queued", file.display());
            }
        }
    }

    log::debug!("Collected {} input files from {} paths", inputs.len(), paths.len());
    inputs
}

fn expand_path(path: &Path) -> Vec<PathBuf> {
    if path.is_dir() {
        WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_mp3_file(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect()
    } else if is_mp3_file(path) {
        if !path.exists() {
            log::warn!("Input not found: {}", path.display());
            return Vec::new();
        }
        vec![path.to_path_buf()]
    } else {
        log::warn!("Skipping non-MP3 input: {}", path.display());
        Vec::new()
    }
}

/// Format seconds as `HH:MM:SS`; zero or negative durations show as all zeros
pub fn format_hms(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "00:00:00".to_string();
    }
    let total = seconds.floor() as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Format a byte count in binary megabytes, e.g. `1.50 MB`
pub fn format_size_mb(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
}

/// Total playing time after speeding every file up by `speed`
pub fn total_after_conversion(durations: &[f64], speed: f64) -> f64 {
    if speed <= 0.0 {
        return 0.0;
    }
    durations.iter().sum::<f64>() / speed
}
