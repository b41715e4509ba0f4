//! Speed-change conversion
//!
//! Turns a list of MP3 files into sped-up copies through a transcoding
//! engine (ffmpeg in production), one file at a time.

pub mod batch;
pub mod engine;
pub mod ffmpeg;
pub mod filter;
pub mod output;
pub mod progress;

pub use batch::{BatchEvent, BatchOptions, BatchOrchestrator, BatchReport};
pub use ffmpeg::FfmpegEngine;
pub use output::{ArchiveSink, DirectorySink, ResultSink};

use std::path::{Path, PathBuf};

/// Output file name for `name` converted at `speed`
///
/// `song.mp3` at 1.5 becomes `song-x1.5.mp3`; a name without an extension
/// just gets the suffix.
pub fn output_name(name: &str, speed: f64) -> String {
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());

    match path.extension() {
        Some(ext) => format!("{}-x{}.{}", stem, speed, ext.to_string_lossy()),
        None => format!("{}-x{}", stem, speed),
    }
}

/// Find the ffmpeg binary
///
/// Checked in order: an explicit path, `resources/bin/ffmpeg` under
/// CARGO_MANIFEST_DIR (development), the app bundle and next-to-executable
/// locations (release), then `ffmpeg` on PATH.
pub fn get_ffmpeg_path(explicit: Option<&Path>) -> Result<PathBuf, String> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(format!("ffmpeg not found at {}", path.display()));
    }

    if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
        let dev_path = PathBuf::from(manifest_dir)
            .join("resources")
            .join("bin")
            .join("ffmpeg");

        if dev_path.exists() {
            log::debug!("Found ffmpeg at development path: {:?}", dev_path);
            return Ok(dev_path);
        }
    }

    if let Ok(exe_path) = std::env::current_exe()
        && let Some(exe_dir) = exe_path.parent()
    {
        // macOS app bundle: Contents/MacOS/../Resources/bin/ffmpeg
        let bundle_path = exe_dir
            .join("..")
            .join("Resources")
            .join("bin")
            .join("ffmpeg");

        if bundle_path.exists() {
            log::debug!("Found ffmpeg at bundle path: {:?}", bundle_path);
            return Ok(bundle_path);
        }

        let local_path = exe_dir.join("resources").join("bin").join("ffmpeg");
        if local_path.exists() {
            log::debug!("Found ffmpeg at local path: {:?}", local_path);
            return Ok(local_path);
        }
    }

    if let Some(path) = find_on_path("ffmpeg") {
        log::debug!("Found ffmpeg on PATH: {:?}", path);
        return Ok(path);
    }

    Err("ffmpeg binary not found. Install ffmpeg or pass --ffmpeg".to_string())
}

fn find_on_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// Locate ffmpeg and check that it is executable
pub fn verify_ffmpeg(explicit: Option<&Path>) -> Result<PathBuf, String> {
    let path = get_ffmpeg_path(explicit)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(&path)
            .map_err(|e| format!("Failed to get ffmpeg metadata: {}", e))?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(format!("ffmpeg at {:?} is not executable", path));
        }
    }

    log::info!("ffmpeg verified at: {:?}", path);
    Ok(path)
}
