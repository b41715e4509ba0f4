//! Logging configuration for MP3 Speed
//!
//! Logs go to the terminal and to a file at
//! `~/Library/Logs/MP3-Speed/mp3-speed.log` on macOS
//! (`<local data dir>/MP3-Speed/logs/mp3-speed.log` elsewhere).

use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

const LOG_FILE_NAME: &str = "mp3-speed.log";

/// Log files above this size are moved aside at startup
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Get the log directory path
pub fn get_log_directory() -> Option<PathBuf> {
    if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library").join("Logs").join("MP3-Speed"))
    } else {
        dirs::data_local_dir().map(|d| d.join("MP3-Speed").join("logs"))
    }
}

/// Get the current log file path
pub fn get_log_file_path() -> Option<PathBuf> {
    get_log_directory().map(|d| d.join(LOG_FILE_NAME))
}

/// Move `log_path` to `<name>.old` if it has grown past the size limit
fn rotate_if_large(log_path: &Path) -> bool {
    match fs::metadata(log_path) {
        Ok(metadata) if metadata.len() > MAX_LOG_BYTES => {
            let backup_path = log_path.with_extension("log.old");
            fs::rename(log_path, backup_path).is_ok()
        }
        _ => false,
    }
}

fn log_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build()
}

/// Initialize the logging system
///
/// The terminal shows info and above (debug with `verbose`); the file always
/// captures debug. Returns the log file path when file logging is active.
pub fn init_logging(verbose: bool) -> Option<PathBuf> {
    let term_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let log_dir = match get_log_directory() {
        Some(d) => d,
        None => {
            eprintln!("Warning: Could not determine log directory");
            init_terminal_only(term_level);
            return None;
        }
    };

    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        init_terminal_only(term_level);
        return None;
    }

    let log_path = log_dir.join(LOG_FILE_NAME);
    rotate_if_large(&log_path);

    let log_file = match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file: {}", e);
            init_terminal_only(term_level);
            return None;
        }
    };

    let config = log_config();
    let loggers: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(term_level, config.clone(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(LevelFilter::Debug, config, log_file),
    ];

    if CombinedLogger::init(loggers).is_err() {
        eprintln!("Warning: Logger already initialized");
    }

    log::info!("=== MP3 Speed session started ===");
    log::debug!("Log file: {}", log_path.display());

    Some(log_path)
}

/// Terminal-only logging, used when the log file cannot be opened
fn init_terminal_only(level: LevelFilter) {
    let term_logger = TermLogger::new(level, log_config(), TerminalMode::Mixed, ColorChoice::Auto);
    let _ = CombinedLogger::init(vec![term_logger]);
}
