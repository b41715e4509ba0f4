//! FFmpeg subprocess engine
//!
//! Implements `TranscodeEngine` on top of an ffmpeg binary. The working
//! namespace is a per-session scratch directory; ffmpeg runs with that
//! directory as its cwd so the orchestrator can use bare file names.
//! Progress is only available as stderr log lines (`time=...`).

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;

use super::engine::{
    EngineCapabilities, HandlerSlot, LogHandler, ProgressHooks, RatioHandler, TranscodeEngine,
};

/// Flags prepended to every command
const BASE_ARGS: [&str; 3] = ["-hide_banner", "-nostdin", "-y"];

/// Transcoding engine backed by an ffmpeg binary
#[derive(Debug)]
pub struct FfmpegEngine {
    ffmpeg_path: PathBuf,
    scratch_dir: PathBuf,
    hooks: HandlerSlot,
}

impl FfmpegEngine {
    /// Create an engine with a fresh scratch directory
    pub fn new(ffmpeg_path: PathBuf) -> Result<Self, String> {
        let scratch_dir = std::env::temp_dir()
            .join("mp3speed_scratch")
            .join(uuid::Uuid::new_v4().to_string());

        std::fs::create_dir_all(&scratch_dir)
            .map_err(|e| format!("Failed to create scratch directory: {}", e))?;

        log::debug!("Engine scratch directory: {}", scratch_dir.display());

        Ok(Self {
            ffmpeg_path,
            scratch_dir,
            hooks: HandlerSlot::default(),
        })
    }

    #[cfg(test)]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Resolve a namespace entry, refusing anything that is not a bare name
    fn entry_path(&self, name: &str) -> Result<PathBuf, String> {
        let file_name = Path::new(name)
            .file_name()
            .filter(|n| n.to_string_lossy() == name)
            .ok_or_else(|| format!("Invalid scratch file name: {:?}", name))?;
        Ok(self.scratch_dir.join(file_name))
    }
}

impl Drop for FfmpegEngine {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.scratch_dir) {
            log::warn!(
                "Failed to remove scratch directory {}: {}",
                self.scratch_dir.display(),
                e
            );
        }
    }
}

impl ProgressHooks for FfmpegEngine {
    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            ratio_progress: false,
            log_lines: true,
        }
    }

    fn set_ratio_handler(&self, handler: Option<RatioHandler>) {
        self.hooks.set_ratio(handler);
    }

    fn set_log_handler(&self, handler: Option<LogHandler>) {
        self.hooks.set_log(handler);
    }
}

impl TranscodeEngine for FfmpegEngine {
    async fn write_file(&self, name: &str, data: Vec<u8>) -> Result<(), String> {
        let path = self.entry_path(name)?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| format!("Failed to write {}: {}", name, e))
    }

    async fn exec(&self, args: &[String]) -> Result<(), String> {
        log::debug!("Running ffmpeg {}", args.join(" "));

        let mut child = Command::new(&self.ffmpeg_path)
            .args(BASE_ARGS)
            .args(args)
            .current_dir(&self.scratch_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Failed to spawn ffmpeg: {}", e))?;

        let mut last_line = String::new();
        if let Some(mut stderr) = child.stderr.take() {
            let mut lines = LineSplitter::default();
            let mut buf = [0u8; 4096];
            loop {
                let n = stderr
                    .read(&mut buf)
                    .await
                    .map_err(|e| format!("Failed to read ffmpeg output: {}", e))?;
                if n == 0 {
                    break;
                }
                for line in lines.push(&buf[..n]) {
                    self.hooks.emit_log(&line);
                    last_line = line;
                }
            }
            if let Some(line) = lines.finish() {
                self.hooks.emit_log(&line);
                last_line = line;
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| format!("Failed to wait for ffmpeg: {}", e))?;

        if status.success() {
            Ok(())
        } else {
            let detail = if last_line.is_empty() {
                "Unknown error"
            } else {
                last_line.as_str()
            };
            Err(format!("ffmpeg exited with status {}: {}", status, detail))
        }
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>, String> {
        let path = self.entry_path(name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| format!("Failed to read {}: {}", name, e))
    }

    async fn delete_file(&self, name: &str) -> Result<(), String> {
        let path = self.entry_path(name)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| format!("Failed to delete {}: {}", name, e))
    }
}

/// Splits a byte stream into lines on `\n` or `\r`
///
/// ffmpeg rewrites its status line with carriage returns, so both count as
/// line ends. Empty lines are dropped.
#[derive(Debug, Default)]
struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in chunk {
            if b == b'\n' || b == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).trim().to_string());
                    self.pending.clear();
                }
            } else {
                self.pending.push(b);
            }
        }
        lines.retain(|l| !l.is_empty());
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        (!line.is_empty()).then_some(line)
    }
}
