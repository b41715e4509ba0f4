//! Contract between the batch orchestrator and a transcoding engine
//!
//! An engine owns a private file namespace: the orchestrator writes the input
//! bytes in, runs one command, reads the output bytes back and deletes both.
//! Engines may also offer one progress handler slot of each kind; only one
//! job at a time may have a handler installed.

use std::sync::{Arc, Mutex};

/// Receives a completion ratio in [0, 1]
pub type RatioHandler = Arc<dyn Fn(f64) + Send + Sync>;

/// Receives one line of free-form engine log output
pub type LogHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Which progress signals an engine can deliver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCapabilities {
    pub ratio_progress: bool,
    pub log_lines: bool,
}

/// Progress handler registration on an engine
pub trait ProgressHooks {
    fn capabilities(&self) -> EngineCapabilities;

    /// Install or (with `None`) remove the ratio handler
    fn set_ratio_handler(&self, handler: Option<RatioHandler>);

    /// Install or (with `None`) remove the log-line handler
    fn set_log_handler(&self, handler: Option<LogHandler>);
}

/// A transcoding engine with its own working namespace
#[allow(async_fn_in_trait)]
pub trait TranscodeEngine: ProgressHooks {
    async fn write_file(&self, name: &str, data: Vec<u8>) -> Result<(), String>;

    /// Run one command; resolves when the engine has finished
    async fn exec(&self, args: &[String]) -> Result<(), String>;

    async fn read_file(&self, name: &str) -> Result<Vec<u8>, String>;

    async fn delete_file(&self, name: &str) -> Result<(), String>;
}

/// Refer to a scratch entry through ffmpeg's `file:` protocol
///
/// Keeps names like `-intro.mp3` or `part1:2.mp3` from being read as an
/// option or a protocol.
pub fn entry_url(name: &str) -> String {
    format!("file:{}", name)
}

/// Argument list for one speed-change transcode
pub fn transcode_args(
    input_name: &str,
    filter_spec: &str,
    codec: &str,
    bitrate_kbps: u32,
    output_name: &str,
) -> Vec<String> {
    vec![
        "-i".to_string(),
        entry_url(input_name),
        "-af".to_string(),
        filter_spec.to_string(),
        "-codec:a".to_string(),
        codec.to_string(),
        "-b:a".to_string(),
        format!("{}k", bitrate_kbps),
        "-map_metadata".to_string(),
        "0".to_string(),
        "-id3v2_version".to_string(),
        "3".to_string(),
        entry_url(output_name),
    ]
}

/// Storage for the handler slots, shared by engine implementations
#[derive(Default)]
pub struct HandlerSlot {
    ratio: Mutex<Option<RatioHandler>>,
    log: Mutex<Option<LogHandler>>,
}

impl HandlerSlot {
    pub fn set_ratio(&self, handler: Option<RatioHandler>) {
        *self.ratio.lock().unwrap() = handler;
    }

    pub fn set_log(&self, handler: Option<LogHandler>) {
        *self.log.lock().unwrap() = handler;
    }

    /// Forward a ratio to the installed handler, if any
    #[cfg(test)]
    pub fn emit_ratio(&self, ratio: f64) {
        // Clone out so the lock is not held while the handler runs
        let handler = self.ratio.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(ratio);
        }
    }

    /// Forward a log line to the installed handler, if any
    pub fn emit_log(&self, line: &str) {
        let handler = self.log.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(line);
        }
    }

    pub fn has_ratio(&self) -> bool {
        self.ratio.lock().unwrap().is_some()
    }

    pub fn has_log(&self) -> bool {
        self.log.lock().unwrap().is_some()
    }
}

impl std::fmt::Debug for HandlerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSlot")
            .field("ratio", &self.has_ratio())
            .field("log", &self.has_log())
            .finish()
    }
}
