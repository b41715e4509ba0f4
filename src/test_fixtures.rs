//! Test fixtures for probing and conversion tests
//!
//! Builds synthetic ID3v2 tags and MPEG-1 Layer III frames byte by byte, and
//! provides an in-memory transcoding engine and result sink so batch runs can
//! be tested without ffmpeg.

#![cfg(test)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::conversion::engine::{
    EngineCapabilities, HandlerSlot, LogHandler, ProgressHooks, RatioHandler, TranscodeEngine,
};
use crate::conversion::output::ResultSink;

/// Encode `value` as a 4-byte synch-safe integer
pub fn synchsafe_bytes(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7F) as u8,
        ((value >> 14) & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        (value & 0x7F) as u8,
    ]
}

/// An ID3v2 tag of the given major version wrapping `frames`
pub fn id3_tag(major_version: u8, frames: &[Vec<u8>]) -> Vec<u8> {
    let body: Vec<u8> = frames.concat();
    let mut tag = Vec::with_capacity(10 + body.len());
    tag.extend_from_slice(b"ID3");
    tag.push(major_version);
    tag.push(0); // revision
    tag.push(0); // flags
    tag.extend_from_slice(&synchsafe_bytes(body.len() as u32));
    tag.extend_from_slice(&body);
    tag
}

/// A v2.3/v2.4 frame: 4-byte id, 4-byte size, 2 flag bytes, encoding byte, payload
pub fn text_frame_v23(id: &str, encoding: u8, payload: &[u8]) -> Vec<u8> {
    assert_eq!(id.len(), 4);
    let size = (payload.len() + 1) as u32;
    let mut frame = Vec::new();
    frame.extend_from_slice(id.as_bytes());
    frame.extend_from_slice(&size.to_be_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.push(encoding);
    frame.extend_from_slice(payload);
    frame
}

/// A v2.2 frame: 3-byte id, 3-byte size, encoding byte, payload
pub fn text_frame_v22(id: &str, encoding: u8, payload: &[u8]) -> Vec<u8> {
    assert_eq!(id.len(), 3);
    let size = (payload.len() + 1) as u32;
    let mut frame = Vec::new();
    frame.extend_from_slice(id.as_bytes());
    frame.extend_from_slice(&size.to_be_bytes()[1..]);
    frame.push(encoding);
    frame.extend_from_slice(payload);
    frame
}

/// One MPEG-1 Layer III frame (no padding, no CRC) filled with zeros
///
/// `bitrate_idx` and `sample_rate_idx` index the standard tables, e.g. 9 and
/// 0 for 128kbps at 44100Hz.
pub fn mpeg_frame(bitrate_idx: u8, sample_rate_idx: u8) -> Vec<u8> {
    const BITRATES: [u32; 16] = [
        0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
    ];
    const SAMPLE_RATES: [u32; 4] = [44100, 48000, 32000, 0];

    let bitrate = BITRATES[bitrate_idx as usize];
    let sample_rate = SAMPLE_RATES[sample_rate_idx as usize];
    let len = (144_000 * bitrate / sample_rate) as usize;

    let mut frame = vec![0u8; len.max(4)];
    frame[0] = 0xFF;
    frame[1] = 0xFB;
    frame[2] = (bitrate_idx << 4) | (sample_rate_idx << 2);
    frame
}

/// `count` identical frames back to back
pub fn mpeg_stream(count: usize, bitrate_idx: u8, sample_rate_idx: u8) -> Vec<u8> {
    mpeg_frame(bitrate_idx, sample_rate_idx).repeat(count)
}

/// Scripted in-memory transcoding engine
///
/// `exec` copies the `-i` input entry to the output entry (the last
/// argument), emitting the scripted ratios and log lines through whatever
/// handlers are installed.
#[derive(Debug, Default)]
pub struct MockEngine {
    caps: EngineCapabilities,
    files: Mutex<HashMap<String, Vec<u8>>>,
    hooks: HandlerSlot,
    ratio_script: Vec<f64>,
    log_script: Vec<String>,
    exec_delay: Option<Duration>,
    failing: HashSet<String>,
    exec_calls: Mutex<Vec<Vec<String>>>,
    attach_conflicts: AtomicUsize,
}

impl MockEngine {
    pub fn new(caps: EngineCapabilities) -> Self {
        Self {
            caps,
            ..Self::default()
        }
    }

    pub fn with_ratio_script(mut self, ratios: Vec<f64>) -> Self {
        self.ratio_script = ratios;
        self
    }

    pub fn with_log_script(mut self, lines: Vec<String>) -> Self {
        self.log_script = lines;
        self
    }

    /// Make every `exec` take this long (in tokio time)
    pub fn with_exec_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = Some(delay);
        self
    }

    /// Fail any `exec` whose input entry is `name`
    pub fn failing_on(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn has_ratio_handler(&self) -> bool {
        self.hooks.has_ratio()
    }

    pub fn has_log_handler(&self) -> bool {
        self.hooks.has_log()
    }

    pub fn emit_ratio(&self, ratio: f64) {
        self.hooks.emit_ratio(ratio);
    }

    pub fn emit_log(&self, line: &str) {
        self.hooks.emit_log(line);
    }

    /// Entries currently in the namespace, sorted
    pub fn file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn exec_calls(&self) -> Vec<Vec<String>> {
        self.exec_calls.lock().unwrap().clone()
    }

    /// Times a handler was installed while another was still attached
    pub fn attach_conflicts(&self) -> usize {
        self.attach_conflicts.load(Ordering::SeqCst)
    }
}

impl ProgressHooks for MockEngine {
    fn capabilities(&self) -> EngineCapabilities {
        self.caps
    }

    fn set_ratio_handler(&self, handler: Option<RatioHandler>) {
        if handler.is_some() && self.hooks.has_ratio() {
            self.attach_conflicts.fetch_add(1, Ordering::SeqCst);
        }
        self.hooks.set_ratio(handler);
    }

    fn set_log_handler(&self, handler: Option<LogHandler>) {
        if handler.is_some() && self.hooks.has_log() {
            self.attach_conflicts.fetch_add(1, Ordering::SeqCst);
        }
        self.hooks.set_log(handler);
    }
}

/// Scratch entry named by an engine argument, with any `file:` prefix removed
fn entry_name(arg: &str) -> &str {
    arg.strip_prefix("file:").unwrap_or(arg)
}

impl TranscodeEngine for MockEngine {
    async fn write_file(&self, name: &str, data: Vec<u8>) -> Result<(), String> {
        self.files.lock().unwrap().insert(name.to_string(), data);
        Ok(())
    }

    async fn exec(&self, args: &[String]) -> Result<(), String> {
        self.exec_calls.lock().unwrap().push(args.to_vec());

        let input = args
            .iter()
            .position(|a| a == "-i")
            .and_then(|i| args.get(i + 1))
            .map(|a| entry_name(a))
            .ok_or_else(|| "missing -i".to_string())?;
        let output = args
            .last()
            .map(|a| entry_name(a))
            .ok_or_else(|| "missing output".to_string())?;

        if let Some(delay) = self.exec_delay {
            tokio::time::sleep(delay).await;
        }

        for ratio in &self.ratio_script {
            self.hooks.emit_ratio(*ratio);
        }
        for line in &self.log_script {
            self.hooks.emit_log(line);
        }

        if self.failing.contains(input) {
            return Err(format!("mock failure for {}", input));
        }

        let mut files = self.files.lock().unwrap();
        let data = files
            .get(input)
            .cloned()
            .ok_or_else(|| format!("{}: No such file or directory", input))?;
        files.insert(output.to_string(), data);
        Ok(())
    }

    async fn read_file(&self, name: &str) -> Result<Vec<u8>, String> {
        self.files
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| format!("{}: not found", name))
    }

    async fn delete_file(&self, name: &str) -> Result<(), String> {
        self.files
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| format!("{}: not found", name))
    }
}

/// Result sink that keeps outputs in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    pub outputs: Vec<(String, Vec<u8>)>,
    pub finished: bool,
    reject: Option<String>,
}

impl MemorySink {
    /// A sink that refuses the output called `name`
    pub fn rejecting(name: &str) -> Self {
        Self {
            reject: Some(name.to_string()),
            ..Self::default()
        }
    }
}

impl ResultSink for MemorySink {
    fn accept(&mut self, name: &str, data: Vec<u8>) -> Result<(), String> {
        if self.reject.as_deref() == Some(name) {
            return Err(format!("refused {}", name));
        }
        self.outputs.push((name.to_string(), data));
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<PathBuf>, String> {
        self.finished = true;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synchsafe_bytes() {
        assert_eq!(synchsafe_bytes(257), [0, 0, 2, 1]);
        assert_eq!(synchsafe_bytes(0x0FFF_FFFF), [0x7F, 0x7F, 0x7F, 0x7F]);
    }

    #[test]
    fn test_mpeg_frame_sizes() {
        assert_eq!(mpeg_frame(9, 0).len(), 417);
        assert_eq!(mpeg_frame(9, 1).len(), 384);
        assert_eq!(mpeg_stream(3, 9, 0).len(), 3 * 417);
    }

    #[test]
    fn test_v22_frame_layout() {
        let frame = text_frame_v22("TT2", 0, b"ab");
        assert_eq!(frame, vec![b'T', b'T', b'2', 0, 0, 3, 0, b'a', b'b']);
    }

    #[tokio::test]
    async fn test_mock_engine_copies_input_to_output() {
        let engine = MockEngine::new(EngineCapabilities::default());
        engine.write_file("in.mp3", vec![7, 8]).await.unwrap();
        let args: Vec<String> = ["-i", "in.mp3", "out.mp3"].iter().map(|s| s.to_string()).collect();
        engine.exec(&args).await.unwrap();
        assert_eq!(engine.read_file("out.mp3").await.unwrap(), vec![7, 8]);
        assert_eq!(engine.file_names(), vec!["in.mp3", "out.mp3"]);
    }
}
