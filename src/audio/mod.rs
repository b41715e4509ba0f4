// Audio module - byte-level MP3 inspection (tags, frames) and probing

pub mod detection;
pub mod id3;
pub mod mpeg;
pub mod probe;

pub use detection::is_mp3_file;
pub use probe::{AudioFile, Metadata, ProbeStore};
