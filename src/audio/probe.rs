//! Audio probing: tags + frame scan merged into cached metadata

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

use serde::Serialize;

use super::{id3, mpeg};

/// Bitrate assumed when no valid frame was found
pub const FALLBACK_BITRATE_KBPS: u32 = 128;

/// Opaque identity of an input file
///
/// Files loaded from disk are identified by path, modification time and size;
/// in-memory buffers by name and contents. Two different files that happen to
/// share a name never share an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AudioId(String);

impl AudioId {
    fn from_file(path: &Path, mtime: u64, size: u64) -> Self {
        let mut hasher = DefaultHasher::new();
        path.to_string_lossy().hash(&mut hasher);
        mtime.hash(&mut hasher);
        size.hash(&mut hasher);
        AudioId(format!("file:{:016x}", hasher.finish()))
    }

    fn from_content(name: &str, data: &[u8]) -> Self {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        data.hash(&mut hasher);
        AudioId(format!("mem:{:016x}", hasher.finish()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AudioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An input file held in memory
#[derive(Debug, Clone)]
pub struct AudioFile {
    pub id: AudioId,
    /// File name without directories (e.g. `song.mp3`)
    pub name: String,
    /// Where the bytes were read from, if they came from disk
    pub path: Option<PathBuf>,
    data: Arc<Vec<u8>>,
}

impl AudioFile {
    /// Read a file from disk
    pub async fn load(path: &Path) -> Result<Self, String> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

        let mtime = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown.mp3".to_string());

        Ok(Self {
            id: AudioId::from_file(path, mtime, data.len() as u64),
            name,
            path: Some(path.to_path_buf()),
            data: Arc::new(data),
        })
    }

    /// Wrap an in-memory buffer
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        let name = name.into();
        Self {
            id: AudioId::from_content(&name, &data),
            name,
            path: None,
            data: Arc::new(data),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// An owned copy of the bytes, for handing to the transcoding engine
    pub fn copy_bytes(&self) -> Vec<u8> {
        self.data.as_ref().clone()
    }

    /// File name with its extension removed
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.name)
    }
}

/// Metadata derived from an audio file's bytes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    pub title: String,
    pub author: String,
    pub album: String,
    pub duration_secs: f64,
    pub bitrate_kbps: u32,
}

/// Compute metadata for a file without touching any cache
pub fn probe_bytes(file: &AudioFile) -> Metadata {
    let bytes = file.bytes();
    let tags = id3::read_tags(bytes);
    let stats = mpeg::scan(bytes, 0);

    let bitrate_kbps = if stats.last_bitrate_kbps > 0 {
        stats.last_bitrate_kbps
    } else {
        FALLBACK_BITRATE_KBPS
    };

    Metadata {
        title: tags.title.unwrap_or_else(|| file.stem().to_string()),
        author: tags.artist.unwrap_or_default(),
        album: tags.album.unwrap_or_default(),
        duration_secs: stats.duration_secs,
        bitrate_kbps,
    }
}

/// Cache of probed metadata, keyed by file identity
///
/// Entries live until `invalidate` or `clear` is called.
#[derive(Debug, Default)]
pub struct ProbeStore {
    cache: Mutex<HashMap<AudioId, Arc<Metadata>>>,
    /// Number of probes that actually scanned bytes
    scans: AtomicUsize,
}

impl ProbeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for `file`, computed on first request
    pub fn probe(&self, file: &AudioFile) -> Arc<Metadata> {
        if let Some(meta) = self.cache.lock().unwrap().get(&file.id) {
            return meta.clone();
        }

        let meta = Arc::new(probe_bytes(file));
        self.scans.fetch_add(1, Ordering::SeqCst);
        log::debug!(
            "Probed {}: {:.1}s @ {}kbps, title {:?}",
            file.name,
            meta.duration_secs,
            meta.bitrate_kbps,
            meta.title
        );

        self.cache
            .lock()
            .unwrap()
            .entry(file.id.clone())
            .or_insert(meta)
            .clone()
    }

    /// Cached metadata for `id`, if any
    pub fn get(&self, id: &AudioId) -> Option<Arc<Metadata>> {
        self.cache.lock().unwrap().get(id).cloned()
    }

    /// Forget the metadata for one file (e.g. when it is removed from the list)
    pub fn invalidate(&self, id: &AudioId) -> bool {
        self.cache.lock().unwrap().remove(id).is_some()
    }

    pub fn clear(&self) {
        self.cache.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{id3_tag, mpeg_stream, text_frame_v23};

    fn tagged_file(name: &str) -> AudioFile {
        let mut data = id3_tag(
            3,
            &[
                text_frame_v23("TIT2", 3, "Tagged".as_bytes()),
                text_frame_v23("TPE1", 3, "Someone".as_bytes()),
            ],
        );
        data.extend_from_slice(&mpeg_stream(20, 11, 0));
        AudioFile::from_bytes(name, data)
    }

    #[test]
    fn test_probe_merges_tags_and_frames() {
        let meta = probe_bytes(&tagged_file("a.mp3"));
        assert_eq!(meta.title, "Tagged");
        assert_eq!(meta.author, "Someone");
        assert_eq!(meta.album, "");
        assert_eq!(meta.bitrate_kbps, 192);
        assert!(meta.duration_secs > 0.5);
    }

    #[test]
    fn test_title_falls_back_to_stem() {
        let file = AudioFile::from_bytes("My Track.MP3", mpeg_stream(3, 9, 0));
        let meta = probe_bytes(&file);
        assert_eq!(meta.title, "My Track");
        assert_eq!(meta.author, "");
    }

    #[test]
    fn test_bitrate_falls_back_to_128() {
        let file = AudioFile::from_bytes("noise.mp3", vec![0x42; 64]);
        let meta = probe_bytes(&file);
        assert_eq!(meta.bitrate_kbps, FALLBACK_BITRATE_KBPS);
        assert_eq!(meta.duration_secs, 0.0);
    }

    #[test]
    fn test_probe_is_cached() {
        let store = ProbeStore::new();
        let file = tagged_file("song.mp3");

        let first = store.probe(&file);
        let second = store.probe(&file);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.scan_count(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_same_name_different_content_does_not_collide() {
        let store = ProbeStore::new();
        let a = AudioFile::from_bytes("song.mp3", mpeg_stream(3, 9, 0));
        let b = AudioFile::from_bytes("song.mp3", mpeg_stream(3, 14, 0));

        assert_eq!(store.probe(&a).bitrate_kbps, 128);
        assert_eq!(store.probe(&b).bitrate_kbps, 320);
        assert_eq!(store.scan_count(), 2);
    }

    #[test]
    fn test_invalidate_forces_rescan() {
        let store = ProbeStore::new();
        let file = tagged_file("song.mp3");

        store.probe(&file);
        assert!(store.invalidate(&file.id));
        assert!(store.get(&file.id).is_none());
        store.probe(&file);
        assert_eq!(store.scan_count(), 2);

        store.clear();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_stem_and_copy() {
        let file = AudioFile::from_bytes("dir-less.name.mp3", vec![1, 2, 3]);
        assert_eq!(file.stem(), "dir-less.name");
        assert_eq!(file.copy_bytes(), vec![1, 2, 3]);
        assert_eq!(file.size(), 3);
    }

    #[tokio::test]
    async fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.mp3");
        std::fs::write(&path, mpeg_stream(2, 9, 0)).unwrap();

        let file = AudioFile::load(&path).await.unwrap();
        assert_eq!(file.name, "disk.mp3");
        assert_eq!(file.path.as_deref(), Some(path.as_path()));
        assert!(file.id.as_str().starts_with("file:"));
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let result = AudioFile::load(Path::new("/nonexistent/file.mp3")).await;
        assert!(result.is_err());
    }
}
