use std::path::Path;

/// Check if a file looks like an MP3 based on its extension
///
/// Only the file selection layer uses this; the probe and conversion code
/// accept any bytes.
pub fn is_mp3_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("mp3"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recognizes_mp3() {
        assert!(is_mp3_file(Path::new("test.mp3")));
        assert!(is_mp3_file(Path::new("LOUD.MP3")));
        assert!(is_mp3_file(Path::new("/music/a.b.Mp3")));
    }

    #[test]
    fn test_rejects_other_files() {
        assert!(!is_mp3_file(Path::new("test.flac")));
        assert!(!is_mp3_file(Path::new("test.txt")));
        assert!(!is_mp3_file(Path::new("mp3")));
    }
}
