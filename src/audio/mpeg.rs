//! MPEG-1 Layer III frame scanning
//!
//! Walks the frame headers of an MP3 stream to estimate playback duration
//! without decoding any audio. Anything that does not look like a valid
//! MPEG-1 Layer III header is skipped one byte at a time.

use super::id3::tag_region_len;

/// Bitrate table for MPEG-1 Layer III, indexed by the 4-bit bitrate field (kbps)
const BITRATE_TABLE: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];

/// Sample-rate table for MPEG-1, indexed by the 2-bit sample-rate field (Hz)
const SAMPLE_RATE_TABLE: [u32; 4] = [44100, 48000, 32000, 0];

/// Samples per MPEG-1 Layer III frame
const SAMPLES_PER_FRAME: f64 = 1152.0;

const VERSION_MPEG1: u8 = 3;
const LAYER_III: u8 = 1;

/// Result of a frame scan
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    /// Sum of the durations of every valid frame
    pub duration_secs: f64,
    /// Bitrate of the last valid frame (0 if none was found)
    pub last_bitrate_kbps: u32,
    /// Number of valid frames seen
    pub frame_count: usize,
}

/// A decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    bitrate_kbps: u32,
    sample_rate: u32,
}

impl FrameHeader {
    /// Parse a header from the first 3 bytes of `bytes`
    fn parse(bytes: &[u8]) -> Option<Self> {
        let (b0, b1, b2) = (bytes[0], bytes[1], bytes[2]);
        if b0 != 0xFF || (b1 & 0xE0) != 0xE0 {
            return None;
        }

        let version = (b1 >> 3) & 0x03;
        let layer = (b1 >> 1) & 0x03;
        if version != VERSION_MPEG1 || layer != LAYER_III {
            return None;
        }

        let bitrate_kbps = BITRATE_TABLE[usize::from((b2 >> 4) & 0x0F)];
        let sample_rate = SAMPLE_RATE_TABLE[usize::from((b2 >> 2) & 0x03)];
        if bitrate_kbps == 0 || sample_rate == 0 {
            return None;
        }

        Some(Self { bitrate_kbps, sample_rate })
    }

    /// Frame length in bytes (padding bit is not considered)
    fn frame_len(&self) -> usize {
        (144_000 * self.bitrate_kbps / self.sample_rate) as usize
    }

    fn duration_secs(&self) -> f64 {
        SAMPLES_PER_FRAME / f64::from(self.sample_rate)
    }
}

/// Scan MPEG frames starting at `start_offset`
///
/// A leading ID3v2 tag is skipped on its own, so passing 0 is always safe.
pub fn scan(bytes: &[u8], start_offset: usize) -> FrameStats {
    let mut stats = FrameStats::default();
    let mut offset = start_offset.max(tag_region_len(bytes));
    let mut skipped = 0usize;

    while bytes.len().saturating_sub(offset) > 4 {
        match FrameHeader::parse(&bytes[offset..]) {
            Some(header) => {
                stats.duration_secs += header.duration_secs();
                stats.last_bitrate_kbps = header.bitrate_kbps;
                stats.frame_count += 1;
                offset += header.frame_len();
            }
            None => {
                skipped += 1;
                offset += 1;
            }
        }
    }

    log::debug!(
        "Frame scan: {} frames, {:.2}s, last bitrate {}kbps, {} bytes skipped",
        stats.frame_count,
        stats.duration_secs,
        stats.last_bitrate_kbps,
        skipped
    );

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{id3_tag, mpeg_frame, mpeg_stream, text_frame_v23};

    const FRAME_SECS_44K: f64 = 1152.0 / 44100.0;

    #[test]
    fn test_scan_uniform_128k_stream() {
        let n = 40;
        // bitrate index 9 = 128kbps, sample-rate index 0 = 44100Hz
        let stream = mpeg_stream(n, 9, 0);
        let stats = scan(&stream, 0);

        assert_eq!(stats.last_bitrate_kbps, 128);
        let expected = n as f64 * FRAME_SECS_44K;
        assert!(
            (stats.duration_secs - expected).abs() <= FRAME_SECS_44K,
            "duration {} should be within one frame of {}",
            stats.duration_secs,
            expected
        );
    }

    #[test]
    fn test_frame_length_formula() {
        let header = FrameHeader::parse(&[0xFF, 0xFB, 0x90, 0x00]).unwrap();
        assert_eq!(header.bitrate_kbps, 128);
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.frame_len(), 417);
    }

    #[test]
    fn test_skips_leading_id3_tag() {
        // A valid 320kbps/48kHz header hidden in a tag frame payload
        let mut data = id3_tag(
            3,
            &[
                text_frame_v23("TIT2", 3, "Song".as_bytes()),
                text_frame_v23("COMM", 0, &[b'e', b'n', b'g', 0, 0xFF, 0xFB, 0xE4, 0x00]),
            ],
        );
        data.extend_from_slice(&mpeg_stream(10, 9, 0));

        let stats = scan(&data, 0);
        assert_eq!(stats.frame_count, 10);
        assert_eq!(stats.last_bitrate_kbps, 128);
        assert!((stats.duration_secs - 10.0 * FRAME_SECS_44K).abs() < 1e-9);
    }

    #[test]
    fn test_resyncs_over_garbage() {
        let mut data = vec![0x00, 0x12, 0xFF, 0x00, 0x34];
        data.extend_from_slice(&mpeg_frame(9, 0));
        data.extend_from_slice(b"junk");
        data.extend_from_slice(&mpeg_frame(9, 0));
        data.extend_from_slice(&[0u8; 8]);
        let stats = scan(&data, 0);
        assert_eq!(stats.frame_count, 2);
    }

    #[test]
    fn test_rejects_other_versions_and_layers() {
        // MPEG-2 Layer III (version code 2)
        let mut data = vec![0xFF, 0xF3, 0x90, 0x00];
        // MPEG-1 Layer II (layer code 2)
        data.extend_from_slice(&[0xFF, 0xFD, 0x90, 0x00]);
        data.extend_from_slice(&[0u8; 16]);
        let stats = scan(&data, 0);
        assert_eq!(stats.frame_count, 0);
        assert_eq!(stats.last_bitrate_kbps, 0);
    }

    #[test]
    fn test_rejects_reserved_table_entries() {
        // bitrate index 15 (reserved) and 0 (free)
        let mut data = vec![0xFF, 0xFB, 0xF0, 0x00];
        data.extend_from_slice(&[0xFF, 0xFB, 0x00, 0x00]);
        // sample-rate index 3 (reserved)
        data.extend_from_slice(&[0xFF, 0xFB, 0x9C, 0x00]);
        data.extend_from_slice(&[0u8; 16]);
        assert_eq!(scan(&data, 0).frame_count, 0);
    }

    #[test]
    fn test_bitrate_is_last_frame_not_average() {
        let mut data = mpeg_stream(5, 14, 0); // 320kbps
        data.extend_from_slice(&mpeg_stream(1, 5, 0)); // 64kbps
        let stats = scan(&data, 0);
        assert_eq!(stats.frame_count, 6);
        assert_eq!(stats.last_bitrate_kbps, 64);
    }

    #[test]
    fn test_start_offset_is_respected() {
        let data = mpeg_stream(4, 9, 0);
        let frame_len = mpeg_frame(9, 0).len();
        let stats = scan(&data, frame_len);
        assert_eq!(stats.frame_count, 3);
    }

    #[test]
    fn test_huge_start_offset_scans_nothing() {
        assert_eq!(scan(&[0; 8], usize::MAX), FrameStats::default());
        assert_eq!(scan(&mpeg_stream(2, 9, 0), usize::MAX - 2), FrameStats::default());
    }

    #[test]
    fn test_tiny_buffers() {
        assert_eq!(scan(&[], 0), FrameStats::default());
        assert_eq!(scan(&[0xFF, 0xFB, 0x90], 0), FrameStats::default());
    }

    #[test]
    fn test_48k_frames() {
        let stream = mpeg_stream(10, 11, 1); // 192kbps @ 48000
        let stats = scan(&stream, 0);
        assert_eq!(stats.last_bitrate_kbps, 192);
        assert!((stats.duration_secs - 10.0 * 1152.0 / 48000.0).abs() < 1e-9);
    }
}
