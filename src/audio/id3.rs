//! ID3v2 tag reading
//!
//! Reads the title, artist and album text frames from an ID3v2.2/2.3/2.4
//! tag at the start of a buffer. Everything here fails soft: a missing or
//! damaged tag yields an empty `TagSet`, never an error.

/// Magic bytes at the start of every ID3v2 tag
pub const ID3_MAGIC: &[u8; 3] = b"ID3";

/// Size of the fixed ID3v2 tag header
pub const ID3_HEADER_LEN: usize = 10;

/// Text fields read from an ID3v2 tag
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

impl TagSet {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none()
    }
}

/// Decode a synch-safe integer (7 significant bits per byte)
pub fn synchsafe_u32(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .fold(0u32, |acc, b| (acc << 7) | u32::from(b & 0x7F))
}

/// Length of a leading ID3v2 region (header + body), or 0 if there is none
pub fn tag_region_len(bytes: &[u8]) -> usize {
    if bytes.len() < ID3_HEADER_LEN || &bytes[..3] != ID3_MAGIC {
        return 0;
    }
    ID3_HEADER_LEN + synchsafe_u32(&bytes[6..10]) as usize
}

/// Frame layout for a tag version
struct FrameLayout {
    id_len: usize,
    size_len: usize,
    header_len: usize,
}

impl FrameLayout {
    fn for_version(version: u8) -> Self {
        if version == 2 {
            Self { id_len: 3, size_len: 3, header_len: 6 }
        } else {
            // v2.3 / v2.4: 4-byte id, 4-byte size, 2 flag bytes
            Self { id_len: 4, size_len: 4, header_len: 10 }
        }
    }
}

/// Read the text tags from the start of `bytes`
pub fn read_tags(bytes: &[u8]) -> TagSet {
    let mut tags = TagSet::default();

    if bytes.len() < ID3_HEADER_LEN || &bytes[..3] != ID3_MAGIC {
        return tags;
    }

    let version = bytes[3];
    let layout = FrameLayout::for_version(version);
    let end = tag_region_len(bytes).min(bytes.len());
    let mut offset = ID3_HEADER_LEN;

    // The loop always requires a full 10-byte window, even for v2.2 frames
    while offset + ID3_HEADER_LEN <= end {
        let id_bytes = &bytes[offset..offset + layout.id_len];
        let id = String::from_utf8_lossy(id_bytes);
        if id.trim_matches(|c: char| c.is_whitespace() || c == '\0').is_empty() {
            break;
        }

        let size_bytes = &bytes[offset + layout.id_len..offset + layout.id_len + layout.size_len];
        let frame_size = size_bytes
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));

        let frame_start = offset + layout.header_len;
        if frame_start + frame_size > bytes.len() {
            log::debug!("ID3 frame {} overruns buffer, stopping", id);
            break;
        }

        if id.starts_with('T') {
            let text = decode_text_frame(&bytes[frame_start..frame_start + frame_size]);
            assign_field(&mut tags, &id, text);
        }

        offset = frame_start + frame_size;
    }

    tags
}

/// Store `text` in the field `id` maps to, unless that field is already set
fn assign_field(tags: &mut TagSet, id: &str, text: String) {
    if text.is_empty() {
        return;
    }
    let slot = match id {
        "TIT2" | "TT2" | "TIT" => &mut tags.title,
        "TPE1" | "TP1" => &mut tags.artist,
        "TALB" | "TAL" => &mut tags.album,
        _ => return,
    };
    if slot.is_none() {
        *slot = Some(text);
    }
}

/// Decode a text frame payload: encoding byte followed by the text
///
/// Undecodable payloads come back as an empty string.
fn decode_text_frame(payload: &[u8]) -> String {
    let Some((&encoding, text)) = payload.split_first() else {
        return String::new();
    };

    let decoded = match encoding {
        0 => Some(text.iter().map(|&b| char::from(b)).collect::<String>()),
        3 => String::from_utf8(text.to_vec()).ok(),
        _ => decode_utf16(text),
    };

    decoded
        .unwrap_or_default()
        .replace('\0', "")
        .trim()
        .to_string()
}

/// Decode UTF-16 text, honouring a byte-order mark (little-endian otherwise)
fn decode_utf16(text: &[u8]) -> Option<String> {
    let (big_endian, body) = match text {
        [0xFE, 0xFF, rest @ ..] => (true, rest),
        [0xFF, 0xFE, rest @ ..] => (false, rest),
        _ => (false, text),
    };

    let units: Vec<u16> = body
        .chunks_exact(2)
        .map(|pair| {
            if big_endian {
                u16::from_be_bytes([pair[0], pair[1]])
            } else {
                u16::from_le_bytes([pair[0], pair[1]])
            }
        })
        .collect();

    String::from_utf16(&units).ok()
}
