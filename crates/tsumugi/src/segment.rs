use std::path::{Path, PathBuf};

use url::Url;

/// Key method name for AES-128 in CBC mode, the only method this crate decrypts.
pub const METHOD_AES_128: &str = "AES-128";

/// Encryption metadata attached to one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentKey {
    /// Value of the `METHOD` attribute, e.g. `AES-128` or `SAMPLE-AES`.
    pub method: String,
    /// Absolute URL of the key file.
    pub uri: Url,
    /// Explicit IV as written in the playlist, `0x` prefix included if present.
    pub iv: Option<String>,
}

impl SegmentKey {
    pub fn is_aes128(&self) -> bool {
        self.method.eq_ignore_ascii_case(METHOD_AES_128)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Position in the playlist, starts from 0
    pub index: u64,
    /// Media sequence number from the m3u8 file
    pub media_sequence: u64,
    pub url: Url,
    /// Duration in seconds, copied from `#EXTINF`
    pub duration: f32,
    pub key: Option<SegmentKey>,
}

impl Segment {
    pub fn is_encrypted(&self) -> bool {
        self.key.is_some()
    }

    pub fn file_name(&self) -> String {
        segment_file_name(self.index)
    }

    pub fn path_in<P>(&self, dir: P) -> PathBuf
    where
        P: AsRef<Path>,
    {
        dir.as_ref().join(self.file_name())
    }
}

pub fn segment_file_name(index: u64) -> String {
    format!("segment_{index:06}.ts")
}
