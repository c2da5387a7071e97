use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum TsumugiError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Failed to fetch m3u8 file {url}: {reason}")]
    ManifestFetch { url: Url, reason: String },

    #[error("No segment found in playlist {0}")]
    EmptyPlaylist(Url),

    #[error("Master playlist is not supported, choose one of {} variants", variants.len())]
    MasterPlaylist { variants: Vec<Url> },

    #[error("Failed to fetch key {uri}: {reason}")]
    KeyFetch { uri: Url, reason: String },

    #[error("Failed to fetch segment {index}: {reason}")]
    SegmentFetch { index: u64, reason: String },

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Invalid IV: {0}")]
    InvalidIv(String),

    #[error("Invalid hex key: {0}")]
    InvalidHexKey(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Download cancelled")]
    Cancelled,

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    HexDecodeError(#[from] hex::FromHexError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    ConfigError(#[from] toml::de::Error),
}

pub type TsumugiResult<T> = Result<T, TsumugiError>;
