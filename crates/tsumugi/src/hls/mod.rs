pub mod decrypt;
mod fetcher;
pub mod key;
pub mod parser;
pub mod playlist;

pub use fetcher::*;
pub use key::KeyCache;
pub use m3u8_rs;
pub use parser::ManifestParser;
pub use playlist::write_local_playlist;
