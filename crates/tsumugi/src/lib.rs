pub mod config;
pub mod download;
pub mod error;
pub mod hls;
pub mod merge;
pub mod progress;
pub mod segment;
pub mod session;
pub mod util;

pub use config::DownloadConfig;
pub use error::{TsumugiError, TsumugiResult};
pub use progress::ProgressReporter;
pub use segment::{Segment, SegmentKey};
pub use session::{DownloadSession, SessionReport};
pub use util::http::HttpClient;

/// Bytes of one segment, ready to be written to disk.
#[derive(Debug)]
pub enum SegmentPayload {
    Plain(bytes::Bytes),
    /// The segment is encrypted but could not be decrypted. `data` is the raw response body.
    Undecrypted {
        data: bytes::Bytes,
        error: TsumugiError,
    },
}

/// ┌──────────────┐              ┌─────────────────────┐   fetch_segment  ┌───────────────┐
/// │              │  Segment 1   │                     ├──────────────────►               │
/// │              ├──────────────►                     ◄──────────────────┤               │
/// │              │  Segment 2   │ SegmentDownloadPool │                  │ SegmentSource │
/// │   Playlist   ├──────────────►                     ├──────────────────►               │
/// │              │     ...      │     [Semaphore]     ◄──────────────────┤               │
/// │              ├──────────────►                     │                  └───────────────┘
/// │              │ Segment Last │                     │
/// │              ├──────────────►                     ├───► segment_NNNNNN.ts
/// └──────────────┘              └─────────────────────┘
pub trait SegmentSource: Send + Sync + 'static {
    fn fetch_segment(
        &self,
        segment: &Segment,
    ) -> impl std::future::Future<Output = TsumugiResult<SegmentPayload>> + Send;
}
