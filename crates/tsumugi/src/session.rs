use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    config::DownloadConfig,
    download::SegmentDownloadPool,
    error::{TsumugiError, TsumugiResult},
    hls::{write_local_playlist, KeyCache, ManifestParser, SegmentFetcher},
    merge::concat_segments,
    progress::ProgressReporter,
    util::http::HttpClient,
};

/// Outcome of a session, handed back to whoever tracks the download task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub success: bool,
    pub total_segments: usize,
    pub downloaded_segments: usize,
    pub failed_segments: Vec<u64>,
    /// Part of `failed_segments` saved with their encrypted bytes
    pub undecrypted_segments: Vec<u64>,
    pub cancelled: bool,
    pub playlist: Option<PathBuf>,
    pub merged: Option<PathBuf>,
}

/// One playlist download: owns the HTTP client, the key cache and the cancellation token.
///
/// Sessions share nothing, several of them can run in the same process.
pub struct DownloadSession {
    config: DownloadConfig,
    client: HttpClient,
    keys: Arc<KeyCache>,
    token: CancellationToken,
    progress: Option<Arc<dyn ProgressReporter>>,
}

impl DownloadSession {
    pub fn new(config: DownloadConfig, token: CancellationToken) -> TsumugiResult<Self> {
        let headers = config.header_options().build()?;
        let client = HttpClient::new(headers, config.timeout())?;

        let mut keys = KeyCache::new(client.clone());
        if let Some(key) = &config.key {
            keys = keys.with_manual_key(key)?;
        }

        Ok(Self {
            config,
            client,
            keys: Arc::new(keys),
            token,
            progress: None,
        })
    }

    pub fn with_progress<P>(mut self, progress: P) -> Self
    where
        P: ProgressReporter + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    pub async fn run<P>(&self, manifest_url: Url, output_dir: P) -> TsumugiResult<SessionReport>
    where
        P: AsRef<Path>,
    {
        let output_dir = output_dir.as_ref();
        if let Some(cookies) = &self.config.cookies {
            self.client.add_cookies(cookies, manifest_url.clone())?;
        }

        let parser = ManifestParser::new(self.client.clone());
        let segments = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(TsumugiError::Cancelled),
            segments = parser.parse(manifest_url) => segments?,
        };

        let mut builder = SegmentDownloadPool::builder()
            .workers(self.config.workers())
            .retry_policy(self.config.retry_policy())
            .cancellation(self.token.clone());
        if let Some(progress) = &self.progress {
            builder = builder.shared_progress(progress.clone());
        }
        let fetcher = SegmentFetcher::new(self.client.clone(), self.keys.clone());
        let report = builder
            .build(fetcher)
            .download_all(&segments, output_dir)
            .await?;

        let playlist = if report.cancelled {
            None
        } else {
            Some(write_local_playlist(&segments, output_dir).await?)
        };

        let merged = match &self.config.output_file {
            Some(output_file) if report.is_success() => {
                concat_segments(&segments, output_dir, output_file).await?;
                Some(output_file.clone())
            }
            Some(output_file) => {
                log::warn!(
                    "Download incomplete, {} is not merged.",
                    output_file.display()
                );
                None
            }
            None => None,
        };

        Ok(SessionReport {
            success: report.is_success(),
            total_segments: report.total,
            downloaded_segments: report.downloaded,
            failed_segments: report.failed,
            undecrypted_segments: report.undecrypted,
            cancelled: report.cancelled,
            playlist,
            merged,
        })
    }
}
