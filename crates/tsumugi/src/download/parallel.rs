use std::{
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{TsumugiError, TsumugiResult},
    progress::ProgressReporter,
    segment::Segment,
    SegmentPayload, SegmentSource,
};

pub const DEFAULT_WORKERS: u32 = 6;
pub const DEFAULT_RETRIES: u32 = 3;

/// How often and how fast a failed segment is tried again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Delay before the first retry, doubled for every following one. Zero retries at once.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            base_delay: Duration::ZERO,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry`, starting from 1.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let multiplier = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Result of one [`SegmentDownloadPool::download_all`] run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DownloadReport {
    pub total: usize,
    /// Segments present on disk at the end of the run, including skipped ones.
    pub downloaded: usize,
    /// Segments that were already on disk before the run.
    pub skipped: usize,
    /// Indices of segments that failed, sorted.
    pub failed: Vec<u64>,
    /// Failed segments whose encrypted bytes were saved anyway, sorted. A later run keeps
    /// these files as they are.
    pub undecrypted: Vec<u64>,
    pub cancelled: bool,
}

impl DownloadReport {
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.failed.is_empty() && self.downloaded == self.total
    }
}

enum SegmentOutcome {
    Done,
    /// Saved, but the bytes are still encrypted.
    Undecrypted(TsumugiError),
    Failed(TsumugiError),
    Cancelled,
}

/// Downloads a list of segments into a directory with a bounded number of workers.
///
/// Every segment is saved as `segment_NNNNNN.ts`. Non-empty files left by a previous run are
/// kept, so calling [`download_all`](Self::download_all) again only fetches what is missing.
pub struct SegmentDownloadPool<S> {
    source: Arc<S>,
    workers: NonZeroU32,
    retry: RetryPolicy,
    progress: Option<Arc<dyn ProgressReporter>>,
    token: CancellationToken,
}

impl SegmentDownloadPool<()> {
    pub fn builder() -> SegmentDownloadPoolBuilder {
        SegmentDownloadPoolBuilder::new()
    }
}

impl<S> SegmentDownloadPool<S>
where
    S: SegmentSource,
{
    pub async fn download_all<P>(
        &self,
        segments: &[Segment],
        output_dir: P,
    ) -> TsumugiResult<DownloadReport>
    where
        P: AsRef<Path>,
    {
        let output_dir = output_dir.as_ref();
        tokio::fs::create_dir_all(output_dir).await?;

        let total = segments.len();
        let downloaded = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(Mutex::new(Vec::new()));
        let undecrypted = Arc::new(Mutex::new(Vec::new()));
        let cancelled = Arc::new(AtomicBool::new(false));

        let mut pending = Vec::new();
        for segment in segments {
            let path = segment.path_in(output_dir);
            let part = part_path(&path);
            match tokio::fs::remove_file(&part).await {
                Ok(()) => tracing::debug!("Removed stale {}", part.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }

            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() && meta.len() > 0 => {
                    tracing::debug!("File {} already exists, ignoring.", path.display());
                    let completed = downloaded.fetch_add(1, Ordering::SeqCst) + 1;
                    self.report(completed, total);
                }
                Ok(meta) if meta.is_file() => {
                    tracing::warn!("File {} is empty, downloading again.", path.display());
                    tokio::fs::remove_file(&path).await?;
                    pending.push((segment.clone(), path));
                }
                Ok(_) => {
                    return Err(TsumugiError::IOError(std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        format!("{} exists and is not a file", path.display()),
                    )));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    pending.push((segment.clone(), path));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let skipped = downloaded.load(Ordering::SeqCst);
        if pending.is_empty() {
            tracing::info!("All {total} segments already exist, nothing to download.");
        } else {
            tracing::info!(
                "Start downloading {} of {total} segments with {} thread(s).",
                pending.len(),
                self.workers.get()
            );
        }

        let permits = Arc::new(Semaphore::new(self.workers.get() as usize));
        for (segment, path) in pending {
            let permit = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    cancelled.store(true, Ordering::SeqCst);
                    break;
                }
                permit = permits.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                break;
            };

            let source = self.source.clone();
            let token = self.token.clone();
            let retry = self.retry;
            let progress = self.progress.clone();
            let downloaded = downloaded.clone();
            let failed = failed.clone();
            let undecrypted = undecrypted.clone();
            let cancelled = cancelled.clone();

            tokio::spawn(async move {
                let filename = segment.file_name();
                // Workaround for `higher-ranked lifetime error`
                let outcome =
                    assert_send(download_segment(source.as_ref(), &segment, &path, &retry, &token))
                        .await;
                match outcome {
                    SegmentOutcome::Done => {
                        let completed = downloaded.fetch_add(1, Ordering::SeqCst) + 1;
                        let percentage = completed as f32 / total as f32 * 100.;
                        tracing::info!(
                            "Processing {filename} finished. ({completed} / {total} or {percentage:.2}%)"
                        );
                        if let Some(progress) = progress {
                            progress.report(completed, total);
                        }
                    }
                    SegmentOutcome::Undecrypted(e) => {
                        tracing::error!("Processing {filename} saved without decryption. {e}");
                        failed.lock().await.push(segment.index);
                        undecrypted.lock().await.push(segment.index);
                    }
                    SegmentOutcome::Failed(e) => {
                        tracing::error!(
                            "Processing {filename} failed, max retries exceed, drop. {e}"
                        );
                        failed.lock().await.push(segment.index);
                    }
                    SegmentOutcome::Cancelled => {
                        cancelled.store(true, Ordering::SeqCst);
                    }
                }

                // drop permit to release the semaphore
                drop(permit);
            });
        }

        // wait for all tasks to finish
        let _ = permits.acquire_many(self.workers.get()).await;

        let mut failed = std::mem::take(&mut *failed.lock().await);
        failed.sort_unstable();
        if !failed.is_empty() {
            tracing::error!("Failed to download {} segments:", failed.len());
            for index in failed.iter() {
                tracing::error!("  - {}", crate::segment::segment_file_name(*index));
            }
        }

        let mut undecrypted = std::mem::take(&mut *undecrypted.lock().await);
        undecrypted.sort_unstable();
        if !undecrypted.is_empty() {
            tracing::warn!(
                "{} segments are saved encrypted and will be kept by the next run, delete them to download again:",
                undecrypted.len()
            );
            for index in undecrypted.iter() {
                tracing::warn!("  - {}", segment_path(output_dir, *index).display());
            }
        }

        let report = DownloadReport {
            total,
            downloaded: downloaded.load(Ordering::SeqCst),
            skipped,
            failed,
            undecrypted,
            cancelled: cancelled.load(Ordering::SeqCst),
        };
        if report.cancelled {
            tracing::warn!(
                "Download cancelled after {} / {total} segments.",
                report.downloaded
            );
        }
        Ok(report)
    }

    fn report(&self, completed: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress.report(completed, total);
        }
    }
}

async fn download_segment<S>(
    source: &S,
    segment: &Segment,
    path: &Path,
    retry: &RetryPolicy,
    token: &CancellationToken,
) -> SegmentOutcome
where
    S: SegmentSource,
{
    let mut retries = 0;
    loop {
        if token.is_cancelled() {
            return SegmentOutcome::Cancelled;
        }

        let result = tokio::select! {
            _ = token.cancelled() => return SegmentOutcome::Cancelled,
            result = fetch_and_save(source, segment, path) => result,
        };
        let error = match result {
            Ok(None) => return SegmentOutcome::Done,
            Ok(Some(e)) => return SegmentOutcome::Undecrypted(e),
            Err(e) => e,
        };

        if retries >= retry.retries {
            return SegmentOutcome::Failed(error);
        }
        retries += 1;
        tracing::warn!(
            "Processing {} failed, retry later ({retries}/{}). {error}",
            segment.file_name(),
            retry.retries
        );

        let delay = retry.delay_for_retry(retries);
        if !delay.is_zero() {
            tokio::select! {
                _ = token.cancelled() => return SegmentOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Fetch one segment and move it into place. Returns the decryption error of a segment that
/// was saved encrypted.
async fn fetch_and_save<S>(
    source: &S,
    segment: &Segment,
    path: &Path,
) -> TsumugiResult<Option<TsumugiError>>
where
    S: SegmentSource,
{
    let (data, undecrypted) = match source.fetch_segment(segment).await? {
        SegmentPayload::Plain(data) => (data, None),
        SegmentPayload::Undecrypted { data, error } => (data, Some(error)),
    };
    if data.is_empty() {
        return Err(TsumugiError::SegmentFetch {
            index: segment.index,
            reason: "empty response body".to_string(),
        });
    }

    // an interrupted write must never leave a non-empty file at the final path
    let part = part_path(path);
    tokio::fs::write(&part, &data).await?;
    tokio::fs::rename(&part, path).await?;
    Ok(undecrypted)
}

// https://github.com/rust-lang/rust/issues/102211#issuecomment-1371414544
fn assert_send<'a, T>(
    fut: impl std::future::Future<Output = T> + Send + 'a,
) -> impl std::future::Future<Output = T> + Send + 'a {
    fut
}

fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(crate::segment::segment_file_name(index))
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

pub struct SegmentDownloadPoolBuilder {
    workers: NonZeroU32,
    retry: RetryPolicy,
    progress: Option<Arc<dyn ProgressReporter>>,
    token: Option<CancellationToken>,
}

impl SegmentDownloadPoolBuilder {
    pub fn new() -> Self {
        Self {
            workers: NonZeroU32::new(DEFAULT_WORKERS).unwrap_or(NonZeroU32::MIN),
            retry: RetryPolicy::default(),
            progress: None,
            token: None,
        }
    }

    pub fn workers(mut self, workers: NonZeroU32) -> Self {
        self.workers = workers;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retry.retries = retries;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn progress<P>(self, progress: P) -> Self
    where
        P: ProgressReporter + 'static,
    {
        self.shared_progress(Arc::new(progress))
    }

    pub fn shared_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn build<S>(self, source: S) -> SegmentDownloadPool<S>
    where
        S: SegmentSource,
    {
        SegmentDownloadPool {
            source: Arc::new(source),
            workers: self.workers,
            retry: self.retry,
            progress: self.progress,
            token: self.token.unwrap_or_default(),
        }
    }
}

impl Default for SegmentDownloadPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
