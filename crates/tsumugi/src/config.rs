use std::{collections::BTreeMap, num::NonZeroU32, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    download::{RetryPolicy, DEFAULT_RETRIES, DEFAULT_WORKERS},
    error::TsumugiResult,
    util::header::HeaderOptions,
};

pub const MIN_WORKERS: u32 = 1;
pub const MAX_WORKERS: u32 = 16;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Settings of one download session.
///
/// Can be loaded from a TOML file, every field is optional:
///
/// ```toml
/// workers = 8
/// retries = 5
/// timeout_secs = 20
/// source_page = "https://www.example.com/watch/1"
///
/// [headers]
/// "X-Requested-With" = "XMLHttpRequest"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Concurrent segment downloads, clamped to 1..=16
    pub workers: u32,
    /// Retries of a failed segment after its first attempt
    pub retries: u32,
    /// Timeout of every HTTP request in seconds
    pub timeout_secs: u64,
    /// Base delay of the exponential retry backoff. 0 retries immediately.
    pub retry_backoff_ms: u64,
    pub user_agent: Option<String>,
    /// Page the stream was found on, used to derive `Referer` and `Origin`
    pub source_page: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// Cookies in `Cookie` header format
    pub cookies: Option<String>,
    /// Hex AES-128 key used instead of the key server
    pub key: Option<String>,
    /// Concat all segments into this file after a successful download
    pub output_file: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retries: DEFAULT_RETRIES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_backoff_ms: 0,
            user_agent: None,
            source_page: None,
            headers: BTreeMap::new(),
            cookies: None,
            key: None,
            output_file: None,
        }
    }
}

impl DownloadConfig {
    pub fn load<P>(path: P) -> TsumugiResult<Self>
    where
        P: AsRef<Path>,
    {
        let data = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&data)?)
    }

    pub fn workers(&self) -> NonZeroU32 {
        let workers = self.workers.clamp(MIN_WORKERS, MAX_WORKERS);
        NonZeroU32::new(workers).unwrap_or(NonZeroU32::MIN)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            base_delay: Duration::from_millis(self.retry_backoff_ms),
            ..Default::default()
        }
    }

    pub fn header_options(&self) -> HeaderOptions {
        HeaderOptions {
            user_agent: self.user_agent.clone(),
            source_page: self.source_page.clone(),
            headers: self.headers.clone(),
        }
    }
}
