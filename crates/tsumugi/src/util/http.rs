use std::{
    sync::{Arc, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use reqwest::{header::HeaderMap, Client, IntoUrl};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};

use crate::error::{TsumugiError, TsumugiResult};

/// Shared HTTP client of one download session.
///
/// Every request inherits the session headers and the per-request timeout, so a timeout is
/// reported the same way as any other network failure.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(headers: HeaderMap, timeout: Duration) -> TsumugiResult<Self> {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .cookie_provider(cookies_store.clone())
            .build()?;

        Ok(Self {
            client,
            cookies_store,
        })
    }

    /// Add cookies in `Cookie` header format, e.g. `a=1; b=2`.
    pub fn add_cookies(&self, cookies: &str, url: impl IntoUrl) -> TsumugiResult<()> {
        let url = url.into_url()?;
        let mut lock = self
            .cookies_store
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for cookie in cookies.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            if let Err(e) = lock.parse(cookie, &url) {
                log::warn!("Ignored invalid cookie {cookie}: {e}");
            }
        }
        Ok(())
    }

    /// GET a resource and return its body, failing on any non-2xx status.
    pub async fn get_bytes(&self, url: impl IntoUrl) -> TsumugiResult<Bytes> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            if let Ok(body) = response.text().await {
                tracing::debug!("Error body: {body}");
            }
            return Err(TsumugiError::HttpError(status));
        }

        Ok(response.bytes().await?)
    }
}
