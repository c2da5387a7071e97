use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::sync::OnceCell;
use url::Url;

use crate::{
    error::{TsumugiError, TsumugiResult},
    util::http::HttpClient,
};

pub type Aes128Key = [u8; 16];

type KeyCell = Arc<OnceCell<Result<Aes128Key, String>>>;

/// AES-128 keys of one download session, indexed by key URI.
///
/// The first lookup of a URI fetches it while concurrent lookups wait on the same cell, so
/// each URI is requested at most once. Failures are remembered as well: every segment that
/// depends on a broken key sees the same error without another request.
pub struct KeyCache {
    client: HttpClient,
    manual_key: Option<Aes128Key>,
    keys: Mutex<HashMap<Url, KeyCell>>,
}

impl KeyCache {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            manual_key: None,
            keys: Mutex::new(HashMap::new()),
        }
    }

    /// Answer every lookup with a fixed hex-encoded key instead of fetching it.
    pub fn with_manual_key(mut self, key: &str) -> TsumugiResult<Self> {
        let key = key.trim();
        let bytes = hex::decode(key.strip_prefix("0x").unwrap_or(key))?;
        let key = Aes128Key::try_from(bytes.as_slice())
            .map_err(|_| TsumugiError::InvalidHexKey(key.to_string()))?;
        self.manual_key = Some(key);
        Ok(self)
    }

    pub async fn get(&self, uri: &Url) -> TsumugiResult<Aes128Key> {
        if let Some(key) = self.manual_key {
            return Ok(key);
        }

        let cell = {
            let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
            keys.entry(uri.clone()).or_default().clone()
        };

        cell.get_or_init(|| self.fetch(uri))
            .await
            .clone()
            .map_err(|reason| TsumugiError::KeyFetch {
                uri: uri.clone(),
                reason,
            })
    }

    async fn fetch(&self, uri: &Url) -> Result<Aes128Key, String> {
        tracing::info!("Fetching key {uri}");
        let data = self
            .client
            .get_bytes(uri.clone())
            .await
            .map_err(|e| e.to_string())?;

        match Aes128Key::try_from(data.as_ref()) {
            Ok(key) => Ok(key),
            Err(_) => {
                tracing::error!("Key {uri} has {} bytes, 16 expected.", data.len());
                Err(format!("expected a 16-byte key, got {} bytes", data.len()))
            }
        }
    }
}
