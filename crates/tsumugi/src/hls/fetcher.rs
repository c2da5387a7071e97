use std::sync::Arc;

use crate::{
    error::{TsumugiError, TsumugiResult},
    hls::{decrypt::decrypt, key::KeyCache},
    segment::Segment,
    util::http::HttpClient,
    SegmentPayload, SegmentSource,
};

/// MPEG-TS packets start with this byte.
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Downloads a single segment and decrypts it when it carries an AES-128 key.
pub struct SegmentFetcher {
    client: HttpClient,
    keys: Arc<KeyCache>,
}

impl SegmentFetcher {
    pub fn new(client: HttpClient, keys: Arc<KeyCache>) -> Self {
        Self { client, keys }
    }

    pub async fn fetch(&self, segment: &Segment) -> TsumugiResult<SegmentPayload> {
        tracing::debug!("Fetching segment {} from {}", segment.index, segment.url);
        let data = self
            .client
            .get_bytes(segment.url.clone())
            .await
            .map_err(|e| TsumugiError::SegmentFetch {
                index: segment.index,
                reason: e.to_string(),
            })?;
        if data.is_empty() {
            return Err(TsumugiError::SegmentFetch {
                index: segment.index,
                reason: "empty response body".to_string(),
            });
        }

        let Some(key) = &segment.key else {
            check_sync_byte(segment, &data);
            return Ok(SegmentPayload::Plain(data));
        };

        if !key.is_aes128() {
            tracing::warn!(
                "Segment {} uses unsupported method {}, saving it without decryption.",
                segment.index,
                key.method
            );
            return Ok(SegmentPayload::Plain(data));
        }

        let decrypted = match self.keys.get(&key.uri).await {
            Ok(aes_key) => decrypt(data.clone(), segment, &aes_key),
            Err(e) => Err(e),
        };
        match decrypted {
            Ok(plain) => {
                check_sync_byte(segment, &plain);
                Ok(SegmentPayload::Plain(plain))
            }
            Err(error) => {
                tracing::error!("Can not decrypt segment {}: {error}", segment.index);
                Ok(SegmentPayload::Undecrypted { data, error })
            }
        }
    }
}

impl SegmentSource for SegmentFetcher {
    async fn fetch_segment(&self, segment: &Segment) -> TsumugiResult<SegmentPayload> {
        self.fetch(segment).await
    }
}

fn check_sync_byte(segment: &Segment, data: &[u8]) {
    if data.first() != Some(&TS_SYNC_BYTE) {
        tracing::warn!(
            "Segment {} does not start with a TS sync byte, it may not be a valid transport stream.",
            segment.index
        );
    }
}
