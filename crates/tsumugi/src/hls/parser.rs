use m3u8_rs::{Key, KeyMethod, MediaPlaylist, Playlist};
use url::Url;

use crate::{
    error::{TsumugiError, TsumugiResult},
    segment::{Segment, SegmentKey},
    util::http::HttpClient,
};

/// Turns a remote media playlist into the ordered list of segments to download.
pub struct ManifestParser {
    client: HttpClient,
}

impl ManifestParser {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub async fn parse(&self, url: Url) -> TsumugiResult<Vec<Segment>> {
        log::info!("Start fetching M3U8 file.");
        let data = self
            .client
            .get_bytes(url.clone())
            .await
            .map_err(|e| TsumugiError::ManifestFetch {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        log::info!("M3U8 file fetched.");

        parse_str(&url, &data)
    }
}

/// Parse an already fetched playlist body. Relative URIs are resolved against `playlist_url`.
pub fn parse_str<D>(playlist_url: &Url, data: D) -> TsumugiResult<Vec<Segment>>
where
    D: AsRef<[u8]>,
{
    let playlist = m3u8_rs::parse_playlist_res(data.as_ref()).map_err(|e| {
        TsumugiError::ManifestFetch {
            url: playlist_url.clone(),
            reason: format!("invalid m3u8 file: {e}"),
        }
    })?;

    match playlist {
        Playlist::MasterPlaylist(pl) => {
            let variants = pl
                .variants
                .iter()
                .map(|variant| playlist_url.join(&variant.uri))
                .collect::<Result<Vec<_>, _>>()?;
            log::error!(
                "Master playlist input detected with {} variants, a media playlist is required.",
                variants.len()
            );
            Err(TsumugiError::MasterPlaylist { variants })
        }
        Playlist::MediaPlaylist(pl) => media_segments(playlist_url, &pl),
    }
}

fn media_segments(playlist_url: &Url, playlist: &MediaPlaylist) -> TsumugiResult<Vec<Segment>> {
    if playlist.segments.is_empty() {
        return Err(TsumugiError::EmptyPlaylist(playlist_url.clone()));
    }

    let keys = carry_forward_keys(
        playlist_url,
        playlist.segments.iter().map(|segment| segment.key.as_ref()),
    )?;

    let mut segments = Vec::with_capacity(playlist.segments.len());
    for (i, (segment, key)) in playlist.segments.iter().zip(keys).enumerate() {
        let index = i as u64;
        segments.push(Segment {
            index,
            media_sequence: playlist.media_sequence + index,
            url: playlist_url.join(&segment.uri)?,
            duration: segment.duration.max(0.),
            key,
        });
    }

    let encrypted = segments.iter().filter(|s| s.is_encrypted()).count();
    log::info!(
        "Playlist parsed, {} segments found, {encrypted} encrypted.",
        segments.len()
    );
    Ok(segments)
}

/// Expand `#EXT-X-KEY` tags into the key of every segment.
///
/// `tags` yields the key tag written right before each segment, if any. A tag applies to
/// every following segment until the next one, and `METHOD=NONE` clears it.
pub fn carry_forward_keys<'a, I>(
    playlist_url: &Url,
    tags: I,
) -> TsumugiResult<Vec<Option<SegmentKey>>>
where
    I: IntoIterator<Item = Option<&'a Key>>,
{
    let mut current = None;
    let mut keys = Vec::new();
    for tag in tags {
        if let Some(tag) = tag {
            current = resolve_key(playlist_url, tag)?;
        }
        keys.push(current.clone());
    }
    Ok(keys)
}

fn resolve_key(playlist_url: &Url, key: &Key) -> TsumugiResult<Option<SegmentKey>> {
    let method = match &key.method {
        KeyMethod::None => return Ok(None),
        KeyMethod::AES128 => "AES-128".to_string(),
        KeyMethod::SampleAES => "SAMPLE-AES".to_string(),
        KeyMethod::Other(name) => name.clone(),
    };

    let Some(uri) = &key.uri else {
        return Err(TsumugiError::ManifestFetch {
            url: playlist_url.clone(),
            reason: format!("key tag with METHOD={method} has no URI"),
        });
    };

    Ok(Some(SegmentKey {
        method,
        uri: playlist_url.join(uri)?,
        iv: key.iv.clone(),
    }))
}
