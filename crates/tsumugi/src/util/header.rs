use std::{collections::BTreeMap, str::FromStr};

use fake_user_agent::get_chrome_rua;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, ORIGIN, PRAGMA,
    REFERER, USER_AGENT,
};
use url::Url;

use crate::error::{TsumugiError, TsumugiResult};

/// Inputs for the header set sent with every manifest, key and segment request.
///
/// Precedence, lowest first: browser-like defaults, `Referer`/`Origin` derived from
/// `source_page`, then `headers`. A header given explicitly always wins.
#[derive(Debug, Clone, Default)]
pub struct HeaderOptions {
    pub user_agent: Option<String>,
    /// Page the stream was found on.
    pub source_page: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl HeaderOptions {
    pub fn build(&self) -> TsumugiResult<HeaderMap> {
        let mut map = HeaderMap::new();
        map.insert(ACCEPT, HeaderValue::from_static("*/*"));
        map.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        map.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        map.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        let user_agent = self.user_agent.as_deref().unwrap_or_else(|| get_chrome_rua());
        map.insert(USER_AGENT, header_value(user_agent)?);

        if let Some(source_page) = &self.source_page {
            match origin_of(source_page) {
                Some(origin) => {
                    log::debug!("Referer and Origin derived from source page: {origin}");
                    let value = header_value(&origin)?;
                    map.insert(REFERER, value.clone());
                    map.insert(ORIGIN, value);
                }
                None => log::warn!("Can not derive Referer from source page {source_page}"),
            }
        }

        for (name, value) in &self.headers {
            let name = HeaderName::from_str(name.trim())
                .map_err(|_| TsumugiError::InvalidHeader(name.clone()))?;
            map.insert(name, header_value(value.trim())?);
        }

        Ok(map)
    }

    /// Add a header in `Name: value` format.
    pub fn push_line(&mut self, line: &str) -> TsumugiResult<()> {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| TsumugiError::InvalidHeader(line.to_string()))?;
        self.headers
            .insert(name.trim().to_string(), value.trim().to_string());
        Ok(())
    }
}

/// `scheme://host[:port]` of a page URL.
pub fn origin_of(page: &str) -> Option<String> {
    let url = Url::parse(page).ok()?;
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

fn header_value(value: &str) -> TsumugiResult<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| TsumugiError::InvalidHeader(value.to_string()))
}
