use std::{ops::Deref, sync::Arc, time::Duration};

use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, ClientBuilder, IntoUrl,
};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};

use crate::{
    config::Config,
    error::{HlsError, HlsResult},
};

/// A cheaply clonable HTTP client sharing one cookie jar between manifest,
/// key and segment requests.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> HlsResult<Self> {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = builder.cookie_provider(cookies_store.clone()).build()?;

        Ok(Self {
            client,
            cookies_store,
        })
    }

    pub fn from_config(config: &Config) -> HlsResult<Self> {
        let mut headers = HeaderMap::new();
        for header in &config.headers {
            let (key, value) = header
                .split_once(':')
                .ok_or_else(|| HlsError::Config(format!("invalid header: {header}")))?;
            let name = HeaderName::from_bytes(key.trim().as_bytes())
                .map_err(|e| HlsError::Config(format!("invalid header name {key}: {e}")))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|e| HlsError::Config(format!("invalid header value {value}: {e}")))?;
            headers.insert(name, value);
        }

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.http_timeout_secs));
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent);
        }

        Self::new(builder)
    }

    pub fn add_cookies(&self, cookies: Vec<String>, url: impl IntoUrl) -> HlsResult<()> {
        let url = url.into_url()?;
        let mut lock = self
            .cookies_store
            .lock()
            .map_err(|_| HlsError::Config("cookie store poisoned".to_string()))?;
        for cookie in cookies {
            _ = lock.parse(&cookie, &url);
        }
        Ok(())
    }

    /// GET a text document, failing on non-success status.
    pub async fn get_text(&self, url: impl IntoUrl) -> HlsResult<String> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(HlsError::HttpError(response.status()));
        }
        Ok(response.text().await?)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = Client::builder()
            .cookie_provider(cookies_store.clone())
            .build()
            .unwrap_or_default();

        Self {
            client,
            cookies_store,
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
