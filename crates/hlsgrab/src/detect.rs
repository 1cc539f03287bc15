//! Turning observed request urls into manifests offered to the user.

use std::{
    collections::HashMap,
    sync::{LazyLock, Mutex, PoisonError},
    time::Duration,
};

use regex::Regex;
use tokio::time::Instant;
use url::Url;

use crate::{
    config::Config,
    error::HlsResult,
    m3u8::{load_manifest, Manifest},
    session::{SessionId, SessionRegistry},
    util::http::HttpClient,
};

static RPLAY_LIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://api\.rplay\.live/content/hlsstream\?.*media/hls/master\.m3u8.*$")
        .unwrap()
});
static RPLAY_CDN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://api\.rplay-cdn\.com/content/hlsstream\?s3key=(.*)\.m3u8.*$").unwrap()
});
static RPLAY_API2: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://api2\.rplay\.live/content/hlsstream\?.*s3key=.*\.m3u8.*$").unwrap()
});

/// Whether `url` requests a master playlist of the streaming service.
pub fn is_master_manifest_url(url: &str) -> bool {
    RPLAY_LIVE.is_match(url) || RPLAY_API2.is_match(url) || is_cdn_master(url)
}

// Media playlists on the cdn end in `playlist.m3u8` or `_hls.m3u8`. Any other
// `.m3u8` after the key marks a master playlist.
fn is_cdn_master(url: &str) -> bool {
    let Some(key_start) = RPLAY_CDN
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.start())
    else {
        return false;
    };
    url[key_start..]
        .match_indices(".m3u8")
        .map(|(at, _)| &url[key_start..key_start + at])
        .any(|name| !name.ends_with("playlist") && !name.ends_with("_hls"))
}

/// Admits each `(session, url)` pair at most once per window.
pub struct UrlDeduper {
    window: Duration,
    max_age: Duration,
    seen: HashMap<(SessionId, String), Instant>,
}

impl UrlDeduper {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            max_age: Duration::from_secs(60),
            seen: HashMap::new(),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Returns `true` if the url should be processed now.
    pub fn check(&mut self, session_id: &str, url: &str) -> bool {
        let now = Instant::now();
        let max_age = self.max_age.max(self.window);
        self.seen
            .retain(|_, seen_at| now.duration_since(*seen_at) < max_age);

        let key = (session_id.to_string(), url.to_string());
        if let Some(seen_at) = self.seen.get(&key) {
            if now.duration_since(*seen_at) < self.window {
                return false;
            }
        }
        self.seen.insert(key, now);
        true
    }

    /// Forget every url of the session.
    pub fn forget_session(&mut self, session_id: &str) {
        self.seen.retain(|(session, _), _| session != session_id);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Gate, settle delay and fetch between a trigger and the registry.
pub struct ManifestDetector {
    client: HttpClient,
    registry: SessionRegistry,
    deduper: Mutex<UrlDeduper>,
    settle_delay: Duration,
}

impl ManifestDetector {
    pub fn new(client: HttpClient, registry: SessionRegistry, config: &Config) -> Self {
        Self {
            client,
            registry,
            deduper: Mutex::new(UrlDeduper::new(config.dedup_window())),
            settle_delay: config.settle_delay(),
        }
    }

    /// Whether the trigger passes the url filter and the dedup window.
    pub fn admit(&self, session_id: &str, url: &Url) -> bool {
        if !is_master_manifest_url(url.as_str()) {
            return false;
        }
        self.deduper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .check(session_id, url.as_str())
    }

    /// Process a trigger. Returns the manifest if it was new to the session.
    pub async fn on_trigger(&self, session_id: &str, url: &Url) -> HlsResult<Option<Manifest>> {
        if !self.admit(session_id, url) {
            return Ok(None);
        }
        tracing::info!("Master playlist detected: {url}");

        tokio::time::sleep(self.settle_delay).await;
        let Some(manifest) = load_manifest(&self.client, url).await? else {
            return Ok(None);
        };
        if self.registry.add_manifest(session_id, manifest.clone()) {
            Ok(Some(manifest))
        } else {
            Ok(None)
        }
    }

    pub fn forget_session(&self, session_id: &str) {
        self.deduper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .forget_session(session_id);
    }
}
