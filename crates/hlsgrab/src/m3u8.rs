//! Master and media playlist parsing.
//!
//! Master playlists are scanned line by line: a stream declaration without a
//! resolution or without a uri is skipped instead of failing the whole
//! playlist, and key tags are picked up even though they belong to media
//! playlists. Media playlists are parsed with `m3u8-rs`.

use std::{fmt, str::FromStr, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    error::{HlsError, HlsResult},
    util::http::HttpClient,
};

static KEY_URI: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"URI="([^"]+)""#).unwrap());
static KEY_IV: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"IV=(0[xX][0-9a-fA-F]+)").unwrap());
static RESOLUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"RESOLUTION=(\d+)x(\d+)").unwrap());
static BANDWIDTH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"BANDWIDTH=(\d+)").unwrap());
static FRAME_RATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"FRAME-RATE=(\d+(?:\.\d+)?)").unwrap());

const STREAM_INF: &str = "#EXT-X-STREAM-INF:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = HlsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HlsError::UnknownVariant(s.to_string());
        let (width, height) = s.split_once(['x', 'X']).ok_or_else(invalid)?;
        Ok(Self {
            width: width.trim().parse().map_err(|_| invalid())?,
            height: height.trim().parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for Resolution {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One rendition of the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamVariant {
    pub resolution: Resolution,
    pub bandwidth: Option<u64>,
    pub frame_rate: Option<f64>,
    /// Absolute URL of the media playlist.
    pub url: Url,
}

/// Key reference found in the master playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionRef {
    pub key_url: Url,
    /// `0x`-prefixed hex IV, if the playlist pins one.
    pub iv: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// URL the master playlist was fetched from. Identity of the manifest.
    pub base_url: Url,
    pub variants: Vec<StreamVariant>,
    pub encryption: Option<EncryptionRef>,
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub url: Url,
    /// Value of `EXT-X-MEDIA-SEQUENCE`, base of the derived IVs.
    pub media_sequence: u64,
    pub segments: Vec<Url>,
    /// Sum of the segment durations, if any is declared.
    pub duration: Option<f64>,
}

fn resolve(line: &str, base: &Url) -> Option<Url> {
    match base.join(line) {
        Ok(url) => Some(url),
        Err(e) => {
            log::warn!("Ignored unresolvable uri {line}: {e}");
            None
        }
    }
}

/// Parse a master playlist. Returns `None` if it offers no usable rendition.
///
/// When several key lines are present the first one is used.
pub fn parse_master(content: &str, url: &Url) -> Option<Manifest> {
    let lines: Vec<&str> = content.lines().map(str::trim).collect();

    let encryption = lines
        .iter()
        .filter(|line| line.contains("EXT-X-SESSION-KEY") || line.contains("EXT-X-KEY"))
        .find_map(|line| {
            let uri = KEY_URI.captures(line)?.get(1)?.as_str();
            let key_url = resolve(uri, url)?;
            let iv = KEY_IV
                .captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string());
            Some(EncryptionRef { key_url, iv })
        });

    let mut variants: Vec<StreamVariant> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(attributes) = line.strip_prefix(STREAM_INF) else {
            continue;
        };

        let Some(resolution) = RESOLUTION.captures(attributes).and_then(|c| {
            Some(Resolution {
                width: c.get(1)?.as_str().parse().ok()?,
                height: c.get(2)?.as_str().parse().ok()?,
            })
        }) else {
            log::warn!("Skipped stream without resolution: {line}");
            continue;
        };
        let bandwidth = BANDWIDTH
            .captures(attributes)
            .and_then(|c| c.get(1)?.as_str().parse().ok());
        let frame_rate = FRAME_RATE
            .captures(attributes)
            .and_then(|c| c.get(1)?.as_str().parse().ok());

        // the uri is the next line that is neither blank nor a comment,
        // unless another stream declaration comes first
        let uri = lines[i + 1..]
            .iter()
            .take_while(|next| !next.starts_with(STREAM_INF))
            .find(|next| !next.is_empty() && !next.starts_with('#'));
        let Some(stream_url) = uri.and_then(|uri| resolve(uri, url)) else {
            log::warn!("Skipped stream without uri: {line}");
            continue;
        };

        if variants
            .iter()
            .any(|v| v.resolution == resolution && v.url == stream_url)
        {
            continue;
        }
        variants.push(StreamVariant {
            resolution,
            bandwidth,
            frame_rate,
            url: stream_url,
        });
    }

    if variants.is_empty() {
        return None;
    }

    Some(Manifest {
        base_url: url.clone(),
        variants,
        encryption,
        duration: None,
    })
}

/// Parse a media playlist into its ordered segment urls.
pub fn parse_media(content: &str, url: &Url) -> HlsResult<MediaPlaylist> {
    let playlist = m3u8_rs::parse_media_playlist_res(content.as_bytes())
        .map_err(|_| HlsError::M3u8ParseError(url.to_string()))?;

    let segments = playlist
        .segments
        .iter()
        .map(|segment| url.join(segment.uri.trim()))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(MediaPlaylist {
        url: url.clone(),
        media_sequence: playlist.media_sequence,
        segments,
        duration: total_duration(&playlist),
    })
}

/// Sum of every `#EXTINF` duration, or `None` if there is nothing to sum.
fn total_duration(playlist: &m3u8_rs::MediaPlaylist) -> Option<f64> {
    let total: f64 = playlist
        .segments
        .iter()
        .map(|segment| segment.duration as f64)
        .sum();
    (total > 0.).then_some(total)
}

/// Fetch a media playlist and sum its segment durations.
///
/// Any failure is reported as an unknown duration.
pub async fn probe_duration(client: &HttpClient, url: &Url) -> Option<f64> {
    match load_media_playlist(client, url).await {
        Ok(playlist) => playlist.duration,
        Err(e) => {
            log::warn!("Failed to probe duration of {url}: {e}");
            None
        }
    }
}

/// Fetch and parse a master playlist, probing the duration of its first
/// rendition on the way.
pub async fn load_manifest(client: &HttpClient, url: &Url) -> HlsResult<Option<Manifest>> {
    log::info!("Start fetching master playlist {url}");
    let content = client.get_text(url.clone()).await?;

    let Some(mut manifest) = parse_master(&content, url) else {
        log::info!("No rendition found in {url}");
        return Ok(None);
    };
    manifest.duration = probe_duration(client, &manifest.variants[0].url).await;
    Ok(Some(manifest))
}

/// Fetch and parse the media playlist of a rendition.
pub async fn load_media_playlist(client: &HttpClient, url: &Url) -> HlsResult<MediaPlaylist> {
    let content = client.get_text(url.clone()).await?;
    parse_media(&content, url)
}
