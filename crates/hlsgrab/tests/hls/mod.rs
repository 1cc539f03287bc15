use hlsgrab::{
    m3u8::{load_manifest, parse_master, parse_media, Resolution},
    util::http::HttpClient,
};
use url::Url;
use wiremock::MockServer;

use crate::support::{media_playlist, HlsMock};

const THREE_VARIANTS: &str = include_str!("../fixtures/master_three_variants.m3u8");
const TWO_KEYS: &str = include_str!("../fixtures/master_two_keys.m3u8");

#[test]
fn test_three_variants_paired_with_uris() -> anyhow::Result<()> {
    let url = Url::parse("https://api.rplay.live/content/hlsstream/master.m3u8")?;
    let manifest = parse_master(THREE_VARIANTS, &url).expect("manifest has renditions");

    assert_eq!(manifest.base_url, url);
    assert_eq!(manifest.variants.len(), 3);

    let pairs: Vec<(String, String)> = manifest
        .variants
        .iter()
        .map(|v| (v.resolution.to_string(), v.url.to_string()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            (
                "1920x1080".to_string(),
                "https://api.rplay.live/content/hlsstream/1080p/playlist.m3u8".to_string()
            ),
            (
                "1280x720".to_string(),
                "https://api.rplay.live/content/hlsstream/720p/playlist.m3u8".to_string()
            ),
            (
                "640x360".to_string(),
                "https://cdn.example.com/360p/playlist.m3u8".to_string()
            ),
        ]
    );
    assert_eq!(manifest.variants[0].bandwidth, Some(5400000));
    assert_eq!(manifest.variants[0].frame_rate, Some(30.));
    assert_eq!(manifest.variants[2].frame_rate, None);

    let encryption = manifest.encryption.expect("session key is present");
    assert_eq!(encryption.key_url.as_str(), "https://keys.example.com/key?id=1");
    assert_eq!(encryption.iv, None);
    Ok(())
}

#[test]
fn test_first_key_wins_and_incomplete_streams_skipped() -> anyhow::Result<()> {
    let url = Url::parse("https://example.com/live/master.m3u8")?;
    let manifest = parse_master(TWO_KEYS, &url).expect("one usable rendition");

    assert_eq!(manifest.variants.len(), 1);
    assert_eq!(
        manifest.variants[0].resolution,
        Resolution {
            width: 640,
            height: 360
        }
    );

    let encryption = manifest.encryption.unwrap();
    assert_eq!(encryption.key_url.as_str(), "https://example.com/live/first.key");
    assert_eq!(
        encryption.iv.as_deref(),
        Some("0x0000000000000000000000000000abcd")
    );
    Ok(())
}

#[test]
fn test_manifest_without_renditions() -> anyhow::Result<()> {
    let url = Url::parse("https://example.com/master.m3u8")?;
    assert!(parse_master("#EXTM3U\n#EXT-X-VERSION:3\n", &url).is_none());
    assert!(parse_master("", &url).is_none());
    Ok(())
}

#[test]
fn test_media_sequence_and_segments() -> anyhow::Result<()> {
    let url = Url::parse("https://cdn.example.com/1080p/playlist.m3u8")?;
    let segments: Vec<String> = (0..10).map(|i| format!("seg{i}.ts")).collect();
    let playlist = parse_media(&media_playlist(5, &segments), &url)?;

    assert_eq!(playlist.media_sequence, 5);
    assert_eq!(playlist.segments.len(), 10);
    assert_eq!(
        playlist.segments[9].as_str(),
        "https://cdn.example.com/1080p/seg9.ts"
    );
    assert_eq!(playlist.duration, Some(20.));

    let playlist = parse_media("#EXTM3U\n#EXTINF:1,\nonly.ts\n", &url)?;
    assert_eq!(playlist.media_sequence, 0);
    assert_eq!(playlist.segments.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_load_manifest_probes_duration() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let segments: Vec<String> = (0..4).map(|i| format!("seg{i}.ts")).collect();
    server
        .mock(
            "/master.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1000,RESOLUTION=1920x1080\nvideo/index.m3u8\n",
        )
        .await
        .mock("/video/index.m3u8", media_playlist(0, &segments))
        .await;

    let client = HttpClient::default();
    let url = Url::parse(&format!("{}/master.m3u8", server.uri()))?;
    let manifest = load_manifest(&client, &url).await?.unwrap();
    assert_eq!(manifest.duration, Some(8.));
    Ok(())
}

#[tokio::test]
async fn test_probe_failure_leaves_duration_unset() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock(
            "/master.m3u8",
            "#EXTM3U\n#EXT-X-STREAM-INF:RESOLUTION=640x360\nmissing.m3u8\n",
        )
        .await
        .mock_status("/missing.m3u8", 404)
        .await;

    let client = HttpClient::default();
    let url = Url::parse(&format!("{}/master.m3u8", server.uri()))?;
    let manifest = load_manifest(&client, &url).await?.unwrap();
    assert_eq!(manifest.variants.len(), 1);
    assert_eq!(manifest.duration, None);
    Ok(())
}

#[tokio::test]
async fn test_master_fetch_error() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server.mock_status("/master.m3u8", 403).await;

    let client = HttpClient::default();
    let url = Url::parse(&format!("{}/master.m3u8", server.uri()))?;
    assert!(load_manifest(&client, &url).await.is_err());
    Ok(())
}
