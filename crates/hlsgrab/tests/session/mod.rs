use std::time::Duration;

use hlsgrab::{
    config::Config,
    detect::ManifestDetector,
    m3u8::parse_master,
    util::http::HttpClient,
    SessionRegistry,
};
use url::Url;

const MASTER: &str = "https://api.rplay.live/content/hlsstream?id=9&path=media/hls/master.m3u8";

fn detector(registry: SessionRegistry) -> ManifestDetector {
    ManifestDetector::new(HttpClient::default(), registry, &Config::default())
}

#[tokio::test(start_paused = true)]
async fn test_resubmission_inside_window_is_ignored() -> anyhow::Result<()> {
    let detector = detector(SessionRegistry::default());
    let url = Url::parse(MASTER)?;

    assert!(detector.admit("tab-1", &url));
    assert!(!detector.admit("tab-1", &url));
    assert!(detector.admit("tab-2", &url));

    tokio::time::advance(Duration::from_millis(2500)).await;
    assert!(!detector.admit("tab-1", &url));

    tokio::time::advance(Duration::from_millis(500)).await;
    assert!(detector.admit("tab-1", &url));
    Ok(())
}

#[tokio::test]
async fn test_unrelated_urls_are_never_fetched() -> anyhow::Result<()> {
    let registry = SessionRegistry::default();
    let detector = detector(registry.clone());

    // nothing listens on this port, a fetch would fail
    let url = Url::parse("http://127.0.0.1:9/master.m3u8")?;
    assert_eq!(detector.on_trigger("tab-1", &url).await?, None);
    assert!(registry.manifests("tab-1").is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_navigation_forgets_session() -> anyhow::Result<()> {
    let registry = SessionRegistry::default();
    let detector = detector(registry.clone());
    let url = Url::parse(MASTER)?;

    let manifest = parse_master(
        "#EXTM3U\n#EXT-X-STREAM-INF:RESOLUTION=1280x720\n720.m3u8\n",
        &url,
    )
    .unwrap();
    assert!(detector.admit("tab-1", &url));
    assert!(registry.add_manifest("tab-1", manifest.clone()));
    assert!(!registry.add_manifest("tab-1", manifest));

    registry.evict("tab-1");
    detector.forget_session("tab-1");
    assert!(registry.manifests("tab-1").is_empty());
    assert!(detector.admit("tab-1", &url));
    Ok(())
}
