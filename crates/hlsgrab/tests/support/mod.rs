use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use aes::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
use bytes::Bytes;
use hlsgrab::{
    fetch::SegmentFetcher, job::JobStatus, sink::ContainerSink, HlsError, HlsResult,
};
use rand::Rng;
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub const KEY: [u8; 16] = *b"0123456789abcdef";

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("hlsgrab=debug")
        .with_test_writer()
        .try_init();
}

pub fn segment_payload(index: usize) -> Vec<u8> {
    format!("segment-{index:04}-").repeat(index % 3 + 1).into_bytes()
}

pub fn encrypt(data: &[u8], iv: [u8; 16]) -> Vec<u8> {
    cbc::Encryptor::<aes::Aes128>::new(&KEY.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(data)
}

pub fn segment_urls(count: usize) -> Vec<Url> {
    (0..count)
        .map(|i| Url::parse(&format!("https://cdn.example.com/seg{i}.ts")).unwrap())
        .collect()
}

/// Serves `segment_payload(index)` after a random delay, failing at
/// `fail_at` if set, and tracks how many fetches run at once.
pub struct TestFetcher {
    latencies: Vec<Duration>,
    fail_at: Option<usize>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub fetched: Mutex<Vec<usize>>,
}

impl TestFetcher {
    pub fn new(count: usize, max_latency_ms: u64) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            latencies: (0..count)
                .map(|_| Duration::from_millis(rng.gen_range(0..=max_latency_ms)))
                .collect(),
            fail_at: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }
}

impl SegmentFetcher for TestFetcher {
    async fn fetch(&self, index: usize, _url: &Url) -> HlsResult<Bytes> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.fetched.lock().unwrap().push(index);

        tokio::time::sleep(self.latencies[index]).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_at == Some(index) {
            return Err(HlsError::HttpError(reqwest::StatusCode::NOT_FOUND));
        }
        Ok(segment_payload(index).into())
    }
}

/// Keeps every chunk it receives, in arrival order.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub chunks: Arc<Mutex<Vec<(usize, Bytes)>>>,
    pub closed: Arc<Mutex<Option<bool>>>,
}

impl RecordingSink {
    pub fn indices(&self) -> Vec<usize> {
        self.chunks.lock().unwrap().iter().map(|(i, _)| *i).collect()
    }
}

impl ContainerSink for RecordingSink {
    fn finalizing_status(&self) -> JobStatus {
        JobStatus::Merging
    }

    async fn write(&mut self, index: usize, chunk: Bytes) -> HlsResult<()> {
        self.chunks.lock().unwrap().push((index, chunk));
        Ok(())
    }

    async fn flush(&mut self) -> HlsResult<()> {
        Ok(())
    }

    async fn close(self) -> HlsResult<u64> {
        *self.closed.lock().unwrap() = Some(true);
        let chunks = self.chunks.lock().unwrap();
        Ok(chunks.iter().map(|(_, c)| c.len() as u64).sum())
    }

    async fn abort(self) {
        *self.closed.lock().unwrap() = Some(false);
    }
}

pub trait HlsMock {
    async fn mock<B>(&self, mock_path: &str, body: B) -> &Self
    where
        B: Into<Vec<u8>>;

    async fn mock_status(&self, mock_path: &str, status: u16) -> &Self;
}

impl HlsMock for MockServer {
    async fn mock<B>(&self, mock_path: &str, body: B) -> &Self
    where
        B: Into<Vec<u8>>,
    {
        Mock::given(method("GET"))
            .and(path(mock_path))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(self)
            .await;
        self
    }

    async fn mock_status(&self, mock_path: &str, status: u16) -> &Self {
        Mock::given(method("GET"))
            .and(path(mock_path))
            .respond_with(ResponseTemplate::new(status))
            .mount(self)
            .await;
        self
    }
}

pub fn media_playlist(media_sequence: u64, segments: &[String]) -> String {
    let mut playlist = format!(
        "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:{media_sequence}\n"
    );
    for segment in segments {
        playlist.push_str("#EXTINF:2.000,\n");
        playlist.push_str(segment);
        playlist.push('\n');
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}
