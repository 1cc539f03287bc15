use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use hlsgrab::{
    decrypt::{sequence_iv, IvSource, SegmentKey},
    download::OrderedDownloader,
    fetch::SegmentFetcher,
    job::JobStatus,
    sink::ContainerSink,
    HlsError, HlsResult,
};
use url::Url;

use crate::support::{
    encrypt, segment_payload, segment_urls, RecordingSink, TestFetcher, KEY,
};

fn concurrency(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap()
}

/// Segment 0 takes a while, every other segment is served at once.
struct SlowHeadFetcher {
    completed: Arc<AtomicUsize>,
}

impl SegmentFetcher for SlowHeadFetcher {
    async fn fetch(&self, index: usize, _url: &Url) -> HlsResult<Bytes> {
        if index == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(segment_payload(index).into())
    }
}

/// Records the largest number of fetched segments still waiting behind the
/// one being written.
struct BacklogSink {
    completed: Arc<AtomicUsize>,
    written: usize,
    max_backlog: usize,
}

impl ContainerSink for BacklogSink {
    fn finalizing_status(&self) -> JobStatus {
        JobStatus::Merging
    }

    async fn write(&mut self, _index: usize, _chunk: Bytes) -> HlsResult<()> {
        self.written += 1;
        let backlog = self.completed.load(Ordering::SeqCst) - self.written;
        self.max_backlog = self.max_backlog.max(backlog);
        Ok(())
    }

    async fn flush(&mut self) -> HlsResult<()> {
        Ok(())
    }

    async fn close(self) -> HlsResult<u64> {
        Ok(0)
    }

    async fn abort(self) {}
}

#[tokio::test]
async fn test_randomized_latency_keeps_order() -> anyhow::Result<()> {
    for count in [1, 2, 7, 40] {
        let downloader = OrderedDownloader::new(TestFetcher::new(count, 20), SegmentKey::Clear)
            .concurrency(concurrency(4));
        let mut sink = RecordingSink::default();
        let summary = downloader
            .download(segment_urls(count), &mut sink, |_| {})
            .await?;

        assert_eq!(summary.segments, count);
        assert_eq!(sink.indices(), (0..count).collect::<Vec<_>>());
        for (index, chunk) in sink.chunks.lock().unwrap().iter() {
            assert_eq!(chunk.as_ref(), segment_payload(*index).as_slice());
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_concurrency_limit_respected() -> anyhow::Result<()> {
    for limit in [1, 2, 5] {
        let fetcher = Arc::new(TestFetcher::new(30, 10));
        let downloader =
            OrderedDownloader::new(fetcher.clone(), SegmentKey::Clear).concurrency(concurrency(limit));
        let mut sink = RecordingSink::default();
        downloader
            .download(segment_urls(30), &mut sink, |_| {})
            .await?;

        let max = fetcher.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= limit as usize, "{max} fetches in flight with limit {limit}");
        assert!(max >= 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_pending_segments_bounded_while_head_is_slow() -> anyhow::Result<()> {
    const LIMIT: u32 = 3;
    let completed = Arc::new(AtomicUsize::new(0));
    let downloader = OrderedDownloader::new(
        SlowHeadFetcher {
            completed: completed.clone(),
        },
        SegmentKey::Clear,
    )
    .concurrency(concurrency(LIMIT));
    let mut sink = BacklogSink {
        completed,
        written: 0,
        max_backlog: 0,
    };
    downloader
        .download(segment_urls(20), &mut sink, |_| {})
        .await?;

    assert_eq!(sink.written, 20);
    assert!(
        sink.max_backlog <= LIMIT as usize - 1,
        "{} segments waited behind a slow one with limit {LIMIT}",
        sink.max_backlog
    );
    // the other workers did run ahead while segment 0 was slow
    assert!(sink.max_backlog >= 1);
    Ok(())
}

#[tokio::test]
async fn test_failure_stops_before_failed_segment() -> anyhow::Result<()> {
    const COUNT: usize = 8;
    for k in 0..COUNT {
        let fetcher = Arc::new(TestFetcher::new(COUNT, 15).fail_at(k));
        let downloader =
            OrderedDownloader::new(fetcher.clone(), SegmentKey::Clear).concurrency(concurrency(3));
        let mut sink = RecordingSink::default();
        let result = downloader
            .download(segment_urls(COUNT), &mut sink, |_| {})
            .await;

        assert!(
            matches!(result, Err(HlsError::HttpError(_))),
            "segment {k} should fail the download"
        );
        let indices = sink.indices();
        assert!(indices.len() <= k, "{indices:?} written with failure at {k}");
        assert_eq!(indices, (0..indices.len()).collect::<Vec<_>>());
    }
    Ok(())
}

#[tokio::test]
async fn test_no_new_claims_after_failure() -> anyhow::Result<()> {
    let fetcher = Arc::new(TestFetcher::new(50, 5).fail_at(0));
    let downloader =
        OrderedDownloader::new(fetcher.clone(), SegmentKey::Clear).concurrency(concurrency(2));
    let mut sink = RecordingSink::default();
    let result = downloader
        .download(segment_urls(50), &mut sink, |_| {})
        .await;
    assert!(result.is_err());

    // let fetches that were already running settle
    tokio::time::sleep(Duration::from_millis(50)).await;
    let fetched = fetcher.fetched.lock().unwrap().len();
    assert!(fetched < 50, "{fetched} segments fetched after the first failure");
    assert!(sink.indices().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_derived_iv_from_media_sequence() -> anyhow::Result<()> {
    const COUNT: usize = 10;
    let media_sequence = 5;

    let key = SegmentKey::aes128(&KEY, IvSource::Sequence { media_sequence })?;
    let sequences: Vec<u32> = (0..COUNT)
        .map(|i| {
            let iv = key.iv_for(i).unwrap();
            u32::from_be_bytes(iv[12..].try_into().unwrap())
        })
        .collect();
    assert_eq!(sequences, (5..15).collect::<Vec<u32>>());

    for index in 0..COUNT {
        let ciphertext = encrypt(&segment_payload(index), sequence_iv(media_sequence + index as u64));
        let plaintext = key.decrypt(index, ciphertext.into())?;
        assert_eq!(plaintext.as_ref(), segment_payload(index).as_slice());
    }
    Ok(())
}

#[tokio::test]
async fn test_progress_is_throttled_with_final_snapshot() -> anyhow::Result<()> {
    let downloader = OrderedDownloader::new(TestFetcher::new(20, 2), SegmentKey::Clear)
        .concurrency(concurrency(5))
        .progress_interval(Duration::from_secs(3600));
    let mut sink = RecordingSink::default();
    let mut snapshots = Vec::new();
    downloader
        .download(segment_urls(20), &mut sink, |s| snapshots.push(s))
        .await?;

    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].completed, 20);
    assert_eq!(snapshots[0].total, 20);
    assert_eq!(snapshots[0].percentage(), 100.);
    Ok(())
}
