//! Bounded, order-preserving segment acquisition.
//!
//! `min(C, N)` workers claim segment indices from a shared counter, fetch
//! and decrypt them, and report back to a single coordinator. The
//! coordinator owns the [OrderedBuffer], so only one task ever drains it or
//! writes to the sink.
//!
//! A worker must hold a semaphore permit while it fetches, and the permit
//! travels with the decrypted chunk until the chunk has been written. Fetches
//! in flight plus chunks waiting for an earlier index therefore never
//! exceed C.

use std::{
    num::NonZeroU32,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::{
    sync::{mpsc, OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
};
use url::Url;

use crate::{
    config::DEFAULT_CONCURRENCY,
    decrypt::SegmentKey,
    error::{HlsError, HlsResult},
    fetch::SegmentFetcher,
    progress::{ProgressReporter, ProgressSnapshot},
    sink::ContainerSink,
    util::ordered_stream::OrderedBuffer,
};

struct Completion {
    index: usize,
    result: HlsResult<Bytes>,
    permit: OwnedSemaphorePermit,
}

/// Summary of a download where every segment reached the sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadSummary {
    pub segments: usize,
    pub total_bytes: u64,
    pub elapsed: Duration,
    pub average_throughput: f64,
}

/// Stops workers from claiming new segments once the download is over,
/// including when the coordinating future is dropped.
struct AbortGuard {
    aborted: Arc<AtomicBool>,
    permits: Arc<Semaphore>,
}

impl AbortGuard {
    fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.permits.close();
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        self.abort();
    }
}

/// ┌──────────┐   claim index    ┌───────────────┐
/// │ Worker 1 ├──────────────────►               │  in order   ┌───────────────┐
/// ├──────────┤  fetch+decrypt   │  Coordinator  ├─────────────► ContainerSink │
/// │ Worker 2 ├──────────────────►    [MPSC]     │             └───────────────┘
/// ├──────────┤                  │ OrderedBuffer │
/// │   ...    ├──────────────────►               │
/// └──────────┘                  └───────────────┘
pub struct OrderedDownloader<F> {
    fetcher: Arc<F>,
    key: Arc<SegmentKey>,
    concurrency: NonZeroU32,
    progress_interval: Duration,
}

impl<F> OrderedDownloader<F>
where
    F: SegmentFetcher,
{
    pub fn new(fetcher: F, key: SegmentKey) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            key: Arc::new(key),
            concurrency: DEFAULT_CONCURRENCY,
            progress_interval: Duration::from_secs(1),
        }
    }

    pub fn concurrency(mut self, concurrency: NonZeroU32) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Fetch and decrypt every segment, handing them to `sink` in index order.
    ///
    /// The first failure of any kind stops the download: no new segment is
    /// claimed, fetches already running are left to finish and discarded, and
    /// that error is returned. The sink is neither flushed nor closed here.
    pub async fn download<S, P>(
        &self,
        segments: Vec<Url>,
        sink: &mut S,
        mut on_progress: P,
    ) -> HlsResult<DownloadSummary>
    where
        S: ContainerSink,
        P: FnMut(ProgressSnapshot) + Send,
    {
        let total = segments.len();
        if total == 0 {
            return Err(HlsError::NoSegments);
        }

        let concurrency = self.concurrency.get() as usize;
        let workers_count = concurrency.min(total);
        tracing::info!("Start downloading {total} segments with {workers_count} worker(s).");

        let segments = Arc::new(segments);
        let next_to_fetch = Arc::new(AtomicUsize::new(0));
        let guard = AbortGuard {
            aborted: Arc::new(AtomicBool::new(false)),
            permits: Arc::new(Semaphore::new(concurrency)),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let workers: Vec<JoinHandle<()>> = (0..workers_count)
            .map(|_| {
                tokio::spawn(worker(
                    self.fetcher.clone(),
                    self.key.clone(),
                    segments.clone(),
                    next_to_fetch.clone(),
                    guard.aborted.clone(),
                    guard.permits.clone(),
                    tx.clone(),
                ))
            })
            .collect();
        drop(tx);

        let mut reporter = ProgressReporter::new(total, self.progress_interval);
        let mut pending = OrderedBuffer::new();
        while let Some(Completion {
            index,
            result,
            permit,
        }) = rx.recv().await
        {
            let chunk = match result {
                Ok(chunk) => chunk,
                Err(e) => {
                    guard.abort();
                    tracing::error!("Segment {index} failed, aborting download: {e}");
                    return Err(e);
                }
            };

            pending.insert(index, (chunk, permit));
            while let Some((index, (chunk, permit))) = pending.pop_ready() {
                let size = chunk.len();
                if let Err(e) = sink.write(index, chunk).await {
                    guard.abort();
                    tracing::error!("Failed to write segment {index}, aborting download: {e}");
                    return Err(e);
                }
                drop(permit);

                tracing::debug!("Segment {index} written. ({} / {total})", index + 1);
                if let Some(snapshot) = reporter.record(size) {
                    on_progress(snapshot);
                }
            }

            if pending.next_index() == total {
                break;
            }
        }

        if pending.next_index() != total {
            guard.abort();
            tracing::error!(
                "Workers stopped after {} of {total} segments.",
                pending.next_index()
            );
            return Err(HlsError::Aborted);
        }

        // every index is claimed by now, so workers are already on their way out
        for worker in futures::future::join_all(workers).await {
            if let Err(e) = worker {
                tracing::warn!("Worker exited abnormally: {e}");
            }
        }

        on_progress(reporter.finish());
        let summary = DownloadSummary {
            segments: reporter.completed(),
            total_bytes: reporter.total_bytes(),
            elapsed: reporter.elapsed(),
            average_throughput: reporter.average_throughput(),
        };
        tracing::info!(
            "Downloaded {} segments, {} bytes in {:.2}s.",
            summary.segments,
            summary.total_bytes,
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }
}

async fn worker<F>(
    fetcher: Arc<F>,
    key: Arc<SegmentKey>,
    segments: Arc<Vec<Url>>,
    next_to_fetch: Arc<AtomicUsize>,
    aborted: Arc<AtomicBool>,
    permits: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<Completion>,
) where
    F: SegmentFetcher,
{
    loop {
        // closed semaphore means the download is over
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        if aborted.load(Ordering::Acquire) {
            break;
        }

        let index = next_to_fetch.fetch_add(1, Ordering::AcqRel);
        let Some(url) = segments.get(index) else {
            break;
        };

        tracing::debug!("Fetching segment {index}: {url}");
        let result = match fetcher.fetch(index, url).await {
            Ok(data) => key.decrypt(index, data),
            Err(e) => Err(e),
        };

        let failed = result.is_err();
        if tx
            .send(Completion {
                index,
                result,
                permit,
            })
            .is_err()
            || failed
        {
            break;
        }
    }
}
