use std::{future::Future, sync::Arc};

use bytes::Bytes;
use url::Url;

use crate::{
    error::{HlsError, HlsResult},
    util::http::HttpClient,
};

/// Retrieves the raw bytes of one segment.
///
/// Implementations never retry; the scheduler decides what a failure means.
pub trait SegmentFetcher: Send + Sync + 'static {
    fn fetch(&self, index: usize, url: &Url) -> impl Future<Output = HlsResult<Bytes>> + Send;
}

impl<F> SegmentFetcher for Arc<F>
where
    F: SegmentFetcher,
{
    fn fetch(&self, index: usize, url: &Url) -> impl Future<Output = HlsResult<Bytes>> + Send {
        self.as_ref().fetch(index, url)
    }
}

impl SegmentFetcher for HttpClient {
    fn fetch(&self, _index: usize, url: &Url) -> impl Future<Output = HlsResult<Bytes>> + Send {
        let request = self.get(url.clone());
        async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status();
                if let Ok(body) = response.text().await {
                    tracing::warn!("Error body: {body}");
                }
                return Err(HlsError::HttpError(status));
            }

            let bytes = response.bytes().await?;
            Ok(bytes)
        }
    }
}
