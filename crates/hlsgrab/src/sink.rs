use std::{future::Future, path::Path};

use bytes::Bytes;
use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt, BufWriter},
};

use crate::{
    config::OutputFormat,
    error::{HlsError, HlsResult},
    job::JobStatus,
    mp4::{patch_mvhd_duration, RemuxedFragment},
    remux::{FfmpegRemuxer, Remuxer},
};

/// Consumer of the decrypted segments, in playback order.
///
/// The sink owns the output for the lifetime of a job and releases it on
/// every exit path: [ContainerSink::close] on success,
/// [ContainerSink::abort] on failure.
pub trait ContainerSink: Send {
    /// Status shown while [ContainerSink::flush] runs.
    fn finalizing_status(&self) -> JobStatus;

    /// Write the chunk of segment `index`. Called with strictly increasing,
    /// contiguous indices starting at 0.
    fn write(&mut self, index: usize, chunk: Bytes)
        -> impl Future<Output = HlsResult<()>> + Send;

    /// Drain any conversion still in progress.
    fn flush(&mut self) -> impl Future<Output = HlsResult<()>> + Send;

    /// Flush and close the output. Returns the number of bytes written.
    fn close(self) -> impl Future<Output = HlsResult<u64>> + Send;

    /// Best-effort close of an incomplete output.
    fn abort(self) -> impl Future<Output = ()> + Send;
}

/// Appends every chunk verbatim. Concatenated MPEG-TS segments stay playable.
pub struct PassthroughSink<W> {
    writer: W,
    bytes_written: u64,
}

impl<W> PassthroughSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            bytes_written: 0,
        }
    }
}

impl<W> ContainerSink for PassthroughSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn finalizing_status(&self) -> JobStatus {
        JobStatus::Merging
    }

    async fn write(&mut self, _index: usize, chunk: Bytes) -> HlsResult<()> {
        self.writer.write_all(&chunk).await?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    async fn flush(&mut self) -> HlsResult<()> {
        Ok(())
    }

    async fn close(mut self) -> HlsResult<u64> {
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(self.bytes_written)
    }

    async fn abort(mut self) {
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("Failed to close output: {e}");
        }
    }
}

/// Pushes every chunk through a [Remuxer] and writes fragmented MP4.
///
/// The first initialization segment is written once, with its duration
/// patched when the total duration is known. Media segments follow in the
/// order the remuxer produced them.
pub struct RemuxSink<W, R> {
    writer: W,
    remuxer: R,
    duration: Option<f64>,
    init_written: bool,
    bytes_written: u64,
}

impl<W, R> RemuxSink<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: Remuxer,
{
    pub fn new(writer: W, remuxer: R, duration: Option<f64>) -> Self {
        Self {
            writer,
            remuxer,
            duration,
            init_written: false,
            bytes_written: 0,
        }
    }

    async fn write_fragments(&mut self, fragments: Vec<RemuxedFragment>) -> HlsResult<()> {
        for fragment in fragments {
            if !self.init_written {
                let mut init = fragment.init_segment.to_vec();
                if let Some(duration) = self.duration {
                    if !patch_mvhd_duration(&mut init, duration) {
                        tracing::warn!("No mvhd found in init segment, duration not set.");
                    }
                }
                self.writer.write_all(&init).await?;
                self.bytes_written += init.len() as u64;
                self.init_written = true;
            }

            self.writer.write_all(&fragment.media_segment).await?;
            self.bytes_written += fragment.media_segment.len() as u64;
        }
        Ok(())
    }
}

impl<W, R> ContainerSink for RemuxSink<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: Remuxer,
{
    fn finalizing_status(&self) -> JobStatus {
        JobStatus::Converting
    }

    async fn write(&mut self, _index: usize, chunk: Bytes) -> HlsResult<()> {
        let fragments = self.remuxer.push(chunk).await?;
        self.write_fragments(fragments).await
    }

    async fn flush(&mut self) -> HlsResult<()> {
        let fragments = self.remuxer.flush().await?;
        self.write_fragments(fragments).await?;
        if !self.init_written {
            return Err(HlsError::RemuxError("remuxer produced no output".to_string()));
        }
        Ok(())
    }

    async fn close(mut self) -> HlsResult<u64> {
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(self.bytes_written)
    }

    async fn abort(mut self) {
        self.remuxer.abort().await;
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!("Failed to close output: {e}");
        }
    }
}

pub type FileWriter = BufWriter<File>;

/// Sink writing to a file on disk, selected once per job.
pub enum FileSink {
    Passthrough(PassthroughSink<FileWriter>),
    Remux(RemuxSink<FileWriter, FfmpegRemuxer>),
}

impl FileSink {
    pub async fn create(
        path: impl AsRef<Path>,
        format: OutputFormat,
        duration: Option<f64>,
    ) -> HlsResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // spawn the remuxer first so a missing ffmpeg does not leave an empty file behind
        let remuxer = match format {
            OutputFormat::Ts => None,
            OutputFormat::Mp4 => Some(FfmpegRemuxer::spawn()?),
        };
        let writer = BufWriter::new(File::create(path).await?);
        Ok(match remuxer {
            None => Self::Passthrough(PassthroughSink::new(writer)),
            Some(remuxer) => Self::Remux(RemuxSink::new(writer, remuxer, duration)),
        })
    }
}

impl ContainerSink for FileSink {
    fn finalizing_status(&self) -> JobStatus {
        match self {
            FileSink::Passthrough(sink) => sink.finalizing_status(),
            FileSink::Remux(sink) => sink.finalizing_status(),
        }
    }

    async fn write(&mut self, index: usize, chunk: Bytes) -> HlsResult<()> {
        match self {
            FileSink::Passthrough(sink) => sink.write(index, chunk).await,
            FileSink::Remux(sink) => sink.write(index, chunk).await,
        }
    }

    async fn flush(&mut self) -> HlsResult<()> {
        match self {
            FileSink::Passthrough(sink) => sink.flush().await,
            FileSink::Remux(sink) => sink.flush().await,
        }
    }

    async fn close(self) -> HlsResult<u64> {
        match self {
            FileSink::Passthrough(sink) => sink.close().await,
            FileSink::Remux(sink) => sink.close().await,
        }
    }

    async fn abort(self) {
        match self {
            FileSink::Passthrough(sink) => sink.abort().await,
            FileSink::Remux(sink) => sink.abort().await,
        }
    }
}
