use std::{
    future::Future,
    num::NonZeroU32,
    path::PathBuf,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc,
    time::Instant,
};

use crate::{
    config::{Config, OutputFormat},
    decrypt::KeyResolver,
    download::OrderedDownloader,
    error::{HlsError, HlsResult},
    m3u8::{load_media_playlist, EncryptionRef, StreamVariant},
    message::JobEvent,
    session::SessionId,
    sink::{ContainerSink, FileSink},
    util::{http::HttpClient, path::output_file_name_now},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Preparing,
    Downloading,
    Merging,
    Converting,
    Saving,
    Completed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    /// Whether a job may move from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Completed | Error, _) => false,
            (_, Error) => true,
            (Preparing, Downloading) => true,
            (Downloading, Merging | Converting | Saving) => true,
            (Merging | Converting | Saving, Merging | Converting | Saving) => true,
            (Merging | Converting | Saving, Completed) => true,
            _ => false,
        }
    }
}

/// A rendition the user asked to save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub session_id: SessionId,
    pub job_id: String,
    pub variant: StreamVariant,
    pub encryption: Option<EncryptionRef>,
    #[serde(default)]
    pub page_title: Option<String>,
    /// Total duration probed from the manifest, if known.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub format: OutputFormat,
}

/// Receives the events of one job.
pub trait JobReporter: Send + Sync {
    fn report(&self, event: JobEvent);
}

impl JobReporter for mpsc::UnboundedSender<JobEvent> {
    fn report(&self, event: JobEvent) {
        // the receiving side may be gone, the job carries on regardless
        _ = self.send(event);
    }
}

/// Chooses where the output of a job is saved.
pub trait SavePicker: Send + Sync {
    /// Resolve the output path for `suggested_name`, or fail with
    /// [HlsError::SaveCancelled].
    fn pick(&self, suggested_name: &str) -> impl Future<Output = HlsResult<PathBuf>> + Send;
}

/// Saves into a directory without asking.
pub struct DirectoryPicker {
    dir: PathBuf,
}

impl DirectoryPicker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SavePicker for DirectoryPicker {
    async fn pick(&self, suggested_name: &str) -> HlsResult<PathBuf> {
        Ok(self.dir.join(suggested_name))
    }
}

/// Always saves to the same path.
pub struct FixedPathPicker(pub PathBuf);

impl SavePicker for FixedPathPicker {
    async fn pick(&self, _suggested_name: &str) -> HlsResult<PathBuf> {
        Ok(self.0.clone())
    }
}

/// Asks on the terminal. An empty answer or `y` accepts the suggestion,
/// `n` or end of input cancels, anything else is taken as the path.
pub struct PromptPicker {
    dir: PathBuf,
}

impl PromptPicker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SavePicker for PromptPicker {
    async fn pick(&self, suggested_name: &str) -> HlsResult<PathBuf> {
        let suggested = self.dir.join(suggested_name);

        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(format!("Save to {}? [Y/n/path] ", suggested.display()).as_bytes())
            .await?;
        stderr.flush().await?;

        let mut answer = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut answer)
            .await?;
        if read == 0 {
            return Err(HlsError::SaveCancelled);
        }

        match answer.trim() {
            "" | "y" | "Y" | "yes" => Ok(suggested),
            "n" | "N" | "no" => Err(HlsError::SaveCancelled),
            path => Ok(PathBuf::from(path)),
        }
    }
}

/// Knobs of a job taken from [Config].
#[derive(Clone)]
pub struct JobOptions {
    pub concurrency: NonZeroU32,
    pub progress_interval: Duration,
    pub key_resolver: KeyResolver,
}

impl From<&Config> for JobOptions {
    fn from(config: &Config) -> Self {
        Self {
            concurrency: config.concurrency,
            progress_interval: config.progress_interval(),
            key_resolver: KeyResolver::new(),
        }
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub output_path: PathBuf,
    pub segments: usize,
    pub total_bytes: u64,
    pub elapsed: Duration,
    pub average_throughput: f64,
}

/// One acquisition, from the media playlist to the saved file.
pub struct Job<P, R> {
    request: JobRequest,
    client: HttpClient,
    options: JobOptions,
    picker: P,
    reporter: R,
}

impl<P, R> Job<P, R>
where
    P: SavePicker,
    R: JobReporter,
{
    pub fn new(
        request: JobRequest,
        client: HttpClient,
        options: JobOptions,
        picker: P,
        reporter: R,
    ) -> Self {
        Self {
            request,
            client,
            options,
            picker,
            reporter,
        }
    }

    /// Run the job to its terminal state. Exactly one of
    /// [JobEvent::Completed] and [JobEvent::Failed] is reported.
    pub async fn run(self) -> HlsResult<JobOutcome> {
        let started_at = Instant::now();
        let job_id = self.request.job_id.clone();
        tracing::info!(
            "Job {job_id} started: {} {}",
            self.request.variant.resolution,
            self.request.variant.url
        );

        match self.execute(started_at).await {
            Ok(outcome) => {
                self.set_status(JobStatus::Completed);
                let output_name = outcome
                    .output_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| outcome.output_path.display().to_string());
                tracing::info!(
                    "Job {job_id} completed: {} ({} bytes in {:.2}s)",
                    outcome.output_path.display(),
                    outcome.total_bytes,
                    outcome.elapsed.as_secs_f64()
                );
                self.reporter.report(JobEvent::Completed {
                    job_id,
                    output_name,
                    elapsed_seconds: outcome.elapsed.as_secs_f64(),
                    average_throughput: outcome.average_throughput,
                    total_bytes: outcome.total_bytes,
                });
                Ok(outcome)
            }
            Err(e) => {
                self.set_status(JobStatus::Error);
                if e.is_cancellation() {
                    tracing::info!("Job {job_id} cancelled: {e}");
                } else {
                    tracing::error!("Job {job_id} failed: {e}");
                }
                self.reporter.report(JobEvent::Failed {
                    job_id,
                    message: e.to_string(),
                    cancelled: e.is_cancellation(),
                });
                Err(e)
            }
        }
    }

    async fn execute(&self, started_at: Instant) -> HlsResult<JobOutcome> {
        let request = &self.request;
        self.set_status(JobStatus::Preparing);

        let playlist = load_media_playlist(&self.client, &request.variant.url).await?;
        if playlist.segments.is_empty() {
            return Err(HlsError::NoSegments);
        }
        tracing::info!(
            "{} segments, media sequence {}.",
            playlist.segments.len(),
            playlist.media_sequence
        );
        let duration = request.duration.or(playlist.duration);

        let key = self
            .options
            .key_resolver
            .resolve(
                &self.client,
                request.encryption.as_ref(),
                playlist.media_sequence,
            )
            .await?;

        let file_name = output_file_name_now(
            request.page_title.as_deref(),
            &request.variant.resolution.to_string(),
            request.format.extension(),
        );
        let output_path = self.picker.pick(&file_name).await?;
        let mut sink = FileSink::create(&output_path, request.format, duration).await?;

        self.set_status(JobStatus::Downloading);
        let downloader = OrderedDownloader::new(self.client.clone(), key)
            .concurrency(self.options.concurrency)
            .progress_interval(self.options.progress_interval);
        let summary = match downloader
            .download(playlist.segments, &mut sink, |snapshot| {
                self.reporter.report(JobEvent::progress(
                    &request.job_id,
                    snapshot,
                    JobStatus::Downloading,
                ))
            })
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                sink.abort().await;
                return Err(e);
            }
        };

        self.set_status(sink.finalizing_status());
        if let Err(e) = sink.flush().await {
            sink.abort().await;
            return Err(e);
        }
        if request.format == OutputFormat::Mp4 {
            self.set_status(JobStatus::Saving);
        }
        let written = sink.close().await?;
        tracing::debug!("{written} bytes written to {}", output_path.display());

        let elapsed = started_at.elapsed();
        let average_throughput = if elapsed.as_secs_f64() > 0. {
            summary.total_bytes as f64 / elapsed.as_secs_f64()
        } else {
            summary.average_throughput
        };
        Ok(JobOutcome {
            output_path,
            segments: summary.segments,
            total_bytes: summary.total_bytes,
            elapsed,
            average_throughput,
        })
    }

    fn set_status(&self, status: JobStatus) {
        tracing::debug!("Job {} is {status:?}", self.request.job_id);
        self.reporter.report(JobEvent::StateChanged {
            session_id: self.request.session_id.clone(),
            job_id: Some(self.request.job_id.clone()),
            status: Some(status),
        });
    }
}
