use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    job::{JobRequest, JobStatus},
    m3u8::Manifest,
    progress::ProgressSnapshot,
    session::SessionId,
};

/// Everything the host side can ask for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// A network request of the session matched a manifest url.
    ManifestDetected { url: Url, session_id: SessionId },
    GetVideoInfo { session_id: SessionId },
    GetDownloadState { session_id: SessionId },
    StartDownload(JobRequest),
    /// The session's page navigated away. Its state is discarded.
    Navigated { session_id: SessionId },
    Closed { session_id: SessionId },
}

impl Request {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Request::ManifestDetected { session_id, .. }
            | Request::GetVideoInfo { session_id }
            | Request::GetDownloadState { session_id }
            | Request::Navigated { session_id }
            | Request::Closed { session_id } => session_id,
            Request::StartDownload(request) => &request.session_id,
        }
    }
}

/// Everything the core reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    VideoDetected {
        session_id: SessionId,
        manifests: Vec<Manifest>,
    },
    StateChanged {
        session_id: SessionId,
        job_id: Option<String>,
        status: Option<JobStatus>,
    },
    Progress {
        job_id: String,
        completed: usize,
        total: usize,
        throughput_bytes_per_sec: f64,
        status: JobStatus,
    },
    Completed {
        job_id: String,
        output_name: String,
        elapsed_seconds: f64,
        average_throughput: f64,
        total_bytes: u64,
    },
    Failed {
        job_id: String,
        message: String,
        /// The user backed out of the save destination.
        cancelled: bool,
    },
}

impl JobEvent {
    pub fn progress(job_id: &str, snapshot: ProgressSnapshot, status: JobStatus) -> Self {
        JobEvent::Progress {
            job_id: job_id.to_string(),
            completed: snapshot.completed,
            total: snapshot.total,
            throughput_bytes_per_sec: snapshot.throughput_bytes_per_sec,
            status,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            JobEvent::VideoDetected { .. } => None,
            JobEvent::StateChanged { job_id, .. } => job_id.as_deref(),
            JobEvent::Progress { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Failed { job_id, .. } => Some(job_id),
        }
    }
}
