//! Per-session state: detected manifests and the job running for them.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    error::{HlsError, HlsResult},
    job::{JobReporter, JobStatus},
    m3u8::Manifest,
    message::JobEvent,
};

/// Identifies one page context, such as a browser tab.
pub type SessionId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    pub status: JobStatus,
}

struct ActiveJob {
    state: JobState,
    events: mpsc::UnboundedSender<JobEvent>,
}

#[derive(Default)]
struct Session {
    manifests: Vec<Manifest>,
    job: Option<ActiveJob>,
}

/// Process-wide owner of every session's state.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<SessionId, Session>>>,
    cleanup_grace: Duration,
}

impl SessionRegistry {
    pub fn new(cleanup_grace: Duration) -> Self {
        Self {
            sessions: Default::default(),
            cleanup_grace,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a session. Returns `false` if it already existed.
    pub fn create(&self, session_id: &str) -> bool {
        let mut sessions = self.lock();
        if sessions.contains_key(session_id) {
            return false;
        }
        sessions.insert(session_id.to_string(), Session::default());
        true
    }

    pub fn lookup(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    /// Remember a manifest for the session, creating the session if needed.
    /// A manifest whose base url is already known is ignored and `false` is
    /// returned.
    pub fn add_manifest(&self, session_id: &str, manifest: Manifest) -> bool {
        let mut sessions = self.lock();
        let session = sessions.entry(session_id.to_string()).or_default();
        if session
            .manifests
            .iter()
            .any(|m| m.base_url == manifest.base_url)
        {
            tracing::debug!("Manifest {} already known.", manifest.base_url);
            return false;
        }
        session.manifests.push(manifest);
        true
    }

    pub fn manifests(&self, session_id: &str) -> Vec<Manifest> {
        self.lock()
            .get(session_id)
            .map(|s| s.manifests.clone())
            .unwrap_or_default()
    }

    /// Register a new job for the session. Its events are forwarded to
    /// `events` for as long as the session lives.
    ///
    /// A session holds at most one job that has not reached a terminal state.
    pub fn begin_job(
        &self,
        session_id: &str,
        job_id: &str,
        events: mpsc::UnboundedSender<JobEvent>,
    ) -> HlsResult<SessionJobReporter> {
        let mut sessions = self.lock();
        let session = sessions.entry(session_id.to_string()).or_default();
        if let Some(job) = &session.job {
            if !job.state.status.is_terminal() {
                return Err(HlsError::JobAlreadyRunning(session_id.to_string()));
            }
        }

        session.job = Some(ActiveJob {
            state: JobState {
                job_id: job_id.to_string(),
                status: JobStatus::Preparing,
            },
            events,
        });
        Ok(SessionJobReporter {
            registry: self.clone(),
            session_id: session_id.to_string(),
            job_id: job_id.to_string(),
        })
    }

    pub fn job_status(&self, session_id: &str) -> Option<JobState> {
        self.lock()
            .get(session_id)?
            .job
            .as_ref()
            .map(|job| job.state.clone())
    }

    /// Forget the job `job_id` of the session, if it is still the current one.
    pub fn finish_job(&self, session_id: &str, job_id: &str) -> bool {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(session_id) else {
            return false;
        };
        if session
            .job
            .as_ref()
            .is_some_and(|job| job.state.job_id == job_id)
        {
            session.job = None;
            return true;
        }
        false
    }

    /// Drop everything known about the session. A running job keeps running
    /// but none of its events are delivered any more.
    pub fn evict(&self, session_id: &str) -> bool {
        let evicted = self.lock().remove(session_id).is_some();
        if evicted {
            tracing::info!("Session {session_id} evicted.");
        }
        evicted
    }

    fn publish(&self, session_id: &str, job_id: &str, event: JobEvent) {
        let mut sessions = self.lock();
        let Some(job) = sessions
            .get_mut(session_id)
            .and_then(|s| s.job.as_mut())
            .filter(|job| job.state.job_id == job_id)
        else {
            return;
        };

        if let JobEvent::StateChanged {
            status: Some(status),
            ..
        } = &event
        {
            if !job.state.status.can_transition_to(*status) && job.state.status != *status {
                tracing::warn!(
                    "Unexpected transition of job {job_id}: {:?} -> {status:?}",
                    job.state.status
                );
            }
            job.state.status = *status;
            if status.is_terminal() {
                self.schedule_cleanup(session_id, job_id);
            }
        }
        _ = job.events.send(event);
    }

    fn schedule_cleanup(&self, session_id: &str, job_id: &str) {
        let registry = self.clone();
        let session_id = session_id.to_string();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(registry.cleanup_grace).await;
            if registry.finish_job(&session_id, &job_id) {
                tracing::debug!("Job {job_id} of session {session_id} cleared.");
            }
        });
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

/// Reports the events of one job through the registry, keeping its status
/// current.
pub struct SessionJobReporter {
    registry: SessionRegistry,
    session_id: SessionId,
    job_id: String,
}

impl JobReporter for SessionJobReporter {
    fn report(&self, event: JobEvent) {
        self.registry.publish(&self.session_id, &self.job_id, event);
    }
}
