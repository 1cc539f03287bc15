use std::sync::Arc;

use clap::Parser;
use hlsgrab::{
    config::Config,
    detect::ManifestDetector,
    job::{DirectoryPicker, Job, JobOptions, JobRequest},
    util::http::HttpClient,
    JobEvent, Request, SessionRegistry,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc,
};

use super::{output_dir, ConfigOptions};

/// Speak newline-delimited JSON: requests on stdin, events on stdout.
#[derive(Parser, Clone, Debug)]
#[clap(name = "serve")]
pub struct ServeCommand {
    #[clap(flatten)]
    pub options: ConfigOptions,
}

struct Server {
    config: Config,
    client: HttpClient,
    registry: SessionRegistry,
    detector: Arc<ManifestDetector>,
    events: mpsc::UnboundedSender<JobEvent>,
}

impl ServeCommand {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.options.load()?;
        let client = self.options.client(&config, None)?;
        let registry = SessionRegistry::new(config.cleanup_grace());
        let detector = Arc::new(ManifestDetector::new(
            client.clone(),
            registry.clone(),
            &config,
        ));

        let (events, mut rx) = mpsc::unbounded_channel::<JobEvent>();
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(event) = rx.recv().await {
                let mut line = match serde_json::to_string(&event) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!("Failed to serialize event: {e}");
                        continue;
                    }
                };
                line.push('\n');
                if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err()
                {
                    break;
                }
            }
        });

        let server = Server {
            config,
            client,
            registry,
            detector,
            events,
        };

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Request>(line) {
                Ok(request) => server.handle(request),
                Err(e) => tracing::warn!("Ignored invalid request: {e}"),
            }
        }

        tracing::info!("Input closed, shutting down.");
        drop(server);
        _ = writer.await;
        Ok(())
    }
}

impl Server {
    fn handle(&self, request: Request) {
        match request {
            Request::ManifestDetected { url, session_id } => {
                let detector = self.detector.clone();
                let registry = self.registry.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    match detector.on_trigger(&session_id, &url).await {
                        Ok(Some(_)) => {
                            _ = events.send(JobEvent::VideoDetected {
                                manifests: registry.manifests(&session_id),
                                session_id,
                            });
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!("Failed to load manifest {url}: {e}"),
                    }
                });
            }
            Request::GetVideoInfo { session_id } => {
                _ = self.events.send(JobEvent::VideoDetected {
                    manifests: self.registry.manifests(&session_id),
                    session_id,
                });
            }
            Request::GetDownloadState { session_id } => {
                let state = self.registry.job_status(&session_id);
                _ = self.events.send(JobEvent::StateChanged {
                    session_id,
                    job_id: state.as_ref().map(|s| s.job_id.clone()),
                    status: state.map(|s| s.status),
                });
            }
            Request::StartDownload(request) => self.start_download(request),
            Request::Navigated { session_id } | Request::Closed { session_id } => {
                self.registry.evict(&session_id);
                self.detector.forget_session(&session_id);
            }
        }
    }

    fn start_download(&self, request: JobRequest) {
        let reporter =
            match self
                .registry
                .begin_job(&request.session_id, &request.job_id, self.events.clone())
            {
                Ok(reporter) => reporter,
                Err(e) => {
                    _ = self.events.send(JobEvent::Failed {
                        job_id: request.job_id,
                        message: e.to_string(),
                        cancelled: false,
                    });
                    return;
                }
            };

        let picker = DirectoryPicker::new(output_dir(&self.config));
        let job = Job::new(
            request,
            self.client.clone(),
            JobOptions::from(&self.config),
            picker,
            reporter,
        );
        // the outcome is reported through the registry
        tokio::spawn(async move {
            _ = job.run().await;
        });
    }
}
