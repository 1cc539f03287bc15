use std::{io::Write, path::PathBuf};

use anyhow::bail;
use clap::Parser;
use hlsgrab::{
    decrypt::KeyResolver,
    job::{
        DirectoryPicker, FixedPathPicker, Job, JobOptions, JobOutcome, JobRequest, PromptPicker,
        SavePicker,
    },
    m3u8::{load_manifest, Manifest, Resolution, StreamVariant},
    util::http::HttpClient,
    HlsError, JobEvent,
};
use tokio::sync::mpsc;
use url::Url;

use super::{output_dir, ConfigOptions};

#[derive(Parser, Clone, Debug)]
#[clap(name = "download", visible_alias = "dl", short_flag = 'D')]
pub struct DownloadCommand {
    #[clap(flatten)]
    pub options: ConfigOptions,

    /// Index of the rendition, as listed by `inspect`
    #[clap(long, conflicts_with = "resolution")]
    pub variant: Option<usize>,

    /// Rendition to download, e.g. 1920x1080. Defaults to the largest one
    #[clap(long)]
    pub resolution: Option<Resolution>,

    /// Output file path
    #[clap(short, long, conflicts_with = "output_dir")]
    pub output: Option<PathBuf>,

    /// Title used to name the output file
    #[clap(long)]
    pub title: Option<String>,

    /// Decryption key in hex, overriding the one referenced by the playlist
    #[clap(long)]
    pub key: Option<String>,

    /// Save without asking for confirmation
    #[clap(short, long)]
    pub yes: bool,

    /// Master playlist url
    pub url: Url,
}

impl DownloadCommand {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.options.load()?;
        let client = self.options.client(&config, Some(&self.url))?;

        let Some(manifest) = load_manifest(&client, &self.url).await? else {
            bail!("No rendition found in {}", self.url);
        };
        let variant = self.select_variant(&manifest)?;
        tracing::info!("Selected {} {}", variant.resolution, variant.url);

        let request = JobRequest {
            session_id: "cli".to_string(),
            job_id: format!("cli-{}", std::process::id()),
            variant,
            encryption: manifest.encryption.clone(),
            page_title: self.title.clone(),
            duration: manifest.duration,
            format: config.output_format,
        };
        let mut options = JobOptions::from(&config);
        options.key_resolver = KeyResolver::with_manual_key(self.key.clone());

        let dir = output_dir(&config);
        let outcome = if let Some(output) = &self.output {
            run_job(request, client, options, FixedPathPicker(output.clone())).await
        } else if self.yes {
            run_job(request, client, options, DirectoryPicker::new(dir)).await
        } else {
            run_job(request, client, options, PromptPicker::new(dir)).await
        };

        match outcome {
            Ok(outcome) => {
                eprintln!(
                    "Saved {} ({} segments, {}, {:.1}s, avg {}/s)",
                    outcome.output_path.display(),
                    outcome.segments,
                    human_bytes(outcome.total_bytes as f64),
                    outcome.elapsed.as_secs_f64(),
                    human_bytes(outcome.average_throughput)
                );
                Ok(())
            }
            Err(HlsError::SaveCancelled) => {
                eprintln!("Cancelled.");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn select_variant(&self, manifest: &Manifest) -> anyhow::Result<StreamVariant> {
        let variant = if let Some(index) = self.variant {
            manifest.variants.get(index)
        } else if let Some(resolution) = self.resolution {
            manifest
                .variants
                .iter()
                .find(|v| v.resolution == resolution)
        } else {
            manifest.variants.iter().max_by_key(|v| {
                (
                    v.resolution.width as u64 * v.resolution.height as u64,
                    v.bandwidth.unwrap_or(0),
                )
            })
        };

        match variant {
            Some(variant) => Ok(variant.clone()),
            None => {
                let wanted = self
                    .variant
                    .map(|i| format!("#{i}"))
                    .or_else(|| self.resolution.map(|r| r.to_string()))
                    .unwrap_or_default();
                Err(HlsError::UnknownVariant(wanted).into())
            }
        }
    }
}

async fn run_job<P>(
    request: JobRequest,
    client: HttpClient,
    options: JobOptions,
    picker: P,
) -> Result<JobOutcome, HlsError>
where
    P: SavePicker,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        let mut stderr = std::io::stderr();
        while let Some(event) = rx.recv().await {
            if let JobEvent::Progress {
                completed,
                total,
                throughput_bytes_per_sec,
                ..
            } = event
            {
                let percentage = completed as f64 / total.max(1) as f64 * 100.;
                _ = write!(
                    stderr,
                    "\r{completed} / {total} ({percentage:.2}%) {}/s    ",
                    human_bytes(throughput_bytes_per_sec)
                );
                _ = stderr.flush();
            }
        }
        _ = writeln!(stderr);
    });

    let job = Job::new(request, client, options, picker, tx);
    let result = tokio::select! {
        result = job.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, stopping download.");
            Err(HlsError::Aborted)
        }
    };
    // the job owned the only sender
    _ = printer.await;
    result
}

fn human_bytes(bytes: f64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024. && unit < UNITS.len() - 1 {
        value /= 1024.;
        unit += 1;
    }
    format!("{value:.2}{}", UNITS[unit])
}
