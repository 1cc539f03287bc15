use std::{num::NonZeroU32, path::PathBuf};

use clap::{Args, Subcommand};
use fake_user_agent::get_chrome_rua;
use hlsgrab::{config::Config, config::OutputFormat, util::http::HttpClient};
use url::Url;

mod download;
mod inspect;
mod serve;

#[derive(Subcommand)]
pub enum HlsgrabCommand {
    Inspect(inspect::InspectCommand),
    Download(download::DownloadCommand),
    Serve(serve::ServeCommand),
}

impl HlsgrabCommand {
    pub async fn run(self) -> anyhow::Result<()> {
        match self {
            HlsgrabCommand::Inspect(command) => command.run().await,
            HlsgrabCommand::Download(command) => command.run().await,
            HlsgrabCommand::Serve(command) => command.run().await,
        }
    }
}

/// Options shared by every command. Flags override the config file.
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigOptions {
    /// Path to a TOML config file
    #[clap(long, env = "HLSGRAB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Additional HTTP headers, e.g. "Referer: https://rplay.live/"
    #[clap(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Cookies sent along with playlist requests, e.g. "token=abc"
    #[clap(long = "cookie")]
    pub cookies: Vec<String>,

    /// Segments downloaded at the same time
    #[clap(long, alias = "threads")]
    pub concurrency: Option<NonZeroU32>,

    /// Output container: ts or mp4
    #[clap(long)]
    pub format: Option<OutputFormat>,

    /// Directory the output is saved to
    #[clap(long, env = "HLSGRAB_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Override the browser-like user agent
    #[clap(long)]
    pub user_agent: Option<String>,
}

impl ConfigOptions {
    pub fn load(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        config.headers.extend(self.headers.iter().cloned());
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(format) = self.format {
            config.output_format = format;
        }
        if let Some(output_dir) = &self.output_dir {
            config.output_dir = Some(output_dir.clone());
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent = Some(user_agent.clone());
        }
        if config.user_agent.is_none() {
            config.user_agent = Some(get_chrome_rua().to_string());
        }
        Ok(config)
    }

    pub fn client(&self, config: &Config, url: Option<&Url>) -> anyhow::Result<HttpClient> {
        let client = HttpClient::from_config(config)?;
        if let Some(url) = url {
            client.add_cookies(self.cookies.clone(), url.clone())?;
        }
        Ok(client)
    }
}

pub fn output_dir(config: &Config) -> PathBuf {
    config
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."))
}
