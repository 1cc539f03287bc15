use clap::Parser;

mod commands;

#[derive(Parser)]
#[clap(name = "hlsgrab", version, about)]
struct HlsgrabArgs {
    #[clap(subcommand)]
    command: commands::HlsgrabCommand,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout is reserved for command output, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
                .try_from_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = HlsgrabArgs::parse();
    args.command.run().await
}
