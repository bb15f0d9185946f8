use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    webnovel::logging::init(webnovel::logging::CLI_FILTER).context("init logging")?;

    let cli = webnovel::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        webnovel::cli::Command::Extract(args) => {
            webnovel::extract::run(args).await.context("extract")?;
        }
        webnovel::cli::Command::Discover(args) => {
            webnovel::discover::run(args).await.context("discover")?;
        }
        webnovel::cli::Command::Ingest(args) => {
            webnovel::ingest::run(args).await.context("ingest")?;
        }
        webnovel::cli::Command::Synthesize(args) => {
            webnovel::synthesize::run(args).await.context("synthesize")?;
        }
        webnovel::cli::Command::Chunk(args) => {
            webnovel::chunk::run(args).context("chunk")?;
        }
    }

    Ok(())
}
