use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;

use webnovel::app::config::AppConfig;
use webnovel::app::dispatcher::{InProcessJobDispatcher, JobDispatcher};
use webnovel::app::http::{AppState, router};
use webnovel::app::queue::JobQueue;
use webnovel::app::service::JobService;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Overrides WEBNOVEL_DATA_DIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    webnovel::logging::init(webnovel::logging::SERVICE_FILTER)?;

    let args = AppArgs::parse();
    let mut config = AppConfig::from_env().context("load config")?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    tracing::info!(
        addr = %args.addr,
        data_dir = %config.data_dir.display(),
        backend = ?config.search_backend,
        "starting webnovel-app"
    );

    let runner = webnovel::app::open_runner(&config).await?;
    let dispatcher: Arc<dyn JobDispatcher> = Arc::new(InProcessJobDispatcher::new(
        JobQueue::new(config.max_concurrency),
        Arc::clone(&runner),
    ));
    let state = AppState {
        service: Arc::new(JobService::new(runner, dispatcher)),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(?err, "listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
