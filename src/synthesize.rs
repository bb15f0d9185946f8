use std::sync::Arc;

use anyhow::Context as _;

use crate::app::config::AppConfig;
use crate::app::dispatcher::InlineJobDispatcher;
use crate::app::service::JobService;
use crate::cli::SynthesizeArgs;

pub async fn run(args: SynthesizeArgs) -> anyhow::Result<()> {
    let mut config = AppConfig::from_env().context("load config")?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let runner = crate::app::open_runner(&config).await?;
    let service = JobService::new(
        Arc::clone(&runner),
        Arc::new(InlineJobDispatcher::new(Arc::clone(&runner))),
    );

    let provider = args.provider.as_deref();
    let job_id = match (&args.novel_id, &args.chapter_id) {
        (Some(novel_id), _) => service.submit_novel_synthesis(novel_id, provider).await?,
        (None, Some(chapter_id)) => service.submit_chapter_synthesis(chapter_id, provider).await?,
        (None, None) => anyhow::bail!("either --novel-id or --chapter-id is required"),
    };

    crate::ingest::print_finished_job(&runner, &job_id).await
}
