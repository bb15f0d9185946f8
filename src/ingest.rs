use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context as _;

use crate::app::config::AppConfig;
use crate::app::dispatcher::InlineJobDispatcher;
use crate::app::model::{Job, JobStatus};
use crate::app::runner::JobRunner;
use crate::app::service::{JobService, NovelSubmission};
use crate::cli::IngestArgs;

pub async fn run(args: IngestArgs) -> anyhow::Result<()> {
    let mut config = AppConfig::from_env().context("load config")?;
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    config.fetch = args.fetch.apply(config.fetch);

    let runner = crate::app::open_runner(&config).await?;
    let service = JobService::new(
        Arc::clone(&runner),
        Arc::new(InlineJobDispatcher::new(Arc::clone(&runner))),
    );

    let submitted = service
        .submit_extraction(NovelSubmission {
            url: args.url,
            title: args.title,
            author: args.author,
            description: args.description,
            tags: args.tags,
        })
        .await?;
    tracing::info!(novel_id = %submitted.novel_id, job_id = %submitted.job_id, "ingest finished");

    print_finished_job(&runner, &submitted.job_id).await
}

/// Prints the job as JSON and fails when it did not finish successfully.
pub(crate) async fn print_finished_job(runner: &JobRunner, job_id: &str) -> anyhow::Result<()> {
    let job: Job = runner
        .store()
        .get_job(job_id)
        .await
        .context("load job")?
        .ok_or_else(|| anyhow::anyhow!("job not found: {job_id}"))?;

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &job).context("write job json")?;
    stdout.write_all(b"\n").context("write newline")?;
    drop(stdout);

    if job.status != JobStatus::Done {
        anyhow::bail!(
            "job {job_id} ended with status {:?}: {}",
            job.status,
            job.error.as_deref().unwrap_or("no error recorded")
        );
    }
    Ok(())
}
