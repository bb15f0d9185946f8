use std::sync::Arc;

use async_trait::async_trait;

use crate::app::queue::JobQueue;
use crate::app::runner::JobRunner;

/// Starts the asynchronous body of a job whose record already exists.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job_id: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct InProcessJobDispatcher {
    queue: JobQueue,
    runner: Arc<JobRunner>,
}

impl InProcessJobDispatcher {
    pub fn new(queue: JobQueue, runner: Arc<JobRunner>) -> Self {
        Self { queue, runner }
    }
}

#[async_trait]
impl JobDispatcher for InProcessJobDispatcher {
    async fn dispatch(&self, job_id: &str) -> anyhow::Result<()> {
        let runner = Arc::clone(&self.runner);
        let job_id = job_id.to_string();
        tracing::debug!(job_id, "dispatching job");
        self.queue.spawn(async move {
            runner.run_job(&job_id).await;
        });
        Ok(())
    }
}

/// Runs the job to completion before returning. Used by the CLI, where the
/// process would otherwise exit under a background task.
#[derive(Clone)]
pub struct InlineJobDispatcher {
    runner: Arc<JobRunner>,
}

impl InlineJobDispatcher {
    pub fn new(runner: Arc<JobRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl JobDispatcher for InlineJobDispatcher {
    async fn dispatch(&self, job_id: &str) -> anyhow::Result<()> {
        self.runner.run_job(job_id).await;
        Ok(())
    }
}
