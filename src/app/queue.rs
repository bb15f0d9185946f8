use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Runs job bodies as tokio tasks, at most `max_concurrency` at a time.
#[derive(Debug, Clone)]
pub struct JobQueue {
    semaphore: Arc<Semaphore>,
}

impl JobQueue {
    pub fn new(max_concurrency: usize) -> Self {
        let permits = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn spawn<F>(&self, fut: F) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                tracing::error!("job queue is closed");
                return;
            };
            fut.await;
        })
    }
}
