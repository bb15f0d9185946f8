#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;

use webnovel::app::catalog::{CatalogStore, MemoryCatalogStore};
use webnovel::app::dispatcher::InlineJobDispatcher;
use webnovel::app::library::Library;
use webnovel::app::model::{
    Chapter, ChapterAudio, ChapterStatus, Job, JobStatus, JobUpdate, Novel, NovelStatus,
};
use webnovel::app::runner::JobRunner;
use webnovel::app::search::SearchBackend;
use webnovel::app::service::JobService;
use webnovel::fetch::{FetchSettings, Fetcher};
use webnovel::synth::{ProviderRegistry, SpeechSynthesizer, SynthesizedAudio};

/// Local HTTP site serving fixed pages; anything else is a 404.
pub struct StubSite {
    pub base_url: String,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    shutdown_tx: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StubSite {
    pub fn start(pages: &[(&str, u16, String)]) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
        let base_url = format!("http://{}", server.server_addr());
        let pages = pages
            .iter()
            .map(|(path, status, body)| (path.to_string(), (*status, body.clone())))
            .collect::<HashMap<_, _>>();
        let hits = Arc::new(Mutex::new(HashMap::<String, usize>::new()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let hits_for_server = Arc::clone(&hits);
        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().to_string();
                *hits_for_server
                    .lock()
                    .unwrap()
                    .entry(path.clone())
                    .or_default() += 1;

                let (status, body) = pages
                    .get(&path)
                    .cloned()
                    .unwrap_or((404, "not found".to_string()));
                let header = tiny_http::Header::from_bytes(
                    &b"Content-Type"[..],
                    &b"text/html; charset=utf-8"[..],
                )
                .expect("build header");
                let response = tiny_http::Response::from_string(body)
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            hits,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

impl Drop for StubSite {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn chapter_page(title: &str, paragraphs: &[&str]) -> String {
    let body = paragraphs
        .iter()
        .map(|p| format!("<p>{p}</p>"))
        .collect::<String>();
    format!(
        "<!doctype html><html><head><title>{title} | Site</title></head>\
         <body><nav><a href=\"/\">Home</a></nav><h1>{title}</h1>\
         <div id=\"content\">{body}</div></body></html>"
    )
}

pub fn fast_fetch() -> FetchSettings {
    FetchSettings {
        max_retries: 3,
        base_backoff: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
    }
}

pub fn runner(
    library_dir: &Path,
    store: Arc<dyn CatalogStore>,
    providers: ProviderRegistry,
) -> Arc<JobRunner> {
    let search = SearchBackend::Index.build(Arc::clone(&store));
    Arc::new(JobRunner::new(
        store,
        search,
        Library::new(library_dir),
        Fetcher::new(fast_fetch()).expect("build fetcher"),
        providers,
    ))
}

/// A service whose jobs have finished by the time a submit call returns.
pub fn inline_service(runner: &Arc<JobRunner>) -> JobService {
    JobService::new(
        Arc::clone(runner),
        Arc::new(InlineJobDispatcher::new(Arc::clone(runner))),
    )
}

/// Memory store that remembers every job state it handed back after an
/// update.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryCatalogStore,
    job_states: Mutex<Vec<(String, JobStatus, u8)>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn progress_of(&self, job_id: &str) -> Vec<u8> {
        self.job_states
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == job_id)
            .map(|(_, _, progress)| *progress)
            .collect()
    }

    pub fn statuses_of(&self, job_id: &str) -> Vec<JobStatus> {
        self.job_states
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == job_id)
            .map(|(_, status, _)| *status)
            .collect()
    }
}

#[async_trait]
impl CatalogStore for RecordingStore {
    async fn get_novel(&self, novel_id: &str) -> anyhow::Result<Option<Novel>> {
        self.inner.get_novel(novel_id).await
    }

    async fn find_novel_by_source_url(&self, source_url: &str) -> anyhow::Result<Option<Novel>> {
        self.inner.find_novel_by_source_url(source_url).await
    }

    async fn list_novels(&self) -> anyhow::Result<Vec<Novel>> {
        self.inner.list_novels().await
    }

    async fn get_chapter(&self, chapter_id: &str) -> anyhow::Result<Option<Chapter>> {
        self.inner.get_chapter(chapter_id).await
    }

    async fn get_chapters(&self, novel_id: &str) -> anyhow::Result<Vec<Chapter>> {
        self.inner.get_chapters(novel_id).await
    }

    async fn get_job(&self, job_id: &str) -> anyhow::Result<Option<Job>> {
        self.inner.get_job(job_id).await
    }

    async fn insert_novel(&self, novel: &Novel) -> anyhow::Result<()> {
        self.inner.insert_novel(novel).await
    }

    async fn insert_chapter(&self, chapter: &Chapter) -> anyhow::Result<()> {
        self.inner.insert_chapter(chapter).await
    }

    async fn insert_job(&self, job: &Job) -> anyhow::Result<()> {
        self.inner.insert_job(job).await
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        update: &JobUpdate,
    ) -> anyhow::Result<Option<Job>> {
        let job = self.inner.update_job_status(job_id, update).await?;
        if let Some(job) = &job {
            self.job_states
                .lock()
                .unwrap()
                .push((job.id.clone(), job.status, job.progress));
        }
        Ok(job)
    }

    async fn update_chapter_status(
        &self,
        chapter_id: &str,
        status: ChapterStatus,
    ) -> anyhow::Result<()> {
        self.inner.update_chapter_status(chapter_id, status).await
    }

    async fn update_novel_status(&self, novel_id: &str, status: NovelStatus) -> anyhow::Result<()> {
        self.inner.update_novel_status(novel_id, status).await
    }

    async fn update_chapter_audio_info(
        &self,
        chapter_id: &str,
        audio: &ChapterAudio,
    ) -> anyhow::Result<()> {
        self.inner.update_chapter_audio_info(chapter_id, audio).await
    }
}

/// Provider that wraps each chunk in brackets and counts its calls.
pub struct CountingSynthesizer {
    name: &'static str,
    calls: AtomicUsize,
    fail: bool,
}

impl CountingSynthesizer {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            fail: false,
        })
    }

    pub fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicUsize::new(0),
            fail: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for CountingSynthesizer {
    fn name(&self) -> &str {
        self.name
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<SynthesizedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("provider unavailable");
        }
        Ok(SynthesizedAudio {
            bytes: format!("[{text}]").into_bytes(),
            duration_seconds: 2,
        })
    }
}
