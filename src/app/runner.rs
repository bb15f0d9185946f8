use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;

use crate::app::catalog::CatalogStore;
use crate::app::library::{Library, PackageFormat, read_text};
use crate::app::model::{
    Chapter, ChapterAudio, ChapterStatus, ExtractPayload, Job, JobKind, JobUpdate, NovelStatus,
    NovelView, SynthesizeChapterPayload, SynthesizeNovelPayload, scaled_progress,
};
use crate::app::search::SearchIndex;
use crate::chunk::{DEFAULT_MAX_CHARS, chunk_text};
use crate::fetch::Fetcher;
use crate::package::{ChapterContent, NovelMetadata};
use crate::synth::{ProviderRegistry, SpeechSynthesizer};

/// Share of the progress bar used by chapter extraction.
pub const EXTRACT_PROGRESS_CEILING: u8 = 50;
/// Share of the progress bar used by synthesis.
pub const SYNTH_PROGRESS_CEILING: u8 = 90;

pub fn chapter_id(novel_id: &str, index: u32) -> String {
    format!("{novel_id}-c{index}")
}

pub struct JobRunner {
    store: Arc<dyn CatalogStore>,
    search: Arc<dyn SearchIndex>,
    library: Library,
    fetcher: Fetcher,
    providers: ProviderRegistry,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        search: Arc<dyn SearchIndex>,
        library: Library,
        fetcher: Fetcher,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            store,
            search,
            library,
            fetcher,
            providers,
        }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub fn search(&self) -> &Arc<dyn SearchIndex> {
        &self.search
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Runs one job to a terminal status. Failures end up on the job record,
    /// never with the caller.
    pub async fn run_job(&self, job_id: &str) {
        let job = match self.store.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!(job_id, "job not found");
                return;
            }
            Err(err) => {
                tracing::error!(job_id, ?err, "load job");
                return;
            }
        };
        if job.status.is_terminal() {
            tracing::debug!(job_id, status = ?job.status, "job already finished");
            return;
        }

        tracing::info!(job_id, kind = ?job.kind, novel_id = ?job.novel_id, "job started");
        match self.try_run_job(&job).await {
            Ok(()) => tracing::info!(job_id, "job done"),
            Err(err) => {
                tracing::error!(job_id, ?err, "job failed");
                self.mark_error(&job, format!("{err:#}")).await;
            }
        }
    }

    async fn try_run_job(&self, job: &Job) -> anyhow::Result<()> {
        self.store
            .update_job_status(&job.id, &JobUpdate::running())
            .await
            .context("mark running")?;

        match job.kind {
            JobKind::Extract => {
                let payload: ExtractPayload = serde_json::from_value(job.payload.clone())
                    .context("decode extract payload")?;
                let novel_id = job
                    .novel_id
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("extract job has no novel"))?;
                self.run_extraction(&job.id, novel_id, &payload).await?;
            }
            JobKind::SynthesizeChapter => {
                let payload: SynthesizeChapterPayload =
                    serde_json::from_value(job.payload.clone())
                        .context("decode synthesis payload")?;
                self.run_chapter_synthesis(&job.id, &payload).await?;
            }
            JobKind::SynthesizeNovel => {
                let payload: SynthesizeNovelPayload = serde_json::from_value(job.payload.clone())
                    .context("decode synthesis payload")?;
                let novel_id = job
                    .novel_id
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("synthesis job has no novel"))?;
                self.run_novel_synthesis(&job.id, novel_id, &payload).await?;
            }
        }

        self.store
            .update_job_status(&job.id, &JobUpdate::done())
            .await
            .context("mark done")?;
        Ok(())
    }

    async fn mark_error(&self, job: &Job, message: String) {
        if let Err(err) = self
            .store
            .update_job_status(&job.id, &JobUpdate::failed(message))
            .await
        {
            tracing::error!(job_id = %job.id, ?err, "mark job error");
        }

        if job.kind == JobKind::Extract
            && let Some(novel_id) = &job.novel_id
            && let Err(err) = self
                .store
                .update_novel_status(novel_id, NovelStatus::Error)
                .await
        {
            tracing::error!(job_id = %job.id, novel_id, ?err, "mark novel error");
        }
    }

    async fn update_progress(&self, job_id: &str, percent: u8) -> anyhow::Result<()> {
        self.store
            .update_job_status(job_id, &JobUpdate::progress(percent))
            .await
            .context("update job progress")?;
        Ok(())
    }

    async fn run_extraction(
        &self,
        job_id: &str,
        novel_id: &str,
        payload: &ExtractPayload,
    ) -> anyhow::Result<()> {
        let mut novel = self
            .store
            .get_novel(novel_id)
            .await
            .context("load novel")?
            .ok_or_else(|| anyhow::anyhow!("novel not found: {novel_id}"))?;

        let mut urls = crate::discover::discover_chapter_urls(&self.fetcher, &payload.url).await;
        if urls.is_empty() {
            tracing::info!(job_id, url = %payload.url, "no chapter links, treating page as the only chapter");
            urls.push(payload.url.clone());
        }
        tracing::info!(job_id, novel_id, chapters = urls.len(), "extracting chapters");

        let total = urls.len();
        let mut contents = Vec::with_capacity(total);
        for (pos, url) in urls.iter().enumerate() {
            let index = u32::try_from(pos + 1).context("chapter index overflow")?;
            let extracted = crate::extract::extract_chapter(&self.fetcher, url)
                .await
                .ok_or_else(|| anyhow::anyhow!("failed to extract chapter {index}: {url}"))?;

            let title = match extracted.title.trim() {
                "" => format!("Chapter {index}"),
                title => title.to_owned(),
            };
            let text_path = self
                .library
                .write_chapter_text(novel_id, index, &extracted.text)
                .await?;
            let now = Utc::now();
            let chapter = Chapter {
                id: chapter_id(novel_id, index),
                novel_id: novel_id.to_owned(),
                index,
                title: title.clone(),
                source_url: url.clone(),
                text_path: Some(text_path),
                audio: None,
                status: ChapterStatus::Ready,
                created_at: now,
                updated_at: now,
            };
            self.store
                .insert_chapter(&chapter)
                .await
                .context("save chapter")?;
            tracing::debug!(job_id, novel_id, index, url = %url, "chapter extracted");

            contents.push(ChapterContent {
                title,
                text: extracted.text,
            });
            self.update_progress(job_id, scaled_progress(pos + 1, total, EXTRACT_PROGRESS_CEILING))
                .await?;
        }

        novel.status = NovelStatus::Ready;
        novel.chapter_count = Some(u32::try_from(total).context("chapter count overflow")?);
        self.store
            .insert_novel(&novel)
            .await
            .context("save novel")?;

        let metadata = NovelMetadata {
            id: Some(novel.id.clone()),
            title: novel.title.clone(),
            author: novel.author.clone(),
            description: novel.description.clone(),
        };
        self.library
            .package(PackageFormat::Text, metadata.clone(), contents.clone())
            .await
            .context("package text")?;
        self.library
            .package(PackageFormat::Epub, metadata, contents)
            .await
            .context("package epub")?;

        self.refresh_search(novel_id).await;
        Ok(())
    }

    fn provider(&self, name: &str) -> anyhow::Result<Arc<dyn SpeechSynthesizer>> {
        self.providers
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("unknown provider: {name}"))
    }

    async fn run_chapter_synthesis(
        &self,
        job_id: &str,
        payload: &SynthesizeChapterPayload,
    ) -> anyhow::Result<()> {
        let provider = self.provider(&payload.provider)?;
        let chapter = self
            .store
            .get_chapter(&payload.chapter_id)
            .await
            .context("load chapter")?
            .ok_or_else(|| anyhow::anyhow!("chapter not found: {}", payload.chapter_id))?;

        self.synthesize_chapter(&chapter, provider.as_ref(), Some(job_id))
            .await?;
        self.refresh_search(&chapter.novel_id).await;
        Ok(())
    }

    async fn run_novel_synthesis(
        &self,
        job_id: &str,
        novel_id: &str,
        payload: &SynthesizeNovelPayload,
    ) -> anyhow::Result<()> {
        let provider = self.provider(&payload.provider)?;
        if self
            .store
            .get_novel(novel_id)
            .await
            .context("load novel")?
            .is_none()
        {
            anyhow::bail!("novel not found: {novel_id}");
        }

        let chapters = self
            .store
            .get_chapters(novel_id)
            .await
            .context("load chapters")?;
        if chapters.is_empty() {
            anyhow::bail!("novel {novel_id} has no chapters");
        }
        let pending = chapters
            .iter()
            .filter(|chapter| !chapter.has_audio())
            .collect::<Vec<_>>();
        tracing::info!(
            job_id,
            novel_id,
            pending = pending.len(),
            skipped = chapters.len() - pending.len(),
            provider = provider.name(),
            "synthesizing novel"
        );

        let total = pending.len();
        for (pos, chapter) in pending.into_iter().enumerate() {
            self.synthesize_chapter(chapter, provider.as_ref(), None)
                .await?;
            self.update_progress(job_id, scaled_progress(pos + 1, total, SYNTH_PROGRESS_CEILING))
                .await?;
        }

        self.refresh_search(novel_id).await;
        Ok(())
    }

    /// Synthesizes one chapter and records its audio. Marks the chapter as
    /// failed when anything goes wrong; audio from an earlier run stays.
    async fn synthesize_chapter(
        &self,
        chapter: &Chapter,
        provider: &dyn SpeechSynthesizer,
        chunk_progress_job: Option<&str>,
    ) -> anyhow::Result<()> {
        let result = self
            .try_synthesize_chapter(chapter, provider, chunk_progress_job)
            .await;
        if result.is_err()
            && let Err(err) = self
                .store
                .update_chapter_status(&chapter.id, ChapterStatus::Error)
                .await
        {
            tracing::error!(chapter_id = %chapter.id, ?err, "mark chapter error");
        }
        result
    }

    async fn try_synthesize_chapter(
        &self,
        chapter: &Chapter,
        provider: &dyn SpeechSynthesizer,
        chunk_progress_job: Option<&str>,
    ) -> anyhow::Result<()> {
        let text_path = chapter
            .text_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("chapter {} has no extracted text", chapter.index))?;
        let text = read_text(text_path)
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "chapter {} text is missing: {}",
                    chapter.index,
                    text_path.display()
                )
            })?;

        let chunks = chunk_text(&text, DEFAULT_MAX_CHARS);
        if chunks.is_empty() {
            anyhow::bail!("chapter {} has no text to synthesize", chapter.index);
        }

        let mut audio = Vec::new();
        let mut duration_seconds = 0;
        for (pos, chunk) in chunks.iter().enumerate() {
            let piece = provider.synthesize(chunk).await.with_context(|| {
                format!(
                    "synthesize chunk {}/{} of chapter {}",
                    pos + 1,
                    chunks.len(),
                    chapter.index
                )
            })?;
            audio.extend_from_slice(&piece.bytes);
            duration_seconds += piece.duration_seconds;

            if let Some(job_id) = chunk_progress_job {
                self.update_progress(
                    job_id,
                    scaled_progress(pos + 1, chunks.len(), SYNTH_PROGRESS_CEILING),
                )
                .await?;
            }
        }

        let path = self
            .library
            .write_chapter_audio(&chapter.novel_id, chapter.index, &audio)
            .await?;
        self.store
            .update_chapter_audio_info(
                &chapter.id,
                &ChapterAudio {
                    path,
                    duration_seconds,
                    provider: provider.name().to_owned(),
                },
            )
            .await
            .context("save chapter audio")?;
        tracing::debug!(
            chapter_id = %chapter.id,
            chunks = chunks.len(),
            duration_seconds,
            "chapter synthesized"
        );
        Ok(())
    }

    /// Pushes the novel's current view into the search index. Failures are
    /// logged only.
    async fn refresh_search(&self, novel_id: &str) {
        if let Err(err) = self.try_refresh_search(novel_id).await {
            tracing::warn!(novel_id, ?err, "search index update failed");
        }
    }

    async fn try_refresh_search(&self, novel_id: &str) -> anyhow::Result<()> {
        let Some(novel) = self.store.get_novel(novel_id).await? else {
            return Ok(());
        };
        let chapters = self.store.get_chapters(novel_id).await?;
        self.search
            .update_index(&NovelView::new(&novel, &chapters))
            .await
    }
}
