use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::app::dispatcher::JobDispatcher;
use crate::app::library::{PackageFormat, read_text};
use crate::app::model::{
    ExtractPayload, Job, JobKind, Novel, NovelStatus, SynthesizeChapterPayload,
    SynthesizeNovelPayload,
};
use crate::app::runner::JobRunner;
use crate::extract::ExtractedChapter;
use crate::package::{ChapterContent, NovelMetadata, PackageError};
use crate::synth::SILENT_PROVIDER;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("source url already belongs to novel {novel_id}: {url}")]
    DuplicateSource { url: String, novel_id: String },
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NovelSubmission {
    pub url: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub tags: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionSubmitted {
    pub job_id: String,
    pub novel_id: String,
}

/// Entry point for request handlers: validates, creates records, hands the
/// job to the dispatcher and returns without waiting for it.
pub struct JobService {
    runner: Arc<JobRunner>,
    dispatcher: Arc<dyn JobDispatcher>,
}

impl JobService {
    pub fn new(runner: Arc<JobRunner>, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self { runner, dispatcher }
    }

    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }

    /// Fetches and extracts one page without recording anything.
    pub async fn extract_single(&self, url: &str) -> Result<ExtractedChapter, SubmitError> {
        let url = validate_url(url)?;
        crate::extract::extract_chapter(self.runner.fetcher(), url.as_str())
            .await
            .ok_or_else(|| SubmitError::NotFound(format!("failed to extract chapter: {url}")))
    }

    pub async fn submit_extraction(
        &self,
        submission: NovelSubmission,
    ) -> Result<ExtractionSubmitted, SubmitError> {
        let source_url = validate_url(&submission.url)?.to_string();
        let store = self.runner.store();
        if let Some(existing) = store
            .find_novel_by_source_url(&source_url)
            .await
            .context("look up source url")?
        {
            return Err(SubmitError::DuplicateSource {
                url: source_url,
                novel_id: existing.id,
            });
        }

        let now = Utc::now();
        let novel = Novel {
            id: uuid::Uuid::new_v4().to_string(),
            title: submission.title.trim().to_owned(),
            author: submission.author.trim().to_owned(),
            source_url: source_url.clone(),
            description: submission.description.trim().to_owned(),
            tags: submission.tags.trim().to_owned(),
            chapter_count: None,
            status: NovelStatus::Extracting,
            created_at: now,
            updated_at: now,
        };
        store.insert_novel(&novel).await.context("save novel")?;

        let payload = serde_json::to_value(ExtractPayload { url: source_url })
            .context("encode extract payload")?;
        let job = Job::queued(JobKind::Extract, Some(novel.id.clone()), payload);
        if let Err(err) = self.enqueue(&job).await {
            if let Err(mark_err) = store
                .update_novel_status(&novel.id, NovelStatus::Error)
                .await
            {
                tracing::error!(novel_id = %novel.id, err = ?mark_err, "mark novel error");
            }
            return Err(err);
        }

        Ok(ExtractionSubmitted {
            job_id: job.id,
            novel_id: novel.id,
        })
    }

    pub async fn submit_chapter_synthesis(
        &self,
        chapter_id: &str,
        provider: Option<&str>,
    ) -> Result<String, SubmitError> {
        let provider = self.resolve_provider(provider)?;
        let chapter = self
            .runner
            .store()
            .get_chapter(chapter_id)
            .await
            .context("load chapter")?
            .ok_or_else(|| SubmitError::NotFound(format!("chapter not found: {chapter_id}")))?;

        let payload = serde_json::to_value(SynthesizeChapterPayload {
            chapter_id: chapter.id,
            provider,
        })
        .context("encode synthesis payload")?;
        let job = Job::queued(JobKind::SynthesizeChapter, Some(chapter.novel_id), payload);
        self.enqueue(&job).await?;
        Ok(job.id)
    }

    pub async fn submit_novel_synthesis(
        &self,
        novel_id: &str,
        provider: Option<&str>,
    ) -> Result<String, SubmitError> {
        let provider = self.resolve_provider(provider)?;
        let novel = self
            .runner
            .store()
            .get_novel(novel_id)
            .await
            .context("load novel")?
            .ok_or_else(|| SubmitError::NotFound(format!("novel not found: {novel_id}")))?;

        let payload = serde_json::to_value(SynthesizeNovelPayload { provider })
            .context("encode synthesis payload")?;
        let job = Job::queued(JobKind::SynthesizeNovel, Some(novel.id), payload);
        self.enqueue(&job).await?;
        Ok(job.id)
    }

    /// Path of the packaged artifact, rebuilt from the stored chapter texts
    /// when it is not on disk.
    pub async fn ensure_package(
        &self,
        novel_id: &str,
        format: PackageFormat,
    ) -> Result<PathBuf, SubmitError> {
        let store = self.runner.store();
        let library = self.runner.library();
        let novel = store
            .get_novel(novel_id)
            .await
            .context("load novel")?
            .ok_or_else(|| SubmitError::NotFound(format!("novel not found: {novel_id}")))?;

        let path = library.package_path(&novel.id, format);
        if tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("stat: {}", path.display()))?
        {
            return Ok(path);
        }

        let mut contents = Vec::new();
        for chapter in store
            .get_chapters(&novel.id)
            .await
            .context("load chapters")?
        {
            let Some(text_path) = &chapter.text_path else {
                continue;
            };
            let Some(text) = read_text(text_path).await? else {
                continue;
            };
            contents.push(ChapterContent {
                title: chapter.title,
                text,
            });
        }
        tracing::info!(novel_id, ?format, chapters = contents.len(), "regenerating package");

        let metadata = NovelMetadata {
            id: Some(novel.id.clone()),
            title: novel.title,
            author: novel.author,
            description: novel.description,
        };
        match library.package(format, metadata, contents).await {
            Ok(path) => Ok(path),
            Err(PackageError::NoChapters) => Err(SubmitError::NotFound(format!(
                "novel {novel_id} has no extracted chapters"
            ))),
            Err(PackageError::Write(err)) => Err(err.context("package novel").into()),
        }
    }

    fn resolve_provider(&self, provider: Option<&str>) -> Result<String, SubmitError> {
        let name = provider
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(SILENT_PROVIDER);
        if !self.runner.providers().contains(name) {
            return Err(SubmitError::UnknownProvider(name.to_owned()));
        }
        Ok(name.to_owned())
    }

    async fn enqueue(&self, job: &Job) -> Result<(), SubmitError> {
        self.runner
            .store()
            .insert_job(job)
            .await
            .context("save job")?;
        self.dispatcher
            .dispatch(&job.id)
            .await
            .with_context(|| format!("dispatch job {}", job.id))?;
        tracing::info!(job_id = %job.id, kind = ?job.kind, "job queued");
        Ok(())
    }
}

fn validate_url(raw: &str) -> Result<Url, SubmitError> {
    let raw = raw.trim();
    let url = Url::parse(raw).map_err(|_| SubmitError::InvalidUrl(raw.to_owned()))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(SubmitError::InvalidUrl(raw.to_owned()));
    }
    Ok(url)
}
