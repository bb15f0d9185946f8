use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NovelStatus {
    New,
    Extracting,
    Ready,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Novel {
    pub id: String,
    pub title: String,
    pub author: String,
    /// Unique across novels.
    pub source_url: String,
    pub description: String,
    pub tags: String,
    pub chapter_count: Option<u32>,
    pub status: NovelStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    New,
    Ready,
    Error,
}

/// Synthesized audio of a chapter. Either the whole set is known or none of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChapterAudio {
    pub path: PathBuf,
    pub duration_seconds: u64,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chapter {
    pub id: String,
    pub novel_id: String,
    /// 1-based position inside the novel.
    pub index: u32,
    pub title: String,
    pub source_url: String,
    pub text_path: Option<PathBuf>,
    pub audio: Option<ChapterAudio>,
    pub status: ChapterStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chapter {
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Extract,
    SynthesizeChapter,
    SynthesizeNovel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub novel_id: Option<String>,
    /// Kind-specific input, decoded by the runner.
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn queued(
        kind: JobKind,
        novel_id: Option<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            novel_id,
            payload,
            status: JobStatus::Queued,
            progress: 0,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies `update` under the job state machine. Returns `false` (and
    /// leaves the job untouched) once the job is terminal.
    ///
    /// Progress never moves backwards, except that entering `running` resets
    /// it to zero. `done` pins it to 100.
    pub fn apply(&mut self, update: &JobUpdate) -> bool {
        if self.status.is_terminal() {
            return false;
        }

        if let Some(status) = update.status {
            if status == JobStatus::Running && self.status == JobStatus::Queued {
                self.progress = 0;
            }
            self.status = status;
        }
        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress.min(100));
        }
        if self.status == JobStatus::Done {
            self.progress = 100;
        }
        if let Some(error) = &update.error {
            self.error = Some(error.clone());
        }
        self.updated_at = Utc::now();
        true
    }
}

/// Partial job update; absent fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn running() -> Self {
        Self {
            status: Some(JobStatus::Running),
            progress: Some(0),
            ..Self::default()
        }
    }

    pub fn progress(percent: u8) -> Self {
        Self {
            progress: Some(percent),
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            status: Some(JobStatus::Done),
            progress: Some(100),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Error),
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractPayload {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthesizeChapterPayload {
    pub chapter_id: String,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SynthesizeNovelPayload {
    pub provider: String,
}

/// What the search index sees of a novel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NovelView {
    pub id: String,
    pub title: String,
    pub author: String,
    pub description: String,
    pub tags: String,
    pub chapter_count: Option<u32>,
    pub audio_available: bool,
    pub updated_at: DateTime<Utc>,
}

impl NovelView {
    /// Audio counts as available only when every chapter has it.
    pub fn new(novel: &Novel, chapters: &[Chapter]) -> Self {
        Self {
            id: novel.id.clone(),
            title: novel.title.clone(),
            author: novel.author.clone(),
            description: novel.description.clone(),
            tags: novel.tags.clone(),
            chapter_count: novel.chapter_count,
            audio_available: !chapters.is_empty() && chapters.iter().all(Chapter::has_audio),
            updated_at: novel.updated_at,
        }
    }
}

/// Progress for step `done` of `total`, scaled into `0..=ceiling` percent.
pub fn scaled_progress(done: usize, total: usize, ceiling: u8) -> u8 {
    if total == 0 {
        return ceiling;
    }
    let done = done.min(total);
    ((done * usize::from(ceiling)) / total) as u8
}
