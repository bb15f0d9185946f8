use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tokio::fs;

use crate::package::{ChapterContent, NovelMetadata, PackageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    Text,
    Epub,
}

impl PackageFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "txt" => Some(Self::Text),
            "epub" => Some(Self::Epub),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Epub => "epub",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Text => "text/plain; charset=utf-8",
            Self::Epub => "application/epub+zip",
        }
    }
}

/// On-disk artifacts, one directory per novel:
/// `<base>/novels/<novel_id>/{chapter-<idx>.txt,chapter-<idx>.mp3,<novel_id>.txt,<novel_id>.epub}`.
#[derive(Debug, Clone)]
pub struct Library {
    base_dir: PathBuf,
}

impl Library {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn novel_dir(&self, novel_id: &str) -> PathBuf {
        self.base_dir.join("novels").join(novel_id)
    }

    pub fn chapter_text_path(&self, novel_id: &str, index: u32) -> PathBuf {
        self.novel_dir(novel_id).join(format!("chapter-{index}.txt"))
    }

    pub fn chapter_audio_path(&self, novel_id: &str, index: u32) -> PathBuf {
        self.novel_dir(novel_id).join(format!("chapter-{index}.mp3"))
    }

    pub fn package_path(&self, novel_id: &str, format: PackageFormat) -> PathBuf {
        self.novel_dir(novel_id)
            .join(format!("{novel_id}.{}", format.extension()))
    }

    pub async fn write_chapter_text(
        &self,
        novel_id: &str,
        index: u32,
        text: &str,
    ) -> anyhow::Result<PathBuf> {
        let path = self.chapter_text_path(novel_id, index);
        write_file(&path, text.as_bytes())
            .await
            .context("write chapter text")?;
        Ok(path)
    }

    pub async fn write_chapter_audio(
        &self,
        novel_id: &str,
        index: u32,
        audio: &[u8],
    ) -> anyhow::Result<PathBuf> {
        let path = self.chapter_audio_path(novel_id, index);
        write_file(&path, audio)
            .await
            .context("write chapter audio")?;
        Ok(path)
    }

    /// Runs the blocking packagers off the async runtime.
    pub async fn package(
        &self,
        format: PackageFormat,
        metadata: NovelMetadata,
        chapters: Vec<ChapterContent>,
    ) -> Result<PathBuf, PackageError> {
        let novel_id = metadata
            .id
            .clone()
            .ok_or_else(|| anyhow::anyhow!("packaging needs a novel id"))?;
        let dest_dir = self.novel_dir(&novel_id);

        tokio::task::spawn_blocking(move || match format {
            PackageFormat::Text => {
                crate::package::package_text(&novel_id, &chapters, &dest_dir).map_err(Into::into)
            }
            PackageFormat::Epub => crate::package::package_epub(&metadata, &chapters, &dest_dir),
        })
        .await
        .context("join package task")?
    }
}

pub async fn read_text(path: &Path) -> anyhow::Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read: {}", path.display())),
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create dir: {}", parent.display()))?;
    fs::write(path, bytes)
        .await
        .with_context(|| format!("write: {}", path.display()))
}
