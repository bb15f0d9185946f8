use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::epub::EpubBook;

/// One chapter as handed to the packagers, already in reading order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterContent {
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NovelMetadata {
    /// Reused as the EPUB identifier and file name when present.
    pub id: Option<String>,
    pub title: String,
    pub author: String,
    pub description: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error("cannot package an empty novel into an epub")]
    NoChapters,
    #[error(transparent)]
    Write(#[from] anyhow::Error),
}

/// Writes `<dest_dir>/<novel_id>.txt`: each chapter as trimmed title, blank
/// line, trimmed text, two blank lines. Same input, same bytes.
pub fn package_text(
    novel_id: &str,
    chapters: &[ChapterContent],
    dest_dir: &Path,
) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("create package dir: {}", dest_dir.display()))?;

    let path = dest_dir.join(format!("{novel_id}.txt"));
    std::fs::write(&path, render_text(chapters))
        .with_context(|| format!("write text package: {}", path.display()))?;
    Ok(path)
}

pub fn render_text(chapters: &[ChapterContent]) -> String {
    let mut out = String::new();
    for chapter in chapters {
        out.push_str(chapter.title.trim());
        out.push_str("\n\n");
        out.push_str(chapter.text.trim());
        out.push_str("\n\n\n");
    }
    out
}

/// Writes `<dest_dir>/<id>.epub`, generating an id when the metadata has none.
pub fn package_epub(
    metadata: &NovelMetadata,
    chapters: &[ChapterContent],
    dest_dir: &Path,
) -> Result<PathBuf, PackageError> {
    if chapters.is_empty() {
        return Err(PackageError::NoChapters);
    }

    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("create package dir: {}", dest_dir.display()))?;

    let id = metadata
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let path = dest_dir.join(format!("{id}.epub"));

    let book = EpubBook {
        identifier: format!("urn:uuid:{id}"),
        title: metadata.title.clone(),
        author: metadata.author.clone(),
        description: metadata.description.clone(),
        chapters,
    };
    crate::epub::write_epub(&path, &book).context("write epub package")?;
    Ok(path)
}
