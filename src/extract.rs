use std::io::Write as _;

use anyhow::Context as _;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::cli::ExtractArgs;
use crate::fetch::{FetchSettings, Fetcher};

/// Hard cap on the characters kept from one page.
pub const MAX_TEXT_CHARS: usize = 3_000_000;

const CONTENT_IDS: &[&str] = &["chapter", "chapter-content", "content", "chapterContent", "text"];
const CONTENT_CLASSES: &[&str] = &["chapter-content", "entry-content", "post-content", "content"];
const FRAGMENT_TAGS: &[&str] = &["p", "br", "div", "span"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedChapter {
    pub title: String,
    pub text: String,
}

pub async fn run(args: ExtractArgs) -> anyhow::Result<()> {
    let fetcher = Fetcher::new(args.fetch.apply(FetchSettings::default()))?;
    let Some(chapter) = extract_chapter(&fetcher, &args.url).await else {
        anyhow::bail!("failed to extract chapter: {}", args.url);
    };

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &chapter).context("write chapter json")?;
    stdout.write_all(b"\n").context("write newline")?;
    Ok(())
}

/// Fetches `url` and extracts it. `None` when the page cannot be fetched or
/// carries no readable text.
pub async fn extract_chapter(fetcher: &Fetcher, url: &str) -> Option<ExtractedChapter> {
    let html = fetcher.fetch(url).await?;
    let chapter = extract_title_and_text(&html);
    if chapter.text.is_empty() {
        tracing::debug!(url, "page has no readable text");
        return None;
    }
    Some(chapter)
}

/// Best-effort title and body extraction using a fixed list of heuristics.
///
/// Body candidates are tried in order (well-known ids, well-known classes,
/// `<article>`), and the first one yielding any text fragment wins. When none
/// does, every `<p>` in the document is used.
pub fn extract_title_and_text(html: &str) -> ExtractedChapter {
    let doc = Html::parse_document(html);

    let title = first_non_empty_text(&doc, "h1")
        .or_else(|| first_non_empty_text(&doc, "title"))
        .unwrap_or_default();

    let text = content_candidates(&doc)
        .into_iter()
        .map(|candidate| container_fragments(candidate))
        .find(|fragments| !fragments.is_empty())
        .unwrap_or_else(|| all_paragraphs(&doc))
        .join("\n\n");

    ExtractedChapter {
        title,
        text: truncate_chars(text, MAX_TEXT_CHARS),
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn first_non_empty_text(doc: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    doc.select(&sel)
        .map(|el| collapsed_text(el))
        .find(|text| !text.is_empty())
}

fn content_candidates(doc: &Html) -> Vec<ElementRef<'_>> {
    let mut candidates = Vec::new();

    for id in CONTENT_IDS {
        if let Some(sel) = selector(&format!("[id=\"{id}\"]"))
            && let Some(el) = doc.select(&sel).next()
        {
            candidates.push(el);
        }
    }
    for class in CONTENT_CLASSES {
        if let Some(sel) = selector(&format!("div.{class}"))
            && let Some(el) = doc.select(&sel).next()
        {
            candidates.push(el);
        }
    }
    if let Some(sel) = selector("article")
        && let Some(el) = doc.select(&sel).next()
    {
        candidates.push(el);
    }

    candidates
}

/// Trimmed text of every paragraph-like descendant (not the container itself).
fn container_fragments(container: ElementRef<'_>) -> Vec<String> {
    container
        .descendants()
        .skip(1)
        .filter_map(ElementRef::wrap)
        .filter(|el| FRAGMENT_TAGS.contains(&el.value().name()))
        .map(|el| spaced_text(el))
        .filter(|text| !text.is_empty())
        .collect()
}

fn all_paragraphs(doc: &Html) -> Vec<String> {
    let Some(sel) = selector("p") else {
        return Vec::new();
    };
    doc.select(&sel)
        .map(|el| spaced_text(el))
        .filter(|text| !text.is_empty())
        .collect()
}

/// Text nodes trimmed individually and joined with single spaces.
fn spaced_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn collapsed_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate_chars(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_owned(),
        None => text,
    }
}
