use std::collections::HashSet;
use std::io::Write as _;

use anyhow::Context as _;
use scraper::{Html, Selector};
use url::Url;

use crate::cli::DiscoverArgs;
use crate::fetch::{FetchSettings, Fetcher};

pub async fn run(args: DiscoverArgs) -> anyhow::Result<()> {
    let fetcher = Fetcher::new(args.fetch.apply(FetchSettings::default()))?;
    let urls = discover_chapter_urls(&fetcher, &args.url).await;
    tracing::info!(url = %args.url, found = urls.len(), "discovered chapter links");

    let mut stdout = std::io::stdout().lock();
    for url in urls {
        writeln!(stdout, "{url}").context("write url")?;
    }
    Ok(())
}

/// Fetches a table-of-contents page and returns the chapter links on it.
///
/// An empty result means either the page could not be fetched or nothing on
/// it looked like a chapter; callers treat `toc_url` itself as the only
/// chapter in that case.
pub async fn discover_chapter_urls(fetcher: &Fetcher, toc_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(toc_url) else {
        tracing::debug!(url = toc_url, "toc url does not parse");
        return Vec::new();
    };
    let Some(html) = fetcher.fetch(toc_url).await else {
        return Vec::new();
    };
    chapter_links(&html, &base)
}

/// Absolute URLs of anchors whose text or href mentions "chapter", in page
/// order, first occurrence kept.
pub fn chapter_links(html: &str, base: &Url) -> Vec<String> {
    let doc = Html::parse_document(html);
    let Ok(anchor_sel) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for anchor in doc.select(&anchor_sel) {
        let Some(href) = anchor.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() {
            continue;
        }

        let text = anchor.text().collect::<String>();
        if !mentions_chapter(&text) && !mentions_chapter(href) {
            continue;
        }

        let Ok(resolved) = base.join(href) else {
            continue;
        };
        let resolved = resolved.to_string();
        if seen.insert(resolved.clone()) {
            links.push(resolved);
        }
    }
    links
}

fn mentions_chapter(s: &str) -> bool {
    s.to_lowercase().contains("chapter")
}
