use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::app::catalog::CatalogStore;
use crate::app::model::NovelView;

pub const MAX_RESULTS: usize = 20;

const TITLE_WEIGHT: u32 = 4;
const AUTHOR_WEIGHT: u32 = 2;
const DESCRIPTION_WEIGHT: u32 = 1;
const TAGS_WEIGHT: u32 = 1;

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Idempotent setup.
    async fn ensure_index(&self) -> anyhow::Result<()>;
    /// Upsert by novel id.
    async fn update_index(&self, view: &NovelView) -> anyhow::Result<()>;
    /// Best match first. An empty query matches every novel.
    async fn search_novels(&self, query: &str, audio: Option<bool>)
    -> anyhow::Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchBackend {
    Index,
    Scan,
}

impl SearchBackend {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "index" => Ok(Self::Index),
            "scan" => Ok(Self::Scan),
            other => anyhow::bail!("unsupported search backend: {other}"),
        }
    }

    pub fn build(self, store: Arc<dyn CatalogStore>) -> Arc<dyn SearchIndex> {
        match self {
            Self::Index => Arc::new(KeywordIndex::new(store)),
            Self::Scan => Arc::new(ScanSearch::new(store)),
        }
    }
}

/// Lower-cased alphanumeric runs.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn weighted_fields(view: &NovelView) -> [(&str, u32); 4] {
    [
        (view.title.as_str(), TITLE_WEIGHT),
        (view.author.as_str(), AUTHOR_WEIGHT),
        (view.description.as_str(), DESCRIPTION_WEIGHT),
        (view.tags.as_str(), TAGS_WEIGHT),
    ]
}

fn rank(mut scored: Vec<(String, u32)>) -> Vec<String> {
    scored.sort_by(|(a_id, a), (b_id, b)| b.cmp(a).then_with(|| a_id.cmp(b_id)));
    scored
        .into_iter()
        .take(MAX_RESULTS)
        .map(|(id, _)| id)
        .collect()
}

fn audio_matches(view: &NovelView, audio: Option<bool>) -> bool {
    audio.is_none_or(|wanted| view.audio_available == wanted)
}

#[derive(Debug, Default)]
struct Postings {
    documents: HashMap<String, NovelView>,
    /// token -> novel id -> summed weight of the fields containing it
    terms: HashMap<String, HashMap<String, u32>>,
}

impl Postings {
    fn remove(&mut self, novel_id: &str) {
        if self.documents.remove(novel_id).is_none() {
            return;
        }
        self.terms.retain(|_, ids| {
            ids.remove(novel_id);
            !ids.is_empty()
        });
    }

    fn insert(&mut self, view: &NovelView) {
        self.remove(&view.id);
        for (text, weight) in weighted_fields(view) {
            let mut seen = tokenize(text);
            seen.sort();
            seen.dedup();
            for token in seen {
                *self
                    .terms
                    .entry(token)
                    .or_default()
                    .entry(view.id.clone())
                    .or_default() += weight;
            }
        }
        self.documents.insert(view.id.clone(), view.clone());
    }
}

/// In-memory inverted index, loaded from the catalog on first use.
pub struct KeywordIndex {
    store: Arc<dyn CatalogStore>,
    postings: RwLock<Option<Postings>>,
}

impl KeywordIndex {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            postings: RwLock::new(None),
        }
    }

    async fn load(&self) -> anyhow::Result<Postings> {
        let mut postings = Postings::default();
        for novel in self.store.list_novels().await.context("list novels")? {
            let chapters = self
                .store
                .get_chapters(&novel.id)
                .await
                .with_context(|| format!("load chapters of {}", novel.id))?;
            postings.insert(&NovelView::new(&novel, &chapters));
        }
        Ok(postings)
    }
}

#[async_trait]
impl SearchIndex for KeywordIndex {
    async fn ensure_index(&self) -> anyhow::Result<()> {
        if self.postings.read().await.is_some() {
            return Ok(());
        }
        let loaded = self.load().await?;
        let mut postings = self.postings.write().await;
        if postings.is_none() {
            tracing::info!(novels = loaded.documents.len(), "search index built");
            *postings = Some(loaded);
        }
        Ok(())
    }

    async fn update_index(&self, view: &NovelView) -> anyhow::Result<()> {
        self.ensure_index().await?;
        let mut postings = self.postings.write().await;
        postings.get_or_insert_with(Postings::default).insert(view);
        Ok(())
    }

    async fn search_novels(
        &self,
        query: &str,
        audio: Option<bool>,
    ) -> anyhow::Result<Vec<String>> {
        self.ensure_index().await?;
        let guard = self.postings.read().await;
        let Some(postings) = guard.as_ref() else {
            return Ok(Vec::new());
        };

        let keywords = tokenize(query);
        if keywords.is_empty() {
            let mut all = postings
                .documents
                .values()
                .filter(|view| audio_matches(view, audio))
                .collect::<Vec<_>>();
            all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
            return Ok(all.into_iter().map(|view| view.id.clone()).collect());
        }

        let mut scores: HashMap<&str, u32> = HashMap::new();
        for keyword in &keywords {
            let Some(ids) = postings.terms.get(keyword) else {
                continue;
            };
            for (id, weight) in ids {
                *scores.entry(id.as_str()).or_default() += weight;
            }
        }

        let scored = scores
            .into_iter()
            .filter(|(id, _)| {
                postings
                    .documents
                    .get(*id)
                    .is_some_and(|view| audio_matches(view, audio))
            })
            .map(|(id, score)| (id.to_owned(), score))
            .collect();
        Ok(rank(scored))
    }
}

/// Reads the catalog on every query. Nothing to maintain.
pub struct ScanSearch {
    store: Arc<dyn CatalogStore>,
}

impl ScanSearch {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SearchIndex for ScanSearch {
    async fn ensure_index(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn update_index(&self, _view: &NovelView) -> anyhow::Result<()> {
        Ok(())
    }

    async fn search_novels(
        &self,
        query: &str,
        audio: Option<bool>,
    ) -> anyhow::Result<Vec<String>> {
        let keywords = tokenize(query);
        let mut scored = Vec::new();
        let mut all = Vec::new();
        for novel in self.store.list_novels().await.context("list novels")? {
            let chapters = self
                .store
                .get_chapters(&novel.id)
                .await
                .with_context(|| format!("load chapters of {}", novel.id))?;
            let view = NovelView::new(&novel, &chapters);
            if !audio_matches(&view, audio) {
                continue;
            }
            if keywords.is_empty() {
                all.push(view.id);
                continue;
            }

            let mut score = 0;
            for (text, weight) in weighted_fields(&view) {
                let text = text.to_lowercase();
                score += keywords
                    .iter()
                    .filter(|keyword| text.contains(keyword.as_str()))
                    .count() as u32
                    * weight;
            }
            if score > 0 {
                scored.push((view.id, score));
            }
        }

        if keywords.is_empty() {
            return Ok(all);
        }
        Ok(rank(scored))
    }
}
