use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

use crate::app::model::{
    Chapter, ChapterAudio, ChapterStatus, Job, JobUpdate, Novel, NovelStatus,
};

/// Keyed record store for novels, chapters and jobs.
///
/// Every call is atomic on its own; nothing here spans more than one record.
/// Narrow updaters on a missing record are no-ops, since jobs only hold weak
/// references to what they work on.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_novel(&self, novel_id: &str) -> anyhow::Result<Option<Novel>>;
    async fn find_novel_by_source_url(&self, source_url: &str) -> anyhow::Result<Option<Novel>>;
    /// Most recently updated first.
    async fn list_novels(&self) -> anyhow::Result<Vec<Novel>>;
    async fn get_chapter(&self, chapter_id: &str) -> anyhow::Result<Option<Chapter>>;
    /// Ordered by chapter index.
    async fn get_chapters(&self, novel_id: &str) -> anyhow::Result<Vec<Chapter>>;
    async fn get_job(&self, job_id: &str) -> anyhow::Result<Option<Job>>;

    /// Upsert. Fails when another novel already owns `source_url`.
    async fn insert_novel(&self, novel: &Novel) -> anyhow::Result<()>;
    async fn insert_chapter(&self, chapter: &Chapter) -> anyhow::Result<()>;
    async fn insert_job(&self, job: &Job) -> anyhow::Result<()>;

    /// Returns the job as stored after the update, `None` if it does not exist.
    async fn update_job_status(
        &self,
        job_id: &str,
        update: &JobUpdate,
    ) -> anyhow::Result<Option<Job>>;
    async fn update_chapter_status(
        &self,
        chapter_id: &str,
        status: ChapterStatus,
    ) -> anyhow::Result<()>;
    async fn update_novel_status(&self, novel_id: &str, status: NovelStatus) -> anyhow::Result<()>;
    /// Sets all audio fields together and marks the chapter ready.
    async fn update_chapter_audio_info(
        &self,
        chapter_id: &str,
        audio: &ChapterAudio,
    ) -> anyhow::Result<()>;
}

fn ensure_source_url_free<'a>(
    novel: &Novel,
    mut others: impl Iterator<Item = &'a Novel>,
) -> anyhow::Result<()> {
    if let Some(owner) = others.find(|n| n.id != novel.id && n.source_url == novel.source_url) {
        anyhow::bail!(
            "source url already belongs to novel {}: {}",
            owner.id,
            novel.source_url
        );
    }
    Ok(())
}

fn sort_novels(novels: &mut [Novel]) {
    novels.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
}

#[derive(Debug, Default)]
struct Tables {
    novels: HashMap<String, Novel>,
    chapters: HashMap<String, Chapter>,
    jobs: HashMap<String, Job>,
}

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    tables: RwLock<Tables>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn get_novel(&self, novel_id: &str) -> anyhow::Result<Option<Novel>> {
        Ok(self.tables.read().await.novels.get(novel_id).cloned())
    }

    async fn find_novel_by_source_url(&self, source_url: &str) -> anyhow::Result<Option<Novel>> {
        let tables = self.tables.read().await;
        Ok(tables
            .novels
            .values()
            .find(|n| n.source_url == source_url)
            .cloned())
    }

    async fn list_novels(&self) -> anyhow::Result<Vec<Novel>> {
        let mut novels = self
            .tables
            .read()
            .await
            .novels
            .values()
            .cloned()
            .collect::<Vec<_>>();
        sort_novels(&mut novels);
        Ok(novels)
    }

    async fn get_chapter(&self, chapter_id: &str) -> anyhow::Result<Option<Chapter>> {
        Ok(self.tables.read().await.chapters.get(chapter_id).cloned())
    }

    async fn get_chapters(&self, novel_id: &str) -> anyhow::Result<Vec<Chapter>> {
        let mut chapters = self
            .tables
            .read()
            .await
            .chapters
            .values()
            .filter(|c| c.novel_id == novel_id)
            .cloned()
            .collect::<Vec<_>>();
        chapters.sort_by_key(|c| c.index);
        Ok(chapters)
    }

    async fn get_job(&self, job_id: &str) -> anyhow::Result<Option<Job>> {
        Ok(self.tables.read().await.jobs.get(job_id).cloned())
    }

    async fn insert_novel(&self, novel: &Novel) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        ensure_source_url_free(novel, tables.novels.values())?;
        let mut record = novel.clone();
        if let Some(existing) = tables.novels.get(&novel.id) {
            record.created_at = existing.created_at;
            record.updated_at = Utc::now();
        }
        tables.novels.insert(record.id.clone(), record);
        Ok(())
    }

    async fn insert_chapter(&self, chapter: &Chapter) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        let mut record = chapter.clone();
        if let Some(existing) = tables.chapters.get(&chapter.id) {
            record.created_at = existing.created_at;
            record.updated_at = Utc::now();
        }
        tables.chapters.insert(record.id.clone(), record);
        Ok(())
    }

    async fn insert_job(&self, job: &Job) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        let mut record = job.clone();
        if let Some(existing) = tables.jobs.get(&job.id) {
            record.created_at = existing.created_at;
            record.updated_at = Utc::now();
        }
        tables.jobs.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        update: &JobUpdate,
    ) -> anyhow::Result<Option<Job>> {
        let mut tables = self.tables.write().await;
        let Some(job) = tables.jobs.get_mut(job_id) else {
            return Ok(None);
        };
        if !job.apply(update) {
            tracing::debug!(job_id, ?update, "ignoring update of finished job");
        }
        Ok(Some(job.clone()))
    }

    async fn update_chapter_status(
        &self,
        chapter_id: &str,
        status: ChapterStatus,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(chapter) = tables.chapters.get_mut(chapter_id) {
            chapter.status = status;
            chapter.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_novel_status(&self, novel_id: &str, status: NovelStatus) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(novel) = tables.novels.get_mut(novel_id) {
            novel.status = status;
            novel.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_chapter_audio_info(
        &self,
        chapter_id: &str,
        audio: &ChapterAudio,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(chapter) = tables.chapters.get_mut(chapter_id) {
            chapter.audio = Some(audio.clone());
            chapter.status = ChapterStatus::Ready;
            chapter.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// One JSON document per record:
/// `<base>/{novels,chapters,jobs}/<id>.json`.
///
/// Writes go through a single lock held for one read-modify-write of one
/// record; readers never take it.
#[derive(Debug)]
pub struct LocalFsCatalogStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalFsCatalogStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn novels_dir(&self) -> PathBuf {
        self.base_dir.join("novels")
    }

    fn chapters_dir(&self) -> PathBuf {
        self.base_dir.join("chapters")
    }

    fn jobs_dir(&self) -> PathBuf {
        self.base_dir.join("jobs")
    }

    fn novel_path(&self, novel_id: &str) -> anyhow::Result<PathBuf> {
        Ok(self.novels_dir().join(record_file_name(novel_id)?))
    }

    fn chapter_path(&self, chapter_id: &str) -> anyhow::Result<PathBuf> {
        Ok(self.chapters_dir().join(record_file_name(chapter_id)?))
    }

    fn job_path(&self, job_id: &str) -> anyhow::Result<PathBuf> {
        Ok(self.jobs_dir().join(record_file_name(job_id)?))
    }
}

fn record_file_name(id: &str) -> anyhow::Result<String> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        anyhow::bail!("invalid record id: {id:?}");
    }
    Ok(format!("{id}.json"))
}

#[async_trait]
impl CatalogStore for LocalFsCatalogStore {
    async fn get_novel(&self, novel_id: &str) -> anyhow::Result<Option<Novel>> {
        let Ok(path) = self.novel_path(novel_id) else {
            return Ok(None);
        };
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn find_novel_by_source_url(&self, source_url: &str) -> anyhow::Result<Option<Novel>> {
        let novels: Vec<Novel> = read_json_dir(&self.novels_dir()).await?;
        Ok(novels.into_iter().find(|n| n.source_url == source_url))
    }

    async fn list_novels(&self) -> anyhow::Result<Vec<Novel>> {
        let mut novels: Vec<Novel> = read_json_dir(&self.novels_dir()).await?;
        sort_novels(&mut novels);
        Ok(novels)
    }

    async fn get_chapter(&self, chapter_id: &str) -> anyhow::Result<Option<Chapter>> {
        let Ok(path) = self.chapter_path(chapter_id) else {
            return Ok(None);
        };
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn get_chapters(&self, novel_id: &str) -> anyhow::Result<Vec<Chapter>> {
        let chapters: Vec<Chapter> = read_json_dir(&self.chapters_dir()).await?;
        let mut chapters = chapters
            .into_iter()
            .filter(|c| c.novel_id == novel_id)
            .collect::<Vec<_>>();
        chapters.sort_by_key(|c| c.index);
        Ok(chapters)
    }

    async fn get_job(&self, job_id: &str) -> anyhow::Result<Option<Job>> {
        let Ok(path) = self.job_path(job_id) else {
            return Ok(None);
        };
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn insert_novel(&self, novel: &Novel) -> anyhow::Result<()> {
        let path = self.novel_path(&novel.id)?;
        let _guard = self.write_lock.lock().await;
        let others: Vec<Novel> = read_json_dir(&self.novels_dir()).await?;
        ensure_source_url_free(novel, others.iter())?;

        let mut record = novel.clone();
        if let Some(existing) = others.iter().find(|n| n.id == novel.id) {
            record.created_at = existing.created_at;
            record.updated_at = Utc::now();
        }
        write_json_atomic(&path, &record)
            .await
            .context("write novel record")
    }

    async fn insert_chapter(&self, chapter: &Chapter) -> anyhow::Result<()> {
        let path = self.chapter_path(&chapter.id)?;
        let _guard = self.write_lock.lock().await;
        let mut record = chapter.clone();
        if let Some(existing) = read_json::<Chapter>(&path).await? {
            record.created_at = existing.created_at;
            record.updated_at = Utc::now();
        }
        write_json_atomic(&path, &record)
            .await
            .context("write chapter record")
    }

    async fn insert_job(&self, job: &Job) -> anyhow::Result<()> {
        let path = self.job_path(&job.id)?;
        let _guard = self.write_lock.lock().await;
        let mut record = job.clone();
        if let Some(existing) = read_json::<Job>(&path).await? {
            record.created_at = existing.created_at;
            record.updated_at = Utc::now();
        }
        write_json_atomic(&path, &record)
            .await
            .context("write job record")
    }

    async fn update_job_status(
        &self,
        job_id: &str,
        update: &JobUpdate,
    ) -> anyhow::Result<Option<Job>> {
        let path = self.job_path(job_id)?;
        let _guard = self.write_lock.lock().await;
        let Some(mut job) = read_json::<Job>(&path).await? else {
            return Ok(None);
        };
        if !job.apply(update) {
            tracing::debug!(job_id, ?update, "ignoring update of finished job");
            return Ok(Some(job));
        }
        write_json_atomic(&path, &job)
            .await
            .context("write job record")?;
        Ok(Some(job))
    }

    async fn update_chapter_status(
        &self,
        chapter_id: &str,
        status: ChapterStatus,
    ) -> anyhow::Result<()> {
        let path = self.chapter_path(chapter_id)?;
        let _guard = self.write_lock.lock().await;
        let Some(mut chapter) = read_json::<Chapter>(&path).await? else {
            return Ok(());
        };
        chapter.status = status;
        chapter.updated_at = Utc::now();
        write_json_atomic(&path, &chapter)
            .await
            .context("write chapter record")
    }

    async fn update_novel_status(&self, novel_id: &str, status: NovelStatus) -> anyhow::Result<()> {
        let path = self.novel_path(novel_id)?;
        let _guard = self.write_lock.lock().await;
        let Some(mut novel) = read_json::<Novel>(&path).await? else {
            return Ok(());
        };
        novel.status = status;
        novel.updated_at = Utc::now();
        write_json_atomic(&path, &novel)
            .await
            .context("write novel record")
    }

    async fn update_chapter_audio_info(
        &self,
        chapter_id: &str,
        audio: &ChapterAudio,
    ) -> anyhow::Result<()> {
        let path = self.chapter_path(chapter_id)?;
        let _guard = self.write_lock.lock().await;
        let Some(mut chapter) = read_json::<Chapter>(&path).await? else {
            return Ok(());
        };
        chapter.audio = Some(audio.clone());
        chapter.status = ChapterStatus::Ready;
        chapter.updated_at = Utc::now();
        write_json_atomic(&path, &chapter)
            .await
            .context("write chapter record")
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

async fn read_json_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> anyhow::Result<Vec<T>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("read dir: {}", dir.display()));
        }
    };

    let mut records = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("list dir: {}", dir.display()))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(record) = read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))?
        {
            records.push(record);
        }
    }
    Ok(records)
}

async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::app::model::{JobKind, JobStatus};

    fn novel(id: &str, url: &str) -> Novel {
        let now = Utc::now();
        Novel {
            id: id.to_owned(),
            title: format!("Title {id}"),
            author: "Author".to_owned(),
            source_url: url.to_owned(),
            description: String::new(),
            tags: String::new(),
            chapter_count: None,
            status: NovelStatus::Extracting,
            created_at: now,
            updated_at: now,
        }
    }

    fn chapter(id: &str, novel_id: &str, index: u32) -> Chapter {
        let now = Utc::now();
        Chapter {
            id: id.to_owned(),
            novel_id: novel_id.to_owned(),
            index,
            title: format!("Chapter {index}"),
            source_url: format!("https://example.com/c{index}"),
            text_path: None,
            audio: None,
            status: ChapterStatus::Ready,
            created_at: now,
            updated_at: now,
        }
    }

    async fn exercise(store: &dyn CatalogStore) {
        // Upsert keeps created_at and bumps updated_at.
        let mut n1 = novel("n1", "https://example.com/a");
        n1.created_at = Utc::now() - Duration::days(1);
        n1.updated_at = n1.created_at;
        store.insert_novel(&n1).await.unwrap();
        let mut changed = n1.clone();
        changed.title = "Renamed".to_owned();
        changed.created_at = Utc::now();
        store.insert_novel(&changed).await.unwrap();
        let stored = store.get_novel("n1").await.unwrap().unwrap();
        assert_eq!(stored.title, "Renamed");
        assert_eq!(stored.created_at, n1.created_at);
        assert!(stored.updated_at > n1.updated_at);

        // Source urls are unique across novels.
        let err = store
            .insert_novel(&novel("n2", "https://example.com/a"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already belongs to novel n1"));
        store
            .insert_novel(&novel("n2", "https://example.com/b"))
            .await
            .unwrap();
        assert_eq!(
            store
                .find_novel_by_source_url("https://example.com/b")
                .await
                .unwrap()
                .map(|n| n.id),
            Some("n2".to_owned())
        );
        assert_eq!(store.list_novels().await.unwrap().len(), 2);

        // Chapters come back in index order.
        for (id, index) in [("c3", 3), ("c1", 1), ("c2", 2)] {
            store.insert_chapter(&chapter(id, "n1", index)).await.unwrap();
        }
        store.insert_chapter(&chapter("other", "n2", 1)).await.unwrap();
        let indices = store
            .get_chapters("n1")
            .await
            .unwrap()
            .iter()
            .map(|c| c.index)
            .collect::<Vec<_>>();
        assert_eq!(indices, vec![1, 2, 3]);

        // Audio fields are set together and mark the chapter ready.
        store
            .update_chapter_status("c2", ChapterStatus::Error)
            .await
            .unwrap();
        let audio = ChapterAudio {
            path: PathBuf::from("/tmp/c2.mp3"),
            duration_seconds: 12,
            provider: "silent".to_owned(),
        };
        store.update_chapter_audio_info("c2", &audio).await.unwrap();
        let c2 = store.get_chapter("c2").await.unwrap().unwrap();
        assert_eq!(c2.audio, Some(audio));
        assert_eq!(c2.status, ChapterStatus::Ready);

        // Jobs freeze once terminal.
        let job = Job::queued(JobKind::Extract, Some("n1".to_owned()), serde_json::Value::Null);
        store.insert_job(&job).await.unwrap();
        store
            .update_job_status(&job.id, &JobUpdate::running())
            .await
            .unwrap();
        store
            .update_job_status(&job.id, &JobUpdate::progress(40))
            .await
            .unwrap();
        store
            .update_job_status(&job.id, &JobUpdate::failed("boom"))
            .await
            .unwrap();
        let after = store
            .update_job_status(&job.id, &JobUpdate::done())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, JobStatus::Error);
        assert_eq!(after.progress, 40);
        assert_eq!(after.error.as_deref(), Some("boom"));

        // Missing referents are tolerated.
        store
            .update_novel_status("missing", NovelStatus::Error)
            .await
            .unwrap();
        store
            .update_chapter_status("missing", ChapterStatus::Error)
            .await
            .unwrap();
        assert!(store
            .update_job_status("missing", &JobUpdate::done())
            .await
            .unwrap()
            .is_none());
        assert!(store.get_novel("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_store_contract() {
        exercise(&MemoryCatalogStore::new()).await;
    }

    #[tokio::test]
    async fn local_fs_store_contract() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalFsCatalogStore::new(dir.path());
        exercise(&store).await;
        assert!(dir.path().join("jobs").is_dir());
        assert!(dir.path().join("novels").join("n1.json").is_file());
    }

    #[tokio::test]
    async fn local_fs_store_rejects_path_like_ids() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalFsCatalogStore::new(dir.path());
        assert!(store.get_novel("../etc/passwd").await.unwrap().is_none());
        assert!(store.insert_novel(&novel("../x", "u")).await.is_err());
    }
}
