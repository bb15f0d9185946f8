mod support;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use webnovel::app::catalog::CatalogStore;
use webnovel::app::library::Library;
use webnovel::app::model::{Chapter, ChapterStatus, JobStatus, Novel, NovelStatus};
use webnovel::synth::{ProviderRegistry, SILENT_PROVIDER};

use support::{CountingSynthesizer, RecordingStore};

const NOVEL_ID: &str = "novel-1";

/// Stores a ready novel whose chapters carry the given texts. `None` leaves a
/// chapter without extracted text.
async fn seed_novel(store: &dyn CatalogStore, library_dir: &Path, texts: &[Option<&str>]) {
    let now = Utc::now();
    store
        .insert_novel(&Novel {
            id: NOVEL_ID.to_string(),
            title: "Bell Tower".to_string(),
            author: "A. Writer".to_string(),
            source_url: "https://example.com/bell-tower".to_string(),
            description: String::new(),
            tags: String::new(),
            chapter_count: Some(texts.len() as u32),
            status: NovelStatus::Ready,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();

    let library = Library::new(library_dir);
    for (pos, text) in texts.iter().enumerate() {
        let index = pos as u32 + 1;
        let text_path = match text {
            Some(text) => Some(
                library
                    .write_chapter_text(NOVEL_ID, index, text)
                    .await
                    .unwrap(),
            ),
            None => None,
        };
        store
            .insert_chapter(&Chapter {
                id: format!("{NOVEL_ID}-c{index}"),
                novel_id: NOVEL_ID.to_string(),
                index,
                title: format!("Chapter {index}"),
                source_url: format!("https://example.com/bell-tower/{index}"),
                text_path,
                audio: None,
                status: ChapterStatus::Ready,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
    }
}

fn registry(providers: &[Arc<CountingSynthesizer>]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::standard(None).unwrap();
    for provider in providers {
        registry.register(provider.clone());
    }
    registry
}

#[tokio::test]
async fn novel_synthesis_is_idempotent() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let store = RecordingStore::new();
    seed_novel(
        store.as_ref(),
        temp.path(),
        &[Some("First chapter."), Some("Second chapter.")],
    )
    .await;
    let counting = CountingSynthesizer::new("counting");
    let runner = support::runner(temp.path(), store.clone(), registry(&[counting.clone()]));
    let service = support::inline_service(&runner);

    let first = service
        .submit_novel_synthesis(NOVEL_ID, Some("counting"))
        .await?;
    let job = store.get_job(&first).await?.unwrap();
    assert_eq!((job.status, job.progress), (JobStatus::Done, 100), "{:?}", job.error);
    assert_eq!(counting.calls(), 2);
    assert_eq!(store.progress_of(&first), vec![0, 45, 90, 100]);

    let chapters = store.get_chapters(NOVEL_ID).await?;
    for chapter in &chapters {
        let audio = chapter.audio.as_ref().expect("audio recorded");
        assert_eq!(audio.provider, "counting");
        assert_eq!(audio.duration_seconds, 2);
        assert_eq!(chapter.status, ChapterStatus::Ready);
    }
    let bytes = std::fs::read(&chapters[1].audio.as_ref().unwrap().path)?;
    assert_eq!(bytes, b"[Second chapter.]");

    let second = service
        .submit_novel_synthesis(NOVEL_ID, Some("counting"))
        .await?;
    let job = store.get_job(&second).await?.unwrap();
    assert_eq!((job.status, job.progress), (JobStatus::Done, 100));
    assert_eq!(counting.calls(), 2);

    let with_audio = runner.search().search_novels("bell", Some(true)).await?;
    assert_eq!(with_audio, vec![NOVEL_ID.to_string()]);
    Ok(())
}

#[tokio::test]
async fn chapter_synthesis_concatenates_chunks_in_order() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let store = RecordingStore::new();
    let sentence = format!("{}.", "word ".repeat(399).trim_end());
    let long_text = vec![sentence.as_str(); 12].join(" ");
    seed_novel(store.as_ref(), temp.path(), &[Some(&long_text)]).await;
    let counting = CountingSynthesizer::new("counting");
    let runner = support::runner(temp.path(), store.clone(), registry(&[counting.clone()]));
    let service = support::inline_service(&runner);

    let job_id = service
        .submit_chapter_synthesis(&format!("{NOVEL_ID}-c1"), Some("counting"))
        .await?;
    let job = store.get_job(&job_id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Done, "{:?}", job.error);

    let chunks = webnovel::chunk::chunk_text(&long_text, webnovel::chunk::DEFAULT_MAX_CHARS);
    assert!(chunks.len() > 1);
    assert_eq!(counting.calls(), chunks.len());

    let chapter = store.get_chapter(&format!("{NOVEL_ID}-c1")).await?.unwrap();
    let audio = chapter.audio.unwrap();
    assert_eq!(audio.duration_seconds, 2 * chunks.len() as u64);
    let expected = chunks
        .iter()
        .map(|chunk| format!("[{chunk}]"))
        .collect::<String>();
    assert_eq!(std::fs::read(&audio.path)?, expected.into_bytes());

    let progress = store.progress_of(&job_id);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(progress[progress.len() - 2], 90);
    Ok(())
}

#[tokio::test]
async fn failing_provider_keeps_earlier_audio() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let store = RecordingStore::new();
    seed_novel(
        store.as_ref(),
        temp.path(),
        &[Some("Kept."), Some("Will fail.")],
    )
    .await;
    let counting = CountingSynthesizer::new("counting");
    let failing = CountingSynthesizer::failing("failing");
    let runner = support::runner(
        temp.path(),
        store.clone(),
        registry(&[counting.clone(), failing.clone()]),
    );
    let service = support::inline_service(&runner);

    service
        .submit_chapter_synthesis(&format!("{NOVEL_ID}-c1"), Some("counting"))
        .await?;
    let job_id = service
        .submit_novel_synthesis(NOVEL_ID, Some("failing"))
        .await?;

    let job = store.get_job(&job_id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error.unwrap_or_default().contains("provider unavailable"));
    assert_eq!(failing.calls(), 1);

    let chapters = store.get_chapters(NOVEL_ID).await?;
    assert_eq!(
        chapters[0].audio.as_ref().map(|a| a.provider.as_str()),
        Some("counting")
    );
    assert_eq!(chapters[0].status, ChapterStatus::Ready);
    assert!(chapters[1].audio.is_none());
    assert_eq!(chapters[1].status, ChapterStatus::Error);

    let novel = store.get_novel(NOVEL_ID).await?.unwrap();
    assert_eq!(novel.status, NovelStatus::Ready);
    Ok(())
}

#[tokio::test]
async fn chapter_without_text_aborts_novel_synthesis() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let store = RecordingStore::new();
    seed_novel(
        store.as_ref(),
        temp.path(),
        &[Some("Has text."), None, Some("Never reached.")],
    )
    .await;
    let runner = support::runner(temp.path(), store.clone(), registry(&[]));
    let service = support::inline_service(&runner);

    let job_id = service.submit_novel_synthesis(NOVEL_ID, None).await?;

    let job = store.get_job(&job_id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(
        job.error
            .unwrap_or_default()
            .contains("chapter 2 has no extracted text")
    );

    let chapters = store.get_chapters(NOVEL_ID).await?;
    assert_eq!(
        chapters[0].audio.as_ref().map(|a| a.provider.as_str()),
        Some(SILENT_PROVIDER)
    );
    assert!(chapters[1].audio.is_none());
    assert!(chapters[2].audio.is_none());
    Ok(())
}

#[tokio::test]
async fn novel_without_chapters_fails_synthesis() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let store = RecordingStore::new();
    seed_novel(store.as_ref(), temp.path(), &[]).await;
    let runner = support::runner(temp.path(), store.clone(), registry(&[]));
    let service = support::inline_service(&runner);

    let job_id = service.submit_novel_synthesis(NOVEL_ID, None).await?;

    let job = store.get_job(&job_id).await?.unwrap();
    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error.unwrap_or_default().contains("has no chapters"));
    assert_ne!(store.progress_of(&job_id).last(), Some(&100));
    Ok(())
}
