pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod http;
pub mod library;
pub mod model;
pub mod queue;
pub mod runner;
pub mod search;
pub mod service;

use std::sync::Arc;

use anyhow::Context as _;

use crate::app::catalog::{CatalogStore, LocalFsCatalogStore};
use crate::app::config::AppConfig;
use crate::app::library::Library;
use crate::app::runner::JobRunner;
use crate::fetch::Fetcher;
use crate::synth::ProviderRegistry;

/// Wires a runner over the on-disk catalog and library under
/// `config.data_dir`, with the search backend loaded.
pub async fn open_runner(config: &AppConfig) -> anyhow::Result<Arc<JobRunner>> {
    let store: Arc<dyn CatalogStore> = Arc::new(LocalFsCatalogStore::new(config.catalog_dir()));
    let search = config.search_backend.build(Arc::clone(&store));
    if let Err(err) = search.ensure_index().await {
        tracing::warn!(?err, "search index setup failed");
    }

    let providers =
        ProviderRegistry::standard(config.openai.clone()).context("build provider registry")?;
    let fetcher = Fetcher::new(config.fetch.clone()).context("build fetcher")?;
    tracing::debug!(
        data_dir = %config.data_dir.display(),
        backend = ?config.search_backend,
        providers = ?providers.names(),
        "opened library"
    );

    Ok(Arc::new(JobRunner::new(
        store,
        search,
        Library::new(config.library_dir()),
        fetcher,
        providers,
    )))
}
