use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;

use crate::app::search::SearchBackend;
use crate::fetch::FetchSettings;
use crate::openai::DEFAULT_BASE_URL;
use crate::synth::OpenAiSettings;

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_MAX_CONCURRENCY: usize = 2;
const DEFAULT_VOICE: &str = "alloy";
const DEFAULT_MODEL: &str = "tts-1";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub search_backend: SearchBackend,
    pub max_concurrency: usize,
    pub fetch: FetchSettings,
    /// Present only when an API key is configured.
    pub openai: Option<OpenAiSettings>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = var("WEBNOVEL_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());

        let raw_backend = var("WEBNOVEL_SEARCH_BACKEND").unwrap_or_default();
        let search_backend = SearchBackend::parse(&raw_backend).with_context(|| {
            format!("invalid WEBNOVEL_SEARCH_BACKEND={raw_backend:?}. expected one of: index, scan")
        })?;

        let max_concurrency = match var("WEBNOVEL_MAX_CONCURRENCY") {
            Some(raw) => parse_number::<usize>("WEBNOVEL_MAX_CONCURRENCY", &raw)?.max(1),
            None => DEFAULT_MAX_CONCURRENCY,
        };

        let mut fetch = FetchSettings::default();
        if let Some(raw) = var("WEBNOVEL_FETCH_RETRIES") {
            fetch.max_retries = parse_number("WEBNOVEL_FETCH_RETRIES", &raw)?;
        }
        if let Some(raw) = var("WEBNOVEL_FETCH_BACKOFF_MS") {
            fetch.base_backoff =
                Duration::from_millis(parse_number("WEBNOVEL_FETCH_BACKOFF_MS", &raw)?);
        }

        let openai = var("OPENAI_API_KEY").map(|api_key| OpenAiSettings {
            api_key,
            base_url: var("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            model: var("OPENAI_TTS_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            voice: var("OPENAI_TTS_VOICE").unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            speed: 1.0,
        });

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            search_backend,
            max_concurrency,
            fetch,
            openai,
        })
    }

    pub fn catalog_dir(&self) -> PathBuf {
        self.data_dir.join("catalog")
    }

    pub fn library_dir(&self) -> PathBuf {
        self.data_dir.join("library")
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> anyhow::Result<T> {
    raw.parse::<T>()
        .map_err(|_| anyhow::anyhow!("invalid {key}={raw:?}. expected a non-negative integer"))
}
