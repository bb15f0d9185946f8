use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;

use crate::openai::{SpeechRequest, speech_bytes, speech_endpoint};

pub const SILENT_PROVIDER: &str = "silent";
pub const OPENAI_PROVIDER: &str = "openai";

/// Rough speaking rate used to estimate durations (~120 words per minute).
const CHARS_PER_SECOND: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    /// Encoded audio. Successive outputs of one provider can be appended
    /// byte-for-byte into a single playable stream.
    pub bytes: Vec<u8>,
    /// Always at least one second.
    pub duration_seconds: u64,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn name(&self) -> &str;
    async fn synthesize(&self, text: &str) -> anyhow::Result<SynthesizedAudio>;
}

pub fn estimate_duration_seconds(text: &str) -> u64 {
    let chars = text.chars().count();
    chars.div_ceil(CHARS_PER_SECOND).max(1) as u64
}

/// Produces silence of the estimated reading length. Useful where no speech
/// engine is configured; the output is real MP3 so players still work.
#[derive(Debug, Clone, Default)]
pub struct SilentSynthesizer;

#[async_trait]
impl SpeechSynthesizer for SilentSynthesizer {
    fn name(&self) -> &str {
        SILENT_PROVIDER
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<SynthesizedAudio> {
        let seconds = estimate_duration_seconds(text);
        let second = silent_mp3_second();
        let mut bytes = Vec::with_capacity(second.len() * seconds as usize);
        for _ in 0..seconds {
            bytes.extend_from_slice(&second);
        }
        Ok(SynthesizedAudio {
            bytes,
            duration_seconds: seconds,
        })
    }
}

// MPEG-1 Layer III, 128 kbit/s, 44.1 kHz, mono, no CRC. An all-zero side
// info block decodes to silence.
const MP3_FRAME_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0xC0];
const MP3_FRAME_LEN: usize = 417;
// 1152 samples per frame at 44.1 kHz; 39 frames is just over one second.
const MP3_FRAMES_PER_SECOND: usize = 39;

fn silent_mp3_second() -> Vec<u8> {
    let mut frame = vec![0_u8; MP3_FRAME_LEN];
    frame[..MP3_FRAME_HEADER.len()].copy_from_slice(&MP3_FRAME_HEADER);
    frame.repeat(MP3_FRAMES_PER_SECOND)
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub voice: String,
    pub speed: f32,
}

#[derive(Debug, Clone)]
pub struct OpenAiSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    settings: OpenAiSettings,
}

impl OpenAiSynthesizer {
    pub fn new(settings: OpenAiSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("build openai http client")?;
        Ok(Self {
            client,
            endpoint: speech_endpoint(&settings.base_url),
            settings,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSynthesizer {
    fn name(&self) -> &str {
        OPENAI_PROVIDER
    }

    async fn synthesize(&self, text: &str) -> anyhow::Result<SynthesizedAudio> {
        let request = SpeechRequest {
            model: &self.settings.model,
            input: text,
            voice: &self.settings.voice,
            response_format: "mp3",
            speed: self.settings.speed,
        };
        let bytes = speech_bytes(
            &self.client,
            &self.endpoint,
            &self.settings.api_key,
            &request,
        )
        .await
        .context("openai speech")?;

        Ok(SynthesizedAudio {
            bytes,
            duration_seconds: estimate_duration_seconds(text),
        })
    }
}

/// Providers addressable by name. Built once at startup.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn SpeechSynthesizer>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `silent` always, `openai` when settings are given.
    pub fn standard(openai: Option<OpenAiSettings>) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(SilentSynthesizer));
        if let Some(settings) = openai {
            registry.register(Arc::new(
                OpenAiSynthesizer::new(settings).context("init openai provider")?,
            ));
        }
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn SpeechSynthesizer>) {
        self.providers.insert(provider.name().to_owned(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SpeechSynthesizer>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
