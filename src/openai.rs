use anyhow::Context as _;
use serde::Serialize;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub fn speech_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/audio/speech")
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechRequest<'a> {
    pub model: &'a str,
    pub input: &'a str,
    pub voice: &'a str,
    pub response_format: &'a str,
    pub speed: f32,
}

/// Calls the speech endpoint and returns the encoded audio body.
pub async fn speech_bytes(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    request: &SpeechRequest<'_>,
) -> anyhow::Result<Vec<u8>> {
    let response = client
        .post(endpoint)
        .bearer_auth(api_key)
        .json(request)
        .send()
        .await
        .with_context(|| format!("POST {endpoint}"))?;

    let status = response.status();
    if !status.is_success() {
        let raw = response.text().await.unwrap_or_default();
        let message = parse_error_message(&raw).unwrap_or(raw);
        anyhow::bail!("OpenAI API error ({status}): {message}");
    }

    let bytes = response
        .bytes()
        .await
        .context("read OpenAI speech body")?;
    if bytes.is_empty() {
        anyhow::bail!("OpenAI speech response is empty");
    }
    Ok(bytes.to_vec())
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}
