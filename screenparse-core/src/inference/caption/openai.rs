use std::{
    io::Cursor,
    sync::LazyLock,
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use futures::{StreamExt, stream};
use image::{DynamicImage, ImageFormat};
use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::*;

use crate::{
    consts::{
        CAPTION_CROP_SIZE, CAPTION_PROMPT, OPENAI_API_KEY_ENV_NAME, OPENAI_BASE_URL_ENV_NAME,
        OPENAI_DEFAULT_BASE_URL, OPENAI_DEFAULT_MODEL,
    },
    error::*,
    inference::detector::Captioner,
};

static RE_WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));
static RE_WRAPPING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^["'`*\s]+|["'`*.\s]+$"#).expect("valid wrapping punctuation regex")
});
static RE_LEAD_IN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(this (icon|button|image) (is|represents|shows|means)|icon:|caption:)\s*")
        .expect("valid lead-in regex")
});

/// Vision-language captioner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiCaptionConfig {
    pub model: String,
    /// Overrides `OPENAI_BASE_URL` and the public endpoint.
    pub base_url: Option<String>,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    /// Requests in flight per batch.
    pub concurrency: usize,
    /// Side length crops are resized to.
    pub crop_size: u32,
}

impl Default for OpenAiCaptionConfig {
    fn default() -> Self {
        Self {
            model: OPENAI_DEFAULT_MODEL.to_string(),
            base_url: None,
            prompt: CAPTION_PROMPT.to_string(),
            max_tokens: 50,
            temperature: 0.1,
            request_timeout_secs: 30,
            max_retries: 3,
            concurrency: 8,
            crop_size: CAPTION_CROP_SIZE,
        }
    }
}

/// [`Captioner`] talking to an OpenAI-compatible chat completions endpoint.
pub struct OpenAiCaptioner {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    config: OpenAiCaptionConfig,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiCaptioner {
    #[tracing::instrument(skip_all)]
    pub fn new(config: OpenAiCaptionConfig) -> Result<Self> {
        info!("Fetching captioning API key from environment variable.");
        let api_key = std::env::var(OPENAI_API_KEY_ENV_NAME).context(EnvNotFoundSnafu {
            name: OPENAI_API_KEY_ENV_NAME,
        })?;

        let base_url = config
            .base_url
            .clone()
            .or_else(|| std::env::var(OPENAI_BASE_URL_ENV_NAME).ok())
            .unwrap_or_else(|| OPENAI_DEFAULT_BASE_URL.to_string());

        Self::with_api_key(config, base_url, api_key)
    }

    pub fn with_api_key(
        config: OpenAiCaptionConfig,
        base_url: impl AsRef<str>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context(HttpSnafu { stage: "client" })?;

        let endpoint = format!(
            "{}/chat/completions",
            base_url.as_ref().trim_end_matches('/')
        );
        info!("Captioner `{}` using {}", config.model, endpoint);

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            config,
        })
    }

    fn request_body(&self, crop: &DynamicImage) -> Result<serde_json::Value> {
        let data_url = format!("data:image/png;base64,{}", encode_png(crop)?);

        Ok(serde_json::json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": self.config.prompt },
                    { "type": "image_url", "image_url": { "url": data_url } },
                ],
            }],
        }))
    }

    async fn request_once(&self, body: &serde_json::Value) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .context(HttpSnafu { stage: "send" })?;

        let status = response.status();
        if !status.is_success() {
            let err_body = response.text().await.unwrap_or_default();
            return Err(ScreenParseError::Caption {
                message: format!("{status}: {err_body}"),
            });
        }

        let response: ChatResponse = response
            .json()
            .await
            .context(HttpSnafu { stage: "decode" })?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        let caption = clean_caption(&content);
        if caption.is_empty() {
            return Err(ScreenParseError::Caption {
                message: "empty caption".to_string(),
            });
        }

        Ok(caption)
    }

    async fn caption_one(&self, index: usize, crop: &DynamicImage) -> Result<String> {
        let body = self.request_body(crop)?;

        let mut attempt = 0;
        loop {
            match self.request_once(&body).await {
                Ok(caption) => return Ok(caption),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(250 * 2_u64.pow(attempt - 1));
                    warn!(
                        "caption request for crop {} failed (attempt {}): {}, retrying in {:?}",
                        index, attempt, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return Err(ScreenParseError::Caption {
                        message: format!("crop {index}: {e}"),
                    });
                }
            }
        }
    }
}

#[async_trait]
impl Captioner for OpenAiCaptioner {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn crop_size(&self) -> (u32, u32) {
        (self.config.crop_size, self.config.crop_size)
    }

    async fn caption_batch(&self, crops: &[DynamicImage]) -> Result<Vec<Result<String>>> {
        let requests: Vec<_> = crops
            .iter()
            .enumerate()
            .map(|(index, crop)| self.caption_one(index, crop))
            .collect();
        let captions = stream::iter(requests)
            .buffered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        Ok(captions)
    }
}

/// Encodes an image as base64 PNG.
pub fn encode_png(image: &DynamicImage) -> Result<String> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .context(ImageEncodeSnafu {})?;
    Ok(STANDARD.encode(buffer.into_inner()))
}

/// Normalizes a model reply into a short label: no wrapping quotes or
/// trailing punctuation, no lead-in phrase, single spaces.
pub fn clean_caption(raw: &str) -> String {
    let first_line = raw.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    let collapsed = RE_WHITESPACE.replace_all(first_line.trim(), " ");
    let without_lead_in = RE_LEAD_IN.replace(&collapsed, "");
    RE_WRAPPING.replace_all(&without_lead_in, "").into_owned()
}
