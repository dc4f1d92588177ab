//! Minimal OpenAI client for worksheet photos.
//!
//! We only call chat.completions with one user message holding the prompt and
//! the image as a data URI. Calls are instrumented and log model names,
//! latencies and token usage (not contents).
//!
//! NOTE: We never log the API key or the image payload.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use super::{key_from_env, rejection, ImagePayload, ProviderFuture, VisionProvider, HTTP_TIMEOUT, USER_AGENT_VALUE};
use crate::config::Prompts;
use crate::domain::ProviderId;
use crate::error::ProviderError;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

#[derive(Clone)]
pub struct OpenAiVision {
  client: reqwest::Client,
  api_key: String,
  pub base_url: String,
  pub model: String,
  prompt: String,
  max_tokens: u32,
  temperature: f32,
}

impl OpenAiVision {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env(prompts: &Prompts) -> Option<Self> {
    let api_key = key_from_env(&["OPENAI_API_KEY"])?;
    let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_OPENAI_URL.into());
    let model = std::env::var("OPENAI_VISION_MODEL").unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.into());
    match Self::new(&api_key, &base_url, &model, &prompts.json_vision) {
      Ok(c) => Some(c),
      Err(e) => {
        error!(target: "kazoeru_backend", error = %e, "Failed to build OpenAI client");
        None
      }
    }
  }

  pub fn new(api_key: &str, base_url: &str, model: &str, prompt: &str) -> Result<Self, ProviderError> {
    let client = reqwest::Client::builder()
      .timeout(HTTP_TIMEOUT)
      .build()
      .map_err(|e| ProviderError::Transport(format!("failed to create client: {}", e)))?;
    Ok(Self {
      client,
      api_key: api_key.to_string(),
      base_url: base_url.trim_end_matches('/').to_string(),
      model: model.to_string(),
      prompt: prompt.to_string(),
      max_tokens: 1500,
      temperature: 0.1,
    })
  }

  #[instrument(level = "info", skip(self, image), fields(model = %self.model, media_type = %image.media_type()))]
  async fn chat_vision(&self, image: &ImagePayload) -> Result<String, ProviderError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![ChatMessageReq {
        role: "user".into(),
        content: vec![
          ContentPart::Text { text: self.prompt.clone() },
          ContentPart::ImageUrl { image_url: ImageUrl { url: image.data_uri(), detail: "high".into() } },
        ],
      }],
      temperature: self.temperature,
      max_tokens: Some(self.max_tokens),
    };

    let start = std::time::Instant::now();
    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, USER_AGENT_VALUE)
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req)
      .send()
      .await
      .map_err(ProviderError::from_reqwest)?;

    if !res.status().is_success() {
      return Err(rejection(res).await);
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| ProviderError::Unparsable(e.to_string()))?;
    let elapsed: Duration = start.elapsed();
    if let Some(usage) = &body.usage {
      info!(?elapsed, prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body
      .choices
      .first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default()
      .trim()
      .to_string();

    Ok(text)
  }
}

impl VisionProvider for OpenAiVision {
  fn id(&self) -> ProviderId {
    ProviderId::OpenAi
  }

  fn model_name(&self) -> &str {
    &self.model
  }

  fn describe<'a>(&'a self, image: &'a ImagePayload) -> ProviderFuture<'a> {
    Box::pin(self.chat_vision(image))
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq {
  role: String,
  content: Vec<ContentPart>,
}
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
  Text { text: String },
  ImageUrl { image_url: ImageUrl },
}
#[derive(Serialize)]
struct ImageUrl {
  url: String,
  detail: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)]
  usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice {
  message: ChatMessageResp,
}
#[derive(Deserialize)]
struct ChatMessageResp {
  content: Option<String>,
}
#[derive(Deserialize)]
struct Usage {
  #[serde(default)]
  prompt_tokens: Option<u32>,
  #[serde(default)]
  completion_tokens: Option<u32>,
  #[serde(default)]
  total_tokens: Option<u32>,
}
