//! Anthropic Messages API client for worksheet photos.
//!
//! # Requirements
//!
//! - `ANTHROPIC_API_KEY` environment variable must be set
//! - `ANTHROPIC_BASE_URL` / `ANTHROPIC_VISION_MODEL` optionally override defaults

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use super::{key_from_env, rejection, ImagePayload, ProviderFuture, VisionProvider, HTTP_TIMEOUT, USER_AGENT_VALUE};
use crate::config::Prompts;
use crate::domain::ProviderId;
use crate::error::ProviderError;

/// Default Anthropic API URL
pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com/v1";

/// Anthropic API version header
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";

#[derive(Debug, Clone)]
pub struct AnthropicVision {
  base_url: String,
  model: String,
  max_tokens: usize,
  prompt: String,
  /// HTTP client with auth headers
  client: Client,
}

impl AnthropicVision {
  pub fn from_env(prompts: &Prompts) -> Option<Self> {
    let api_key = key_from_env(&["ANTHROPIC_API_KEY"])?;
    let base_url = std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_ANTHROPIC_URL.into());
    let model = std::env::var("ANTHROPIC_VISION_MODEL").unwrap_or_else(|_| DEFAULT_ANTHROPIC_MODEL.into());
    match Self::with_api_key(&model, &api_key, &prompts.counting_vision) {
      Ok(c) => Some(c.with_base_url(&base_url)),
      Err(e) => {
        error!(target: "kazoeru_backend", error = %e, "Failed to build Anthropic client");
        None
      }
    }
  }

  /// Create a new client with an explicit API key.
  pub fn with_api_key(model: &str, api_key: &str, prompt: &str) -> Result<Self, ProviderError> {
    let mut headers = HeaderMap::new();
    let mut key =
      HeaderValue::from_str(api_key).map_err(|e| ProviderError::Transport(format!("invalid API key format: {}", e)))?;
    key.set_sensitive(true);
    headers.insert("x-api-key", key);
    headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

    let client = Client::builder()
      .default_headers(headers)
      .timeout(HTTP_TIMEOUT)
      .build()
      .map_err(|e| ProviderError::Transport(format!("failed to create client: {}", e)))?;

    Ok(Self {
      base_url: DEFAULT_ANTHROPIC_URL.to_string(),
      model: model.to_string(),
      max_tokens: 1024,
      prompt: prompt.to_string(),
      client,
    })
  }

  /// Set custom base URL
  pub fn with_base_url(mut self, url: &str) -> Self {
    self.base_url = url.trim_end_matches('/').to_string();
    self
  }

  #[instrument(level = "info", skip(self, image), fields(model = %self.model, media_type = %image.media_type()))]
  async fn messages_vision(&self, image: &ImagePayload) -> Result<String, ProviderError> {
    let request = MessagesRequest {
      model: self.model.clone(),
      max_tokens: self.max_tokens,
      messages: vec![Message {
        role: "user".to_string(),
        content: vec![
          Block::Text { text: self.prompt.clone() },
          Block::Image {
            source: ImageSource {
              kind: "base64",
              media_type: image.media_type().to_string(),
              data: image.base64().to_string(),
            },
          },
        ],
      }],
    };

    let url = format!("{}/messages", self.base_url);
    let response = self.client.post(&url).json(&request).send().await.map_err(ProviderError::from_reqwest)?;

    if !response.status().is_success() {
      return Err(rejection(response).await);
    }

    let body: MessagesResponse =
      response.json().await.map_err(|e| ProviderError::Unparsable(format!("failed to parse response: {}", e)))?;
    info!(input_tokens = body.usage.input_tokens, output_tokens = body.usage.output_tokens, "Anthropic usage");

    let text = body.content.iter().filter_map(|c| c.text.as_deref()).collect::<Vec<_>>().join("\n");
    Ok(text.trim().to_string())
  }
}

impl VisionProvider for AnthropicVision {
  fn id(&self) -> ProviderId {
    ProviderId::Anthropic
  }

  fn model_name(&self) -> &str {
    &self.model
  }

  fn describe<'a>(&'a self, image: &'a ImagePayload) -> ProviderFuture<'a> {
    Box::pin(self.messages_vision(image))
  }
}

/// Request body for Anthropic messages API
#[derive(Debug, Serialize)]
struct MessagesRequest {
  model: String,
  max_tokens: usize,
  messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
  role: String,
  content: Vec<Block>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Block {
  Text { text: String },
  Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
  #[serde(rename = "type")]
  kind: &'static str,
  media_type: String,
  data: String,
}

/// Response from Anthropic messages API
#[derive(Debug, Deserialize)]
struct MessagesResponse {
  content: Vec<ContentBlock>,
  #[serde(default)]
  usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
  #[serde(default)]
  text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Usage {
  #[serde(default)]
  input_tokens: usize,
  #[serde(default)]
  output_tokens: usize,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::providers::testing::{spawn_mock_vendor, tiny_image};
  use axum::{http::HeaderMap as AxumHeaders, http::StatusCode, routing::post, Json, Router};

  #[test]
  fn image_block_serializes_as_base64_source() {
    let block = Block::Image {
      source: ImageSource { kind: "base64", media_type: "image/png".into(), data: "AA==".into() },
    };
    let v = serde_json::to_value(&block).unwrap();
    assert_eq!(v["type"], "image");
    assert_eq!(v["source"]["type"], "base64");
    assert_eq!(v["source"]["media_type"], "image/png");
  }

  #[test]
  fn response_deserialization() {
    let json = r#"{
      "content": [{ "type": "text", "text": "{\"leftCount\": 3}" }],
      "usage": { "input_tokens": 10, "output_tokens": 5 },
      "stop_reason": "end_turn"
    }"#;
    let response: MessagesResponse = serde_json::from_str(json).unwrap();
    assert_eq!(response.content[0].text.as_deref(), Some("{\"leftCount\": 3}"));
    assert_eq!(response.usage.output_tokens, 5);
  }

  #[test]
  fn debug_output_hides_api_key() {
    let vision = AnthropicVision::with_api_key("claude-test", "sk-ant-secret-123", "count").unwrap();
    let shown = format!("{:?}", vision);
    assert!(shown.contains("claude-test"));
    assert!(!shown.contains("sk-ant-secret-123"));
  }

  #[tokio::test]
  async fn sends_auth_headers_and_joins_text_blocks() {
    let router = Router::new().route(
      "/messages",
      post(|headers: AxumHeaders, Json(body): Json<serde_json::Value>| async move {
        let ok = headers.get("x-api-key").map(|v| v == "ak-test").unwrap_or(false)
          && headers.get("anthropic-version").map(|v| v == ANTHROPIC_VERSION).unwrap_or(false)
          && body["messages"][0]["content"][1]["source"]["data"] == "iVBORw0KGgo=";
        if !ok {
          return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": { "message": "bad request" } })));
        }
        (
          StatusCode::OK,
          Json(serde_json::json!({
            "content": [{ "type": "text", "text": "左に3匹" }, { "type": "text", "text": "右に4匹" }],
            "usage": { "input_tokens": 1, "output_tokens": 2 }
          })),
        )
      }),
    );
    let base = spawn_mock_vendor(router).await;
    let client = AnthropicVision::with_api_key("claude-test", "ak-test", "count").unwrap().with_base_url(&base);
    let text = client.describe(&tiny_image()).await.unwrap();
    assert_eq!(text, "左に3匹\n右に4匹");
  }

  #[tokio::test]
  async fn maps_forbidden_to_vendor_rejected() {
    let router = Router::new().route(
      "/messages",
      post(|| async { (StatusCode::FORBIDDEN, Json(serde_json::json!({ "error": { "message": "region not supported" } }))) }),
    );
    let base = spawn_mock_vendor(router).await;
    let client = AnthropicVision::with_api_key("claude-test", "ak-test", "count").unwrap().with_base_url(&base);
    let err = client.describe(&tiny_image()).await.unwrap_err();
    assert_eq!(err, ProviderError::Rejected { status: 403, message: "region not supported".into() });
  }
}
