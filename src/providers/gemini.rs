//! Gemini generateContent client.
//!
//! Gemini gets the free-text prompt; its reply goes through the extractor
//! unless it happens to contain a JSON object.

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use super::{key_from_env, rejection, ImagePayload, ProviderFuture, VisionProvider, HTTP_TIMEOUT, USER_AGENT_VALUE};
use crate::config::Prompts;
use crate::domain::ProviderId;
use crate::error::ProviderError;

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-exp";

#[derive(Clone)]
pub struct GeminiVision {
  client: reqwest::Client,
  api_key: String,
  base_url: String,
  model: String,
  prompt: String,
}

impl GeminiVision {
  /// GEMINI_API_KEY wins over GOOGLE_AI_API_KEY.
  pub fn from_env(prompts: &Prompts) -> Option<Self> {
    let api_key = key_from_env(&["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"])?;
    let base_url = std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_GEMINI_URL.into());
    let model = std::env::var("GEMINI_VISION_MODEL").unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.into());
    match Self::new(&api_key, &base_url, &model, &prompts.free_text_vision) {
      Ok(c) => Some(c),
      Err(e) => {
        error!(target: "kazoeru_backend", error = %e, "Failed to build Gemini client");
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
    })
  }

  #[instrument(level = "info", skip(self, image), fields(model = %self.model, media_type = %image.media_type()))]
  async fn generate(&self, image: &ImagePayload) -> Result<String, ProviderError> {
    let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
    let req = GenerateRequest {
      contents: vec![Content {
        parts: vec![
          Part::Text { text: self.prompt.clone() },
          Part::InlineData {
            inline_data: InlineData { mime_type: image.media_type().to_string(), data: image.base64().to_string() },
          },
        ],
      }],
    };

    let res = self
      .client
      .post(&url)
      .header(USER_AGENT, USER_AGENT_VALUE)
      .header(CONTENT_TYPE, "application/json")
      .header("x-goog-api-key", &self.api_key)
      .json(&req)
      .send()
      .await
      .map_err(ProviderError::from_reqwest)?;

    if !res.status().is_success() {
      return Err(rejection(res).await);
    }

    let body: GenerateResponse = res.json().await.map_err(|e| ProviderError::Unparsable(e.to_string()))?;
    if let Some(u) = &body.usage_metadata {
      info!(prompt_tokens = ?u.prompt_token_count, candidates_tokens = ?u.candidates_token_count, "Gemini usage");
    }
    let text = body
      .candidates
      .first()
      .map(|c| c.content.parts.iter().filter_map(|p| p.text.as_deref()).collect::<Vec<_>>().join(""))
      .unwrap_or_default();
    Ok(text.trim().to_string())
  }
}

impl VisionProvider for GeminiVision {
  fn id(&self) -> ProviderId {
    ProviderId::Gemini
  }

  fn model_name(&self) -> &str {
    &self.model
  }

  fn describe<'a>(&'a self, image: &'a ImagePayload) -> ProviderFuture<'a> {
    Box::pin(self.generate(image))
  }
}

// --- generateContent DTOs ---

#[derive(Serialize)]
struct GenerateRequest {
  contents: Vec<Content>,
}
#[derive(Serialize)]
struct Content {
  parts: Vec<Part>,
}
#[derive(Serialize)]
#[serde(untagged)]
enum Part {
  Text { text: String },
  InlineData { inline_data: InlineData },
}
#[derive(Serialize)]
struct InlineData {
  mime_type: String,
  data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
  #[serde(default)]
  candidates: Vec<Candidate>,
  #[serde(default)]
  usage_metadata: Option<UsageMetadata>,
}
#[derive(Deserialize)]
struct Candidate {
  content: CandidateContent,
}
#[derive(Deserialize)]
struct CandidateContent {
  #[serde(default)]
  parts: Vec<RespPart>,
}
#[derive(Deserialize)]
struct RespPart {
  #[serde(default)]
  text: Option<String>,
}
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
  #[serde(default)]
  prompt_token_count: Option<u32>,
  #[serde(default)]
  candidates_token_count: Option<u32>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::ErrorKind;
  use crate::providers::testing::{spawn_mock_vendor, tiny_image};
  use axum::{extract::Path, http::HeaderMap, http::StatusCode, routing::post, Json, Router};

  const MOCK_ROUTE: &str = "/models/*call";

  #[test]
  fn parts_serialize_untagged() {
    let req = GenerateRequest {
      contents: vec![Content {
        parts: vec![
          Part::Text { text: "describe".into() },
          Part::InlineData { inline_data: InlineData { mime_type: "image/png".into(), data: "AA==".into() } },
        ],
      }],
    };
    let v = serde_json::to_value(&req).unwrap();
    assert_eq!(v["contents"][0]["parts"][0]["text"], "describe");
    assert_eq!(v["contents"][0]["parts"][1]["inline_data"]["mime_type"], "image/png");
  }

  #[tokio::test]
  async fn joins_candidate_parts() {
    let router = Router::new().route(
      MOCK_ROUTE,
      post(|Path(call): Path<String>, headers: HeaderMap| async move {
        if call != "gemini-test:generateContent" || headers.get("x-goog-api-key").map(|v| v != "g-key").unwrap_or(true) {
          return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": { "message": "API key not valid" } })));
        }
        (
          StatusCode::OK,
          Json(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "左に2個" }, { "text": "、右に5個のりんご" }] } }],
            "usageMetadata": { "promptTokenCount": 12, "candidatesTokenCount": 8 }
          })),
        )
      }),
    );
    let base = spawn_mock_vendor(router).await;
    let client = GeminiVision::new("g-key", &base, "gemini-test", "describe").unwrap();
    assert_eq!(client.describe(&tiny_image()).await.unwrap(), "左に2個、右に5個のりんご");
  }

  #[tokio::test]
  async fn quota_error_is_rate_limited_even_without_429() {
    let router = Router::new().route(
      MOCK_ROUTE,
      post(|| async {
        (
          StatusCode::FORBIDDEN,
          Json(serde_json::json!({ "error": { "code": 403, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED" } })),
        )
      }),
    );
    let base = spawn_mock_vendor(router).await;
    let client = GeminiVision::new("g-key", &base, "gemini-test", "describe").unwrap();
    let err = client.describe(&tiny_image()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);
  }

  #[tokio::test]
  async fn empty_candidates_yield_empty_text() {
    let router = Router::new().route(MOCK_ROUTE, post(|| async { Json(serde_json::json!({ "candidates": [] })) }));
    let base = spawn_mock_vendor(router).await;
    let client = GeminiVision::new("g-key", &base, "gemini-test", "describe").unwrap();
    assert_eq!(client.describe(&tiny_image()).await.unwrap(), "");
  }
}
