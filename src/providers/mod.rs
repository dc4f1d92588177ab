//! Vision provider adapters.
//!
//! Every vendor implements `VisionProvider`: one outbound call with the image
//! and a fixed prompt, returning the model's raw text. `run_adapter` turns
//! that into a `ProviderResult`: structured parsing first, free-text
//! extraction as fallback, confidence normalized to [0,1]. Adapters never
//! retry.
//!
//! ```text
//! Reconciler → run_adapter() → VisionProvider → [OpenAiVision, AnthropicVision, GeminiVision]
//! ```

pub mod anthropic;
pub mod gemini;
pub mod openai;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::config::AppConfig;
use crate::domain::{ProviderId, ProviderResult, RecognizedProblem};
use crate::error::{ImageError, ProviderError};
use crate::extract::FreeTextExtractor;
use crate::hints::HintGenerator;
use crate::structured::parse_structured;
use crate::util::trunc_for_log;

pub const USER_AGENT_VALUE: &str = "kazoeru-backend/0.1";

/// Client-level ceiling; the reconciler applies its own, usually shorter, deadline.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(90);

/// A decoded-and-validated image, kept base64 since every vendor wants base64.
#[derive(Clone, Debug, PartialEq)]
pub struct ImagePayload {
  media_type: String,
  data: String,
}

impl ImagePayload {
  /// Accepts `data:image/<type>;base64,<data>` or bare base64 (assumed JPEG).
  pub fn parse(input: &str) -> Result<Self, ImageError> {
    let input = input.trim();
    if input.is_empty() {
      return Err(ImageError::Empty);
    }
    let (media_type, data) = match input.strip_prefix("data:") {
      Some(rest) => {
        let (meta, data) = rest.split_once(',').ok_or(ImageError::MalformedDataUri)?;
        let media_type = meta.strip_suffix(";base64").ok_or(ImageError::MalformedDataUri)?;
        if !media_type.starts_with("image/") {
          return Err(ImageError::MalformedDataUri);
        }
        (media_type.to_string(), data.trim())
      }
      None => ("image/jpeg".to_string(), input),
    };
    if data.is_empty() {
      return Err(ImageError::Empty);
    }
    STANDARD.decode(data).map_err(|e| ImageError::InvalidBase64(e.to_string()))?;
    Ok(Self { media_type, data: data.to_string() })
  }

  pub fn media_type(&self) -> &str {
    &self.media_type
  }

  pub fn base64(&self) -> &str {
    &self.data
  }

  pub fn data_uri(&self) -> String {
    format!("data:{};base64,{}", self.media_type, self.data)
  }
}

pub type ProviderFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ProviderError>> + Send + 'a>>;

/// One vendor's vision-capable completion endpoint.
pub trait VisionProvider: Send + Sync {
  fn id(&self) -> ProviderId;

  fn model_name(&self) -> &str;

  /// Issue exactly one call and return the model's text reply.
  fn describe<'a>(&'a self, image: &'a ImagePayload) -> ProviderFuture<'a>;
}

/// A configured-or-not provider. An empty slot is a valid state: the
/// provider simply has no credentials.
#[derive(Clone)]
pub struct ProviderSlot {
  pub id: ProviderId,
  pub client: Option<Arc<dyn VisionProvider>>,
}

impl ProviderSlot {
  pub fn configured(client: Arc<dyn VisionProvider>) -> Self {
    Self { id: client.id(), client: Some(client) }
  }

  pub fn unconfigured(id: ProviderId) -> Self {
    Self { id, client: None }
  }

  pub fn model_name(&self) -> &str {
    self.client.as_ref().map(|c| c.model_name()).unwrap_or("")
  }

  pub fn is_configured(&self) -> bool {
    self.client.is_some()
  }
}

impl std::fmt::Debug for ProviderSlot {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProviderSlot")
      .field("id", &self.id)
      .field("model", &self.model_name())
      .field("configured", &self.is_configured())
      .finish()
  }
}

/// Build slots for the configured priority order from environment credentials.
pub fn slots_from_env(cfg: &AppConfig) -> Vec<ProviderSlot> {
  cfg
    .providers
    .priority
    .iter()
    .map(|id| {
      let client: Option<Arc<dyn VisionProvider>> = match id {
        ProviderId::OpenAi => openai::OpenAiVision::from_env(&cfg.prompts).map(|c| Arc::new(c) as Arc<dyn VisionProvider>),
        ProviderId::Anthropic => {
          anthropic::AnthropicVision::from_env(&cfg.prompts).map(|c| Arc::new(c) as Arc<dyn VisionProvider>)
        }
        ProviderId::Gemini => gemini::GeminiVision::from_env(&cfg.prompts).map(|c| Arc::new(c) as Arc<dyn VisionProvider>),
      };
      match &client {
        Some(c) => info!(target: "kazoeru_backend", provider = %id, model = %c.model_name(), "Vision provider enabled."),
        None => warn!(target: "kazoeru_backend", provider = %id, "Vision provider disabled (no API key)."),
      }
      ProviderSlot { id: *id, client }
    })
    .collect()
}

/// First non-empty, non-placeholder value among the given env vars.
pub fn key_from_env(names: &[&str]) -> Option<String> {
  names.iter().find_map(|n| std::env::var(n).ok().filter(|k| is_usable_key(k)))
}

fn is_usable_key(k: &str) -> bool {
  let k = k.trim();
  !k.is_empty() && !k.starts_with("your_")
}

/// Map a non-success vendor response to the taxonomy.
pub(crate) async fn rejection(res: reqwest::Response) -> ProviderError {
  let status = res.status();
  let retry_after = res
    .headers()
    .get("retry-after")
    .and_then(|v| v.to_str().ok())
    .and_then(|s| s.parse::<u64>().ok())
    .map(Duration::from_secs);
  let body = res.text().await.unwrap_or_default();
  classify_rejection(status, &body, retry_after)
}

pub(crate) fn classify_rejection(status: StatusCode, body: &str, retry_after: Option<Duration>) -> ProviderError {
  let message = extract_vendor_error(body).unwrap_or_else(|| trunc_for_log(body, 200));
  let quota = body.contains("RESOURCE_EXHAUSTED") || message.to_lowercase().contains("quota");
  if status == StatusCode::TOO_MANY_REQUESTS || quota {
    ProviderError::RateLimited { retry_after, message }
  } else {
    ProviderError::Rejected { status: status.as_u16(), message }
  }
}

/// All three vendors wrap errors as `{"error": {"message": ...}}`.
fn extract_vendor_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap {
    error: EObj,
  }
  #[derive(Deserialize)]
  struct EObj {
    message: String,
  }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

/// Turns raw vendor text into a `RecognizedProblem`.
#[derive(Clone, Debug)]
pub struct ReplyInterpreter {
  extractor: FreeTextExtractor,
  hints: HintGenerator,
}

impl ReplyInterpreter {
  pub fn new(cfg: &AppConfig) -> Self {
    let extractor = FreeTextExtractor::new(&cfg.extraction);
    let hints = HintGenerator::new(&cfg.hints, extractor.default_label());
    Self { extractor, hints }
  }

  pub fn hints(&self) -> &HintGenerator {
    &self.hints
  }

  /// Structured parse first, free-text extraction otherwise. Only an empty
  /// reply is an error; anything else degrades into a low-confidence result.
  /// Hints are left as the vendor sent them.
  pub fn interpret(&self, provider: ProviderId, text: &str) -> Result<RecognizedProblem, ProviderError> {
    if text.trim().is_empty() {
      return Err(ProviderError::Unparsable("empty reply".into()));
    }
    let problem = match parse_structured(text, provider.default_confidence(), self.extractor.default_label()) {
      Ok(p) => {
        debug!(target: "vision", %provider, "structured reply parsed");
        p
      }
      Err(e) => {
        let ex = self.extractor.extract(text);
        debug!(target: "vision", %provider, reason = %e, rule = ?ex.rule, "structured parse failed; used free-text extraction");
        ex.problem
      }
    };
    Ok(problem.normalized())
  }
}

/// Run one adapter end to end. Never fails: every outcome is a `ProviderResult`.
#[instrument(level = "info", skip(slot, image, interpreter), fields(provider = %slot.id, model = %slot.model_name()))]
pub async fn run_adapter(
  slot: &ProviderSlot,
  image: ImagePayload,
  interpreter: &ReplyInterpreter,
  deadline: Duration,
) -> ProviderResult {
  let model = slot.model_name().to_string();
  let Some(client) = &slot.client else {
    let e = ProviderError::MissingCredentials(slot.id);
    return ProviderResult::failure(slot.id, &model, e.kind(), e.to_string(), 0);
  };

  let start = Instant::now();
  let outcome = match tokio::time::timeout(deadline, client.describe(&image)).await {
    Ok(res) => res,
    Err(_) => Err(ProviderError::Timeout(deadline)),
  };
  let latency_ms = start.elapsed().as_millis() as u64;

  let problem = outcome.and_then(|text| {
    debug!(target: "vision", provider = %slot.id, reply = %trunc_for_log(&text, 300), "vendor reply");
    interpreter.interpret(slot.id, &text)
  });

  match problem {
    Ok(p) => {
      info!(target: "vision", provider = %slot.id, latency_ms, answer = ?p.answer, confidence = p.confidence, "provider succeeded");
      ProviderResult::success(slot.id, &model, p, latency_ms)
    }
    Err(e) => {
      warn!(target: "vision", provider = %slot.id, latency_ms, error = %e, "provider failed");
      ProviderResult::failure(slot.id, &model, e.kind(), e.to_string(), latency_ms).with_status(e.status())
    }
  }
}

#[cfg(test)]
pub(crate) mod testing {
  //! Fakes shared by adapter, reconciler and route tests.

  use super::*;
  use tokio::net::TcpListener;

  /// Replies with a canned outcome after an optional delay.
  pub struct ScriptedProvider {
    pub id: ProviderId,
    pub reply: Result<String, ProviderError>,
    pub delay: Duration,
    pub calls: std::sync::atomic::AtomicUsize,
  }

  impl ScriptedProvider {
    pub fn ok(id: ProviderId, text: &str) -> Self {
      Self { id, reply: Ok(text.to_string()), delay: Duration::ZERO, calls: Default::default() }
    }

    pub fn err(id: ProviderId, e: ProviderError) -> Self {
      Self { id, reply: Err(e), delay: Duration::ZERO, calls: Default::default() }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
      self.delay = delay;
      self
    }
  }

  impl VisionProvider for ScriptedProvider {
    fn id(&self) -> ProviderId {
      self.id
    }

    fn model_name(&self) -> &str {
      "scripted"
    }

    fn describe<'a>(&'a self, _image: &'a ImagePayload) -> ProviderFuture<'a> {
      self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
      Box::pin(async move {
        if !self.delay.is_zero() {
          tokio::time::sleep(self.delay).await;
        }
        self.reply.clone()
      })
    }
  }

  pub fn tiny_image() -> ImagePayload {
    ImagePayload::parse("data:image/png;base64,iVBORw0KGgo=").expect("valid test image")
  }

  /// Serve `router` on an ephemeral local port; returns its base URL.
  pub async fn spawn_mock_vendor(router: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock vendor");
    let addr = listener.local_addr().expect("mock vendor addr");
    tokio::spawn(async move {
      let _ = axum::serve(listener, router).await;
    });
    format!("http://{}", addr)
  }
}

#[cfg(test)]
mod tests {
  use super::testing::*;
  use super::*;
  use crate::domain::{ErrorKind, ProblemKind};
  use std::sync::atomic::Ordering;

  #[test]
  fn image_payload_accepts_data_uri_and_bare_base64() {
    let img = ImagePayload::parse("data:image/png;base64,aGVsbG8=").unwrap();
    assert_eq!(img.media_type(), "image/png");
    assert_eq!(img.base64(), "aGVsbG8=");
    assert_eq!(img.data_uri(), "data:image/png;base64,aGVsbG8=");

    let bare = ImagePayload::parse("aGVsbG8=").unwrap();
    assert_eq!(bare.media_type(), "image/jpeg");
  }

  #[test]
  fn image_payload_rejects_garbage() {
    assert_eq!(ImagePayload::parse("  "), Err(ImageError::Empty));
    assert_eq!(ImagePayload::parse("data:text/plain;base64,aGVsbG8="), Err(ImageError::MalformedDataUri));
    assert_eq!(ImagePayload::parse("data:image/png,aGVsbG8="), Err(ImageError::MalformedDataUri));
    assert!(matches!(ImagePayload::parse("data:image/png;base64,@@@"), Err(ImageError::InvalidBase64(_))));
  }

  #[test]
  fn placeholder_keys_are_not_usable() {
    assert!(!is_usable_key("your_openai_api_key_here"));
    assert!(!is_usable_key("  "));
    assert!(is_usable_key("sk-123"));
  }

  #[test]
  fn rejection_classification() {
    let e = classify_rejection(StatusCode::TOO_MANY_REQUESTS, "{}", Some(Duration::from_secs(3)));
    assert_eq!(e, ProviderError::RateLimited { retry_after: Some(Duration::from_secs(3)), message: "{}".into() });

    let quota = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
    assert_eq!(classify_rejection(StatusCode::FORBIDDEN, quota, None).kind(), ErrorKind::RateLimited);

    let e = classify_rejection(StatusCode::UNAUTHORIZED, r#"{"error":{"message":"bad key"}}"#, None);
    assert_eq!(e, ProviderError::Rejected { status: 401, message: "bad key".into() });
  }

  #[test]
  fn key_lookup_skips_placeholder_for_later_name() {
    std::env::set_var("KAZOERU_TEST_PRIMARY_KEY", "your_gemini_api_key_here");
    std::env::set_var("KAZOERU_TEST_FALLBACK_KEY", "real-key");
    std::env::set_var("KAZOERU_TEST_BLANK_KEY", "");
    assert_eq!(
      key_from_env(&["KAZOERU_TEST_PRIMARY_KEY", "KAZOERU_TEST_FALLBACK_KEY"]),
      Some("real-key".to_string())
    );
    assert_eq!(
      key_from_env(&["KAZOERU_TEST_BLANK_KEY", "KAZOERU_TEST_FALLBACK_KEY"]),
      Some("real-key".to_string())
    );
    assert_eq!(key_from_env(&["KAZOERU_TEST_PRIMARY_KEY", "KAZOERU_TEST_UNSET_KEY"]), None);
  }

  #[test]
  fn interpreter_falls_back_to_free_text_without_inventing_hints() {
    let interp = ReplyInterpreter::new(&AppConfig::default());
    let p = interp.interpret(ProviderId::Gemini, "左に3匹、右に4匹のかえる").unwrap();
    assert_eq!(p.operands, vec![3, 4]);
    assert_eq!(p.kind, ProblemKind::Addition);
    assert!(p.hints.is_empty());

    let p = interp.interpret(ProviderId::Anthropic, r#"{"leftCount":3,"rightCount":4,"answer":7}"#).unwrap();
    assert!(p.hints.is_empty());
    assert!(interp.interpret(ProviderId::Gemini, "  \n").is_err());
  }

  #[tokio::test]
  async fn missing_credentials_make_no_call() {
    let interp = ReplyInterpreter::new(&AppConfig::default());
    let slot = ProviderSlot::unconfigured(ProviderId::Anthropic);
    let r = run_adapter(&slot, tiny_image(), &interp, Duration::from_secs(1)).await;
    assert!(!r.succeeded);
    assert_eq!(r.error_kind, Some(ErrorKind::MissingCredentials));
  }

  #[tokio::test]
  async fn slow_provider_times_out_as_transport_failure() {
    let interp = ReplyInterpreter::new(&AppConfig::default());
    let fake = Arc::new(ScriptedProvider::ok(ProviderId::Gemini, "3 + 4 = 7").delayed(Duration::from_secs(5)));
    let slot = ProviderSlot::configured(fake.clone());
    let r = run_adapter(&slot, tiny_image(), &interp, Duration::from_millis(50)).await;
    assert_eq!(r.error_kind, Some(ErrorKind::TransportFailure));
    assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn vendor_confidence_is_normalized() {
    let interp = ReplyInterpreter::new(&AppConfig::default());
    let fake = ScriptedProvider::ok(ProviderId::Anthropic, r#"{"leftCount":3,"rightCount":4,"answer":7,"confidence":80}"#);
    let slot = ProviderSlot::configured(Arc::new(fake));
    let r = run_adapter(&slot, tiny_image(), &interp, Duration::from_secs(1)).await;
    assert!(r.succeeded);
    assert!((r.raw_confidence - 0.8).abs() < 1e-6);
  }
}
