//! Error types for provider calls, image intake and the analysis pipeline.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::domain::{ErrorKind, ProviderId, ProviderResult};
use crate::reconcile::ProviderSummary;

/// Failure of one outbound vendor call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
  #[error("{0} is not configured (no API key)")]
  MissingCredentials(ProviderId),
  #[error("rate limited: {message}")]
  RateLimited { retry_after: Option<Duration>, message: String },
  #[error("vendor rejected request (HTTP {status}): {message}")]
  Rejected { status: u16, message: String },
  #[error("transport failure: {0}")]
  Transport(String),
  #[error("no reply within {0:?}")]
  Timeout(Duration),
  #[error("unparsable response: {0}")]
  Unparsable(String),
}

impl ProviderError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      ProviderError::MissingCredentials(_) => ErrorKind::MissingCredentials,
      ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
      ProviderError::Rejected { .. } => ErrorKind::VendorRejected,
      ProviderError::Transport(_) | ProviderError::Timeout(_) => ErrorKind::TransportFailure,
      ProviderError::Unparsable(_) => ErrorKind::UnparsableResponse,
    }
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      ProviderError::Rejected { status, .. } => Some(*status),
      ProviderError::RateLimited { .. } => Some(429),
      _ => None,
    }
  }

  /// Map a reqwest send/decode error into the taxonomy.
  pub fn from_reqwest(e: reqwest::Error) -> Self {
    if e.is_decode() {
      ProviderError::Unparsable(e.to_string())
    } else if e.is_timeout() {
      ProviderError::Transport(format!("timed out: {}", e))
    } else if e.is_connect() {
      ProviderError::Transport(format!("connection failed: {}", e))
    } else {
      ProviderError::Transport(e.to_string())
    }
  }
}

/// Problems with the submitted image payload.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ImageError {
  #[error("no image provided")]
  Empty,
  #[error("malformed data URI")]
  MalformedDataUri,
  #[error("image is not valid base64: {0}")]
  InvalidBase64(String),
}

/// Which user action a total failure calls for.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
  /// Vendor quota or backoff: retry later.
  Capacity,
  /// Keys missing or refused: an administrator must fix it.
  Configuration,
  Generic,
}

impl FailureClass {
  pub fn classify(results: &[ProviderResult]) -> Self {
    let failed: Vec<&ProviderResult> = results.iter().filter(|r| !r.succeeded).collect();
    if failed.iter().any(|r| r.error_kind == Some(ErrorKind::RateLimited)) {
      return FailureClass::Capacity;
    }
    let is_config = |r: &&ProviderResult| match r.error_kind {
      Some(ErrorKind::MissingCredentials) => true,
      Some(ErrorKind::VendorRejected) => matches!(r.status, Some(401) | Some(403)),
      _ => false,
    };
    if !failed.is_empty() && failed.iter().all(is_config) {
      return FailureClass::Configuration;
    }
    FailureClass::Generic
  }

  pub fn user_message(&self) -> &'static str {
    match self {
      FailureClass::Capacity => "The picture helpers are busy right now. Please try again in a little while.",
      FailureClass::Configuration => "Picture analysis is not set up correctly. Please ask an administrator.",
      FailureClass::Generic => "We could not read the picture this time. Please try again.",
    }
  }

  pub fn suggestion(&self) -> &'static str {
    match self {
      FailureClass::Capacity => "Wait a minute before retrying; the vendor quota was reached.",
      FailureClass::Configuration => "Set a valid API key (OPENAI_API_KEY, ANTHROPIC_API_KEY or GEMINI_API_KEY) and check its access restrictions.",
      FailureClass::Generic => "Retry, or take the photo again with better lighting.",
    }
  }
}

/// Errors surfaced to the caller of an analysis.
#[derive(Debug, Error)]
pub enum AnalyzeError {
  #[error("invalid image: {0}")]
  InvalidImage(#[from] ImageError),
  #[error("unknown provider: {0}")]
  UnknownProvider(String),
  #[error("all providers failed")]
  AllProvidersFailed { class: FailureClass, results: Vec<ProviderSummary> },
}

#[derive(Debug, Error, PartialEq)]
pub enum PracticeError {
  #[error("level must be between 1 and 3, got {0}")]
  InvalidLevel(u8),
  #[error("operands must be at most 20, got {0}")]
  OperandTooLarge(u32),
}

#[cfg(test)]
mod tests {
  use super::*;

  fn failed(kind: ErrorKind, status: Option<u16>) -> ProviderResult {
    ProviderResult::failure(ProviderId::Gemini, "m", kind, "x".into(), 0).with_status(status)
  }

  #[test]
  fn rate_limit_anywhere_means_capacity() {
    let rs = vec![failed(ErrorKind::MissingCredentials, None), failed(ErrorKind::RateLimited, Some(429))];
    assert_eq!(FailureClass::classify(&rs), FailureClass::Capacity);
  }

  #[test]
  fn missing_keys_and_forbidden_mean_configuration() {
    let rs = vec![failed(ErrorKind::MissingCredentials, None), failed(ErrorKind::VendorRejected, Some(403))];
    assert_eq!(FailureClass::classify(&rs), FailureClass::Configuration);
  }

  #[test]
  fn transport_failures_are_generic() {
    let rs = vec![failed(ErrorKind::MissingCredentials, None), failed(ErrorKind::TransportFailure, None)];
    assert_eq!(FailureClass::classify(&rs), FailureClass::Generic);
    let rs = vec![failed(ErrorKind::VendorRejected, Some(500))];
    assert_eq!(FailureClass::classify(&rs), FailureClass::Generic);
  }

  #[test]
  fn provider_error_kinds() {
    assert_eq!(ProviderError::Timeout(Duration::from_secs(1)).kind(), ErrorKind::TransportFailure);
    assert_eq!(ProviderError::Rejected { status: 400, message: String::new() }.status(), Some(400));
    assert_eq!(ProviderError::MissingCredentials(ProviderId::OpenAi).kind(), ErrorKind::MissingCredentials);
  }
}
