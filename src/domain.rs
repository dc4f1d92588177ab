//! Domain models: the recognized arithmetic problem, provider identities and
//! the per-provider result envelope consumed by the reconciler.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Arithmetic operation category inferred from a worksheet.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
  Addition,
  Subtraction,
  Counting,
  Comparison,
  #[default]
  Unknown,
}

impl ProblemKind {
  /// Lenient parse used on vendor payloads. Anything unrecognized is `Unknown`.
  pub fn parse_loose(s: &str) -> Self {
    match s.trim().to_lowercase().as_str() {
      "addition" | "add" | "plus" | "たし算" => ProblemKind::Addition,
      "subtraction" | "subtract" | "minus" | "ひき算" => ProblemKind::Subtraction,
      "counting" | "count" => ProblemKind::Counting,
      "comparison" | "compare" => ProblemKind::Comparison,
      _ => ProblemKind::Unknown,
    }
  }

  /// Combine the first two operands the way this kind reads them.
  /// Counting with a single operand is that operand.
  pub fn combine(&self, operands: &[u32]) -> Option<i64> {
    match (self, operands) {
      (ProblemKind::Subtraction, [a, b, ..]) => Some(*a as i64 - *b as i64),
      (ProblemKind::Addition | ProblemKind::Counting, [a, b, ..]) => Some(*a as i64 + *b as i64),
      (ProblemKind::Counting, [n]) => Some(*n as i64),
      _ => None,
    }
  }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
  Easy,
  Medium,
  Hard,
  #[default]
  Unknown,
}

impl Difficulty {
  /// ≤5 easy, ≤10 medium, otherwise hard. No answer means unknown.
  pub fn from_answer(answer: Option<i64>) -> Self {
    match answer {
      Some(a) if a <= 5 => Difficulty::Easy,
      Some(a) if a <= 10 => Difficulty::Medium,
      Some(_) => Difficulty::Hard,
      None => Difficulty::Unknown,
    }
  }
}

/// What was seen in the picture and where.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VisualDescription {
  pub object_label: String,
  #[serde(default)]
  pub counts_by_side: Vec<u32>,
  #[serde(default)]
  pub arrangement: String,
}

/// Canonical output record for one recognized worksheet problem.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecognizedProblem {
  pub kind: ProblemKind,
  pub expression: String,
  pub problem_text: String,
  #[serde(default)]
  pub operands: Vec<u32>,
  #[serde(default)]
  pub answer: Option<i64>,
  pub difficulty: Difficulty,
  #[serde(default)]
  pub concepts: BTreeSet<String>,
  #[serde(default)]
  pub hints: Vec<String>,
  #[serde(default)]
  pub visual_description: Option<VisualDescription>,
  pub confidence: f32,
}

pub const MAX_HINTS: usize = 5;

impl RecognizedProblem {
  /// Object label from the visual description, if any.
  pub fn object_label(&self) -> Option<&str> {
    self.visual_description.as_ref().map(|v| v.object_label.as_str()).filter(|s| !s.is_empty())
  }

  /// Enforce the record-level invariants after construction:
  /// answer filled in when computable, difficulty derived, hints capped,
  /// confidence clamped.
  pub fn normalized(mut self) -> Self {
    if self.answer.is_none() {
      self.answer = self.kind.combine(&self.operands);
    }
    self.difficulty = Difficulty::from_answer(self.answer);
    self.hints.retain(|h| !h.trim().is_empty());
    self.hints.truncate(MAX_HINTS);
    self.confidence = clamp_unit(self.confidence);
    self
  }
}

/// Default concept labels per kind.
pub fn concepts_for(kind: ProblemKind) -> BTreeSet<String> {
  let labels: &[&str] = match kind {
    ProblemKind::Addition => &["counting", "addition"],
    ProblemKind::Subtraction => &["counting", "subtraction"],
    ProblemKind::Counting => &["counting"],
    ProblemKind::Comparison => &["counting", "comparison"],
    ProblemKind::Unknown => &[],
  };
  labels.iter().map(|s| s.to_string()).collect()
}

/// Render "a + b" / "a - b" / "n" for a kind and its operands.
pub fn render_expression(kind: ProblemKind, operands: &[u32]) -> String {
  match (kind, operands) {
    (ProblemKind::Subtraction, [a, b, ..]) => format!("{} - {}", a, b),
    (_, [a, b, ..]) => format!("{} + {}", a, b),
    (_, [n]) => n.to_string(),
    _ => String::new(),
  }
}

/// Clamp to [0,1]; NaN becomes 0.
pub fn clamp_unit(v: f32) -> f32 {
  if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

/// Normalize a self-reported confidence that may be on a 0-100 scale.
pub fn normalize_confidence(v: f64) -> f32 {
  let v = if v > 1.0 { v / 100.0 } else { v };
  clamp_unit(v as f32)
}

/// The vision vendors we know how to talk to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
  #[serde(rename = "openai")]
  OpenAi,
  Anthropic,
  Gemini,
}

impl ProviderId {
  pub const ALL: [ProviderId; 3] = [ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Gemini];

  pub fn as_str(&self) -> &'static str {
    match self {
      ProviderId::OpenAi => "openai",
      ProviderId::Anthropic => "anthropic",
      ProviderId::Gemini => "gemini",
    }
  }

  /// Prior used when the vendor does not report a confidence of its own.
  pub fn default_confidence(&self) -> f32 {
    match self {
      ProviderId::OpenAi => 0.9,
      ProviderId::Anthropic => 0.8,
      ProviderId::Gemini => 0.7,
    }
  }
}

impl fmt::Display for ProviderId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ProviderId {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "openai" | "gpt" => Ok(ProviderId::OpenAi),
      "anthropic" | "claude" => Ok(ProviderId::Anthropic),
      "gemini" | "google" => Ok(ProviderId::Gemini),
      other => Err(format!("unknown provider: {}", other)),
    }
  }
}

/// Failure categories for a single provider call.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
  MissingCredentials,
  RateLimited,
  VendorRejected,
  TransportFailure,
  UnparsableResponse,
}

/// Envelope produced by one Provider Adapter invocation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderResult {
  pub provider_id: ProviderId,
  pub model: String,
  pub succeeded: bool,
  pub problem: Option<RecognizedProblem>,
  pub raw_confidence: f32,
  pub error_kind: Option<ErrorKind>,
  pub detail: Option<String>,
  /// HTTP status of a vendor rejection (401/403 mean misconfiguration).
  #[serde(skip)]
  pub status: Option<u16>,
  pub latency_ms: u64,
}

impl ProviderResult {
  pub fn success(provider_id: ProviderId, model: &str, problem: RecognizedProblem, latency_ms: u64) -> Self {
    let raw_confidence = clamp_unit(problem.confidence);
    Self {
      provider_id,
      model: model.to_string(),
      succeeded: true,
      problem: Some(problem),
      raw_confidence,
      error_kind: None,
      detail: None,
      status: None,
      latency_ms,
    }
  }

  pub fn failure(provider_id: ProviderId, model: &str, kind: ErrorKind, detail: String, latency_ms: u64) -> Self {
    Self {
      provider_id,
      model: model.to_string(),
      succeeded: false,
      problem: None,
      raw_confidence: 0.0,
      error_kind: Some(kind),
      detail: Some(detail),
      status: None,
      latency_ms,
    }
  }

  pub fn with_status(mut self, status: Option<u16>) -> Self {
    self.status = status;
    self
  }

  pub fn answer(&self) -> Option<i64> {
    self.problem.as_ref().and_then(|p| p.answer)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn difficulty_thresholds() {
    assert_eq!(Difficulty::from_answer(Some(5)), Difficulty::Easy);
    assert_eq!(Difficulty::from_answer(Some(6)), Difficulty::Medium);
    assert_eq!(Difficulty::from_answer(Some(10)), Difficulty::Medium);
    assert_eq!(Difficulty::from_answer(Some(11)), Difficulty::Hard);
    assert_eq!(Difficulty::from_answer(None), Difficulty::Unknown);
  }

  #[test]
  fn normalized_fills_answer_and_caps_hints() {
    let p = RecognizedProblem {
      kind: ProblemKind::Subtraction,
      operands: vec![9, 4],
      hints: (0..8).map(|i| format!("hint {}", i)).collect(),
      confidence: 3.0,
      ..Default::default()
    }
    .normalized();
    assert_eq!(p.answer, Some(5));
    assert_eq!(p.difficulty, Difficulty::Easy);
    assert_eq!(p.hints.len(), MAX_HINTS);
    assert_eq!(p.confidence, 1.0);
  }

  #[test]
  fn confidence_scale_is_normalized() {
    assert!((normalize_confidence(85.0) - 0.85).abs() < 1e-6);
    assert!((normalize_confidence(0.4) - 0.4).abs() < 1e-6);
    assert_eq!(normalize_confidence(-2.0), 0.0);
    assert_eq!(normalize_confidence(250.0), 1.0);
  }

  #[test]
  fn provider_ids_parse_from_aliases() {
    assert_eq!("Claude".parse::<ProviderId>(), Ok(ProviderId::Anthropic));
    assert_eq!("openai".parse::<ProviderId>(), Ok(ProviderId::OpenAi));
    assert!("together".parse::<ProviderId>().is_err());
    assert_eq!(serde_json::to_string(&ProviderId::OpenAi).unwrap(), "\"openai\"");
  }

  #[test]
  fn problem_serializes_camel_case() {
    let p = RecognizedProblem {
      kind: ProblemKind::Addition,
      problem_text: "How many?".into(),
      visual_description: Some(VisualDescription { object_label: "frog".into(), counts_by_side: vec![3, 4], arrangement: String::new() }),
      ..Default::default()
    };
    let v = serde_json::to_value(&p).unwrap();
    assert_eq!(v["problemText"], "How many?");
    assert_eq!(v["visualDescription"]["objectLabel"], "frog");
    assert_eq!(v["kind"], "addition");
  }
}
