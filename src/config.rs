//! Loading service configuration (prompts, provider order, extraction
//! vocabulary, scoring knobs, hint templates) from TOML.
//!
//! Every section is optional; missing sections fall back to defaults.
//! See `AppConfig` for the expected schema.

use serde::Deserialize;
use tracing::{error, info};

use crate::domain::ProviderId;

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
  pub prompts: Prompts,
  pub providers: ProvidersCfg,
  pub extraction: ExtractionCfg,
  pub scoring: ScoringCfg,
  pub hints: HintTemplates,
  pub server: ServerCfg,
}

/// Prompts sent alongside the image. The JSON prompts ask for the canonical
/// schema; the free-text prompt asks for labeled lines the extractor can read.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub json_vision: String,
  pub counting_vision: String,
  pub free_text_vision: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      json_vision: r#"You are an expert at reading first-grade math worksheets.
Look at the picture and work out the arithmetic problem it shows.

Steps:
1. Identify the objects drawn (frogs, apples, balls, ...).
2. Count the objects on the left half and on the right half separately. Never count an object twice.
3. Write the expression and compute the answer.
4. Write up to 5 hints for a young child, from least to most revealing, based on what is actually in the picture.

Reply ONLY with a JSON object:
{
  "type": "addition|subtraction|counting|comparison|unknown",
  "expression": "3 + 4",
  "problem": "short problem statement for the child",
  "numbers": [3, 4],
  "answer": 7,
  "concepts": ["counting", "addition"],
  "suggestedHints": ["...", "..."],
  "visualElements": { "objects": "frog", "count": [3, 4], "arrangement": "split left and right" },
  "confidence": 0.0-1.0
}"#
        .into(),
      counting_vision: r#"You are a math education expert. Count the objects in this picture exactly and build a kindergarten arithmetic problem.

Split the picture vertically in half. Count the left side one by one, then the right side one by one.
Do not guess: count only what is visible. If you are unsure, lower the confidence.

Reply ONLY with JSON:
{
  "objectType": "frog",
  "leftCount": 3,
  "rightCount": 4,
  "totalCount": 7,
  "mathExpression": "3 + 4",
  "answer": 7,
  "problemDescription": "How many frogs are there altogether?",
  "specificHints": ["hint based on the picture", "..."],
  "confidence": 0-100,
  "arrangement": "where the objects are"
}"#
        .into(),
      free_text_vision: r#"Analyze the arithmetic problem in this picture.
Count the animals or objects it contains.

Answer in this format:
- What you see (e.g. "2 cows on the left, 4 cows on the right")
- The question (e.g. "How many cows altogether?")
- Expression and answer (e.g. "2 + 4 = 6")"#
        .into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProvidersCfg {
  /// Enabled providers, highest priority first. Ties in reconciliation go to
  /// the earlier entry.
  pub priority: Vec<ProviderId>,
  /// Per-provider deadline; slower calls count as transport failures.
  pub timeout_secs: u64,
}

impl Default for ProvidersCfg {
  fn default() -> Self {
    Self { priority: vec![ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Gemini], timeout_secs: 30 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ExtractionCfg {
  /// Object names recognized in free text (case-insensitive).
  pub object_vocabulary: Vec<String>,
  pub default_object_label: String,
}

impl Default for ExtractionCfg {
  fn default() -> Self {
    let words = [
      "カエル", "かえる", "りんご", "リンゴ", "ボール", "ブロック", "図形", "牛", "いぬ", "ねこ", "とり", "はな", "ほし",
      "frog", "apple", "ball", "block", "cow", "dog", "cat", "bird", "flower", "star", "car",
    ];
    Self {
      object_vocabulary: words.iter().map(|s| s.to_string()).collect(),
      default_object_label: "もの".into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ScoringCfg {
  pub baseline: f32,
  pub consistency_bonus: f32,
  pub operator_bonus: f32,
  pub specific_hint_bonus: f32,
  /// Hints shorter than this (in chars) are not "specific".
  pub min_specific_hint_chars: usize,
  /// Filler phrases that make a hint generic.
  pub generic_hint_phrases: Vec<String>,
}

impl Default for ScoringCfg {
  fn default() -> Self {
    let phrases = ["一緒に", "いっしょに", "がんばって", "let's count together", "try your best", "good luck", "you can do it"];
    Self {
      baseline: 0.5,
      consistency_bonus: 0.3,
      operator_bonus: 0.2,
      specific_hint_bonus: 0.1,
      min_specific_hint_chars: 8,
      generic_hint_phrases: phrases.iter().map(|s| s.to_string()).collect(),
    }
  }
}

/// Hint templates used to rebuild the winner's hints. Placeholders:
/// `{object}`, `{left}`, `{right}`, `{expression}`, `{answer}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HintTemplates {
  pub look: String,
  pub sides: String,
  pub count_each: String,
  pub expression: String,
  pub make_expression: String,
  pub answer: String,
  pub encourage: String,
  pub fingers: String,
}

impl Default for HintTemplates {
  fn default() -> Self {
    Self {
      look: "画像をよく見て、{object}を探してみよう！".into(),
      sides: "左に{left}個、右に{right}個の{object}があるね".into(),
      count_each: "{object}を1つずつ数えてみよう".into(),
      expression: "式にすると「{expression}」だよ".into(),
      make_expression: "数式を作ってみよう".into(),
      answer: "答えは{answer}個だね！正解できるかな？".into(),
      encourage: "がんばって数えてみよう".into(),
      fingers: "指を使って一緒に数えてもいいよ！".into(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerCfg {
  /// Upper bound on request bodies (base64 photos are large).
  pub max_body_bytes: usize,
}

impl Default for ServerCfg {
  fn default() -> Self {
    Self { max_body_bytes: 12 * 1024 * 1024 }
  }
}

pub fn parse_config(s: &str) -> Result<AppConfig, toml::de::Error> {
  toml::from_str::<AppConfig>(s)
}

/// Attempt to load `AppConfig` from TUTOR_CONFIG_PATH. On any parsing/IO error, returns None.
pub fn load_config_from_env() -> Option<AppConfig> {
  let path = std::env::var("TUTOR_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_config(&s) {
      Ok(cfg) => {
        info!(target: "kazoeru_backend", %path, "Loaded tutor config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "kazoeru_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "kazoeru_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_toml_yields_defaults() {
    let cfg = parse_config("").unwrap();
    assert_eq!(cfg.providers.priority, vec![ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Gemini]);
    assert_eq!(cfg.providers.timeout_secs, 30);
    assert!(cfg.extraction.object_vocabulary.iter().any(|w| w == "かえる"));
  }

  #[test]
  fn partial_sections_override_only_given_keys() {
    let cfg = parse_config(
      r#"
[providers]
priority = ["gemini", "anthropic"]

[hints]
fingers = "Use your fingers!"

[extraction]
default_object_label = "things"
"#,
    )
    .unwrap();
    assert_eq!(cfg.providers.priority, vec![ProviderId::Gemini, ProviderId::Anthropic]);
    assert_eq!(cfg.providers.timeout_secs, 30);
    assert_eq!(cfg.hints.fingers, "Use your fingers!");
    assert_eq!(cfg.hints.look, HintTemplates::default().look);
    assert_eq!(cfg.extraction.default_object_label, "things");
    assert!(!cfg.extraction.object_vocabulary.is_empty());
  }

  #[test]
  fn unknown_provider_is_rejected() {
    assert!(parse_config("[providers]\npriority = [\"together\"]").is_err());
  }
}
