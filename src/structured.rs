//! Structured parsing of vendor replies.
//!
//! Vendor JSON is untrusted and schema-less: the prompts ask for slightly
//! different shapes and models answer with whatever keys they like. We parse
//! into `serde_json::Value` and convert field by field, accepting the known
//! aliases. A reply with no JSON object, or with none of the known fields, is
//! an error so the caller can fall back to free-text extraction.

use serde_json::{Map, Value};

use crate::domain::{
  concepts_for, normalize_confidence, render_expression, ProblemKind, RecognizedProblem, VisualDescription,
};
use crate::util::find_json_object;

/// Confidence ceiling for a structural parse that yielded no operands.
pub const EMPTY_OPERANDS_CONFIDENCE: f32 = 0.2;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StructuredError {
  #[error("no JSON object in reply")]
  NoJsonObject,
  #[error("invalid JSON: {0}")]
  InvalidJson(String),
  #[error("JSON object has none of the expected fields")]
  NoKnownFields,
}

const KIND_KEYS: &[&str] = &["type", "problemType", "問題の種類"];
const OPERAND_KEYS: &[&str] = &["numbers", "operands"];
const SIDE_KEYS: &[(&str, &str)] = &[("leftCount", "rightCount"), ("左側の数", "右側の数")];
const ANSWER_KEYS: &[&str] = &["answer", "totalCount", "合計"];
const EXPRESSION_KEYS: &[&str] = &["expression", "mathExpression", "数式"];
const PROBLEM_KEYS: &[&str] = &["problem", "problemText", "problemDescription"];
const HINT_KEYS: &[&str] = &["suggestedHints", "specificHints", "hints", "具体的なヒント"];
const OBJECT_KEYS: &[&str] = &["objectType", "見えるもの"];
const CONCEPT_KEYS: &[&str] = &["concepts"];

fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
  keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

/// A count may come back as 3, 3.0 or "3".
fn as_count(v: &Value) -> Option<u32> {
  match v {
    Value::Number(n) => n
      .as_u64()
      .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
      .and_then(|n| u32::try_from(n).ok()),
    Value::String(s) => s.trim().parse::<u32>().ok(),
    _ => None,
  }
}

fn as_int(v: &Value) -> Option<i64> {
  match v {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
    Value::String(s) => s.trim().parse::<i64>().ok(),
    _ => None,
  }
}

fn as_text(v: &Value) -> Option<String> {
  match v {
    Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
    _ => None,
  }
}

fn as_strings(v: &Value) -> Vec<String> {
  match v {
    Value::Array(items) => items.iter().filter_map(as_text).collect(),
    Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
    _ => Vec::new(),
  }
}

fn as_confidence(v: &Value) -> Option<f32> {
  match v {
    Value::Number(n) => n.as_f64().map(normalize_confidence),
    Value::String(s) => s.trim().trim_end_matches('%').parse::<f64>().ok().map(normalize_confidence),
    _ => None,
  }
}

fn operands_of(obj: &Map<String, Value>) -> Option<Vec<u32>> {
  if let Some(Value::Array(items)) = first(obj, OPERAND_KEYS) {
    return Some(items.iter().filter_map(as_count).collect());
  }
  SIDE_KEYS.iter().find_map(|(l, r)| {
    let left = obj.get(*l).and_then(as_count)?;
    let right = obj.get(*r).and_then(as_count)?;
    Some(vec![left, right])
  })
}

fn infer_kind(expression: &str, operands: &[u32]) -> ProblemKind {
  match operands.len() {
    0 => ProblemKind::Unknown,
    1 => ProblemKind::Counting,
    _ if expression.contains('-') || expression.contains('−') => ProblemKind::Subtraction,
    _ => ProblemKind::Addition,
  }
}

/// Parse a vendor reply as structured JSON.
///
/// `default_confidence` is used when the vendor did not report one;
/// `default_label` when no object name is present.
pub fn parse_structured(
  text: &str,
  default_confidence: f32,
  default_label: &str,
) -> Result<RecognizedProblem, StructuredError> {
  let raw = find_json_object(text).ok_or(StructuredError::NoJsonObject)?;
  let value: Value = serde_json::from_str(raw).map_err(|e| StructuredError::InvalidJson(e.to_string()))?;
  let obj = value.as_object().ok_or(StructuredError::NoJsonObject)?;

  let visual = obj.get("visualElements").and_then(Value::as_object);
  let operands = operands_of(obj);
  let answer = first(obj, ANSWER_KEYS).and_then(as_int);
  let expression = first(obj, EXPRESSION_KEYS).and_then(as_text);
  let object = first(obj, OBJECT_KEYS)
    .and_then(as_text)
    .or_else(|| visual.and_then(|v| v.get("objects")).and_then(as_text));

  if operands.is_none() && answer.is_none() && expression.is_none() && object.is_none() {
    return Err(StructuredError::NoKnownFields);
  }

  let operands = operands.unwrap_or_default();
  let kind = first(obj, KIND_KEYS)
    .and_then(as_text)
    .map(|s| ProblemKind::parse_loose(&s))
    .filter(|k| *k != ProblemKind::Unknown)
    .unwrap_or_else(|| infer_kind(expression.as_deref().unwrap_or(""), &operands));

  let label = object.unwrap_or_else(|| default_label.to_string());
  let arrangement = first(obj, &["arrangement"])
    .and_then(as_text)
    .or_else(|| visual.and_then(|v| v.get("arrangement")).and_then(as_text))
    .unwrap_or_default();
  let counts_by_side = visual
    .and_then(|v| v.get("count"))
    .and_then(Value::as_array)
    .map(|items| items.iter().filter_map(as_count).collect::<Vec<_>>())
    .filter(|c| !c.is_empty())
    .unwrap_or_else(|| operands.clone());

  let mut concepts: std::collections::BTreeSet<String> =
    first(obj, CONCEPT_KEYS).map(as_strings).unwrap_or_default().into_iter().collect();
  if concepts.is_empty() {
    concepts = concepts_for(kind);
  }

  let mut confidence = first(obj, &["confidence"]).and_then(as_confidence).unwrap_or(default_confidence);
  if operands.is_empty() {
    confidence = confidence.min(EMPTY_OPERANDS_CONFIDENCE);
  }

  let problem = RecognizedProblem {
    kind,
    expression: expression.unwrap_or_else(|| render_expression(kind, &operands)),
    problem_text: first(obj, PROBLEM_KEYS)
      .and_then(as_text)
      .unwrap_or_else(|| format!("{}は全部でいくつかな？", label)),
    answer,
    concepts,
    hints: first(obj, HINT_KEYS).map(as_strings).unwrap_or_default(),
    visual_description: Some(VisualDescription { object_label: label, counts_by_side, arrangement }),
    operands,
    confidence,
    ..Default::default()
  };
  Ok(problem.normalized())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::Difficulty;

  #[test]
  fn canonical_schema() {
    let text = r#"Here you go:
```json
{"type":"addition","expression":"3 + 4","problem":"How many frogs?","numbers":[3,4],"answer":7,
 "concepts":["counting"],"suggestedHints":["Count the frogs on the left"],
 "visualElements":{"objects":"frog","count":[3,4],"arrangement":"two groups"},"confidence":0.8}
```"#;
    let p = parse_structured(text, 0.9, "もの").unwrap();
    assert_eq!(p.kind, ProblemKind::Addition);
    assert_eq!(p.operands, vec![3, 4]);
    assert_eq!(p.answer, Some(7));
    assert_eq!(p.difficulty, Difficulty::Medium);
    assert_eq!(p.object_label(), Some("frog"));
    assert_eq!(p.hints, vec!["Count the frogs on the left".to_string()]);
    assert!((p.confidence - 0.8).abs() < 1e-6);
  }

  #[test]
  fn left_right_dialect_with_percent_confidence() {
    let text = r#"{"objectType":"かえる","leftCount":"3","rightCount":4,"totalCount":7,
      "mathExpression":"3+4","answer":7,"confidence":85,"arrangement":"左右"}"#;
    let p = parse_structured(text, 0.8, "もの").unwrap();
    assert_eq!(p.operands, vec![3, 4]);
    assert_eq!(p.kind, ProblemKind::Addition);
    assert_eq!(p.expression, "3+4");
    assert!((p.confidence - 0.85).abs() < 1e-6);
    assert_eq!(p.visual_description.unwrap().arrangement, "左右");
  }

  #[test]
  fn japanese_key_dialect() {
    let text = r#"{"見えるもの":"りんご","左側の数":5,"右側の数":2,"合計":3,"数式":"5 - 2","問題の種類":"subtraction"}"#;
    let p = parse_structured(text, 0.9, "もの").unwrap();
    assert_eq!(p.kind, ProblemKind::Subtraction);
    assert_eq!(p.operands, vec![5, 2]);
    assert_eq!(p.answer, Some(3));
    assert_eq!(p.object_label(), Some("りんご"));
    assert!((p.confidence - 0.9).abs() < 1e-6);
  }

  #[test]
  fn missing_answer_is_computed_and_kind_inferred() {
    let p = parse_structured(r#"{"numbers":[6,2],"expression":"6 - 2"}"#, 0.7, "もの").unwrap();
    assert_eq!(p.kind, ProblemKind::Subtraction);
    assert_eq!(p.answer, Some(4));
  }

  #[test]
  fn structure_without_operands_is_degraded_not_error() {
    let p = parse_structured(r#"{"objectType":"ball","confidence":0.95}"#, 0.9, "もの").unwrap();
    assert!(p.operands.is_empty());
    assert_eq!(p.kind, ProblemKind::Unknown);
    assert!(p.confidence <= EMPTY_OPERANDS_CONFIDENCE);
  }

  #[test]
  fn unrelated_json_and_prose_fail() {
    assert_eq!(parse_structured(r#"{"foo": 1}"#, 0.9, "もの"), Err(StructuredError::NoKnownFields));
    assert_eq!(parse_structured("3 on the left", 0.9, "もの"), Err(StructuredError::NoJsonObject));
    assert!(matches!(parse_structured("{not json}", 0.9, "もの"), Err(StructuredError::InvalidJson(_))));
  }

  #[test]
  fn errors_render_as_log_reasons() {
    assert_eq!(StructuredError::NoJsonObject.to_string(), "no JSON object in reply");
    assert_eq!(StructuredError::InvalidJson("eof".into()).to_string(), "invalid JSON: eof");
    let boxed: Box<dyn std::error::Error> = Box::new(StructuredError::NoKnownFields);
    assert_eq!(boxed.to_string(), "JSON object has none of the expected fields");
  }
}
