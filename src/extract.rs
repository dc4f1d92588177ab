//! Free-text extraction: derive an approximate problem from a model reply
//! that did not come back as JSON.
//!
//! Extraction is an ordered list of named rules. Each rule is a pure function
//! that either matches and returns its evidence or does not match. The first
//! matching rule wins, so a stronger rule is never overridden by a weaker one:
//!
//! 1. `explicit_statement` : `3 + 4 = 7`
//! 2. `positional_counts`  : `左に3匹、右に4匹`, `3 on the left, 4 on the right`
//! 3. `first_two_integers` : any two numbers, read as an addition
//! 4. `single_integer`     : exactly one number, read as counting
//!
//! No rule matching means no digits at all; the result is an empty,
//! `unknown` problem. Numbers are never made up.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::config::ExtractionCfg;
use crate::domain::{concepts_for, render_expression, ProblemKind, RecognizedProblem, VisualDescription};
use crate::util::normalize_fullwidth;

/// What a matching rule found.
#[derive(Clone, Debug, PartialEq)]
pub struct Evidence {
  pub kind: ProblemKind,
  pub operands: Vec<u32>,
  pub stated_answer: Option<i64>,
  /// Whether operands are left/right counts.
  pub positional: bool,
}

pub struct ExtractionRule {
  pub name: &'static str,
  pub confidence: f32,
  apply: fn(&str) -> Option<Evidence>,
}

impl ExtractionRule {
  pub fn apply(&self, text: &str) -> Option<Evidence> {
    (self.apply)(text)
  }
}

/// Rules in precedence order.
pub static RULES: [ExtractionRule; 4] = [
  ExtractionRule { name: "explicit_statement", confidence: 0.7, apply: explicit_statement },
  ExtractionRule { name: "positional_counts", confidence: 0.6, apply: positional_counts },
  ExtractionRule { name: "first_two_integers", confidence: 0.4, apply: first_two_integers },
  ExtractionRule { name: "single_integer", confidence: 0.4, apply: single_integer },
];

const NO_MATCH_CONFIDENCE: f32 = 0.1;

static STATEMENT_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(\d+)\s*([+\-])\s*(\d+)(?:\s*=\s*(\d+))?").expect("valid statement regex"));

static INTEGER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid integer regex"));

static LEFT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| side_patterns("左", "left"));
static RIGHT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| side_patterns("右", "right"));

/// Patterns for one side, tried in order. Japanese puts the keyword before the
/// count; English labels do too, but prose puts the count first.
fn side_patterns(ja: &str, en: &str) -> Vec<Regex> {
  [
    format!(r"{}[^\d\n]{{0,8}}?(\d+)", ja),
    format!(r"(?i)\b{}[\s_-]*(?:side|count|hand)?\s*[:=]\s*(\d+)", en),
    format!(r"(?i)(\d+)\s+(?:[a-z]+\s+){{0,3}}?on\s+the\s+{}\b", en),
    format!(r"(?i)\b{}\b[^\d\n.]{{0,24}}?(\d+)", en),
  ]
  .iter()
  .map(|p| Regex::new(p).expect("valid side regex"))
  .collect()
}

fn parse_count(s: &str) -> Option<u32> {
  s.parse::<u32>().ok()
}

fn explicit_statement(text: &str) -> Option<Evidence> {
  STATEMENT_RE.captures_iter(text).find_map(|caps| {
    let a = parse_count(caps.get(1)?.as_str())?;
    let b = parse_count(caps.get(3)?.as_str())?;
    let kind = if caps.get(2)?.as_str() == "-" { ProblemKind::Subtraction } else { ProblemKind::Addition };
    let stated_answer = caps.get(4).and_then(|m| m.as_str().parse::<i64>().ok());
    Some(Evidence { kind, operands: vec![a, b], stated_answer, positional: false })
  })
}

/// First match of each pattern as `(position, count)`, in pattern order.
fn side_candidates(text: &str, patterns: &[Regex]) -> Vec<(usize, u32)> {
  patterns
    .iter()
    .filter_map(|re| re.captures(text).and_then(|c| c.get(1)))
    .filter_map(|m| parse_count(m.as_str()).map(|n| (m.start(), n)))
    .collect()
}

/// A number read for one side can never also be the other side's count.
fn positional_counts(text: &str) -> Option<Evidence> {
  let lefts = side_candidates(text, &LEFT_RES);
  let rights = side_candidates(text, &RIGHT_RES);
  let (left, right) = lefts
    .iter()
    .find_map(|&(lpos, l)| rights.iter().find(|&&(rpos, _)| rpos != lpos).map(|&(_, r)| (l, r)))?;
  Some(Evidence { kind: ProblemKind::Addition, operands: vec![left, right], stated_answer: None, positional: true })
}

fn integers(text: &str) -> Vec<u32> {
  INTEGER_RE.find_iter(text).filter_map(|m| parse_count(m.as_str())).collect()
}

fn first_two_integers(text: &str) -> Option<Evidence> {
  let nums = integers(text);
  if nums.len() < 2 {
    return None;
  }
  Some(Evidence { kind: ProblemKind::Addition, operands: nums[..2].to_vec(), stated_answer: None, positional: false })
}

fn single_integer(text: &str) -> Option<Evidence> {
  match integers(text).as_slice() {
    [n] => Some(Evidence { kind: ProblemKind::Counting, operands: vec![*n], stated_answer: Some(*n as i64), positional: false }),
    _ => None,
  }
}

/// Outcome of a free-text extraction.
#[derive(Clone, Debug)]
pub struct Extraction {
  pub problem: RecognizedProblem,
  /// Name of the rule that matched; `None` when the text had no numbers.
  pub rule: Option<&'static str>,
}

#[derive(Clone, Debug)]
pub struct FreeTextExtractor {
  vocabulary: Vec<String>,
  default_label: String,
}

impl FreeTextExtractor {
  pub fn new(cfg: &ExtractionCfg) -> Self {
    Self {
      vocabulary: cfg.object_vocabulary.iter().map(|w| w.to_lowercase()).filter(|w| !w.is_empty()).collect(),
      default_label: cfg.default_object_label.clone(),
    }
  }

  /// Vocabulary word occurring earliest in the text (longest on ties).
  pub fn object_label(&self, text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    self
      .vocabulary
      .iter()
      .filter_map(|w| lower.find(w.as_str()).map(|pos| (pos, w)))
      .min_by(|(pa, wa), (pb, wb)| pa.cmp(pb).then(wb.len().cmp(&wa.len())))
      .map(|(_, w)| w.clone())
  }

  pub fn default_label(&self) -> &str {
    &self.default_label
  }

  pub fn extract(&self, raw: &str) -> Extraction {
    let text = normalize_fullwidth(raw);
    let label = self.object_label(&text).unwrap_or_else(|| self.default_label.clone());

    let matched = RULES.iter().find_map(|rule| rule.apply(&text).map(|ev| (rule, ev)));
    let Some((rule, ev)) = matched else {
      debug!(target: "vision", "free-text extraction found no numbers");
      let problem = RecognizedProblem {
        kind: ProblemKind::Unknown,
        problem_text: "画像の問題を確認しています".into(),
        visual_description: Some(VisualDescription {
          object_label: label,
          counts_by_side: Vec::new(),
          arrangement: String::new(),
        }),
        confidence: NO_MATCH_CONFIDENCE,
        ..Default::default()
      };
      return Extraction { problem: problem.normalized(), rule: None };
    };

    debug!(target: "vision", rule = rule.name, operands = ?ev.operands, "free-text extraction matched");
    let problem_text = match ev.kind {
      ProblemKind::Subtraction => format!("{}はいくつ残るかな？", label),
      ProblemKind::Counting => format!("{}はいくつあるかな？", label),
      _ => format!("{}は全部でいくつかな？", label),
    };
    let arrangement = if ev.positional { "左右に分かれて配置" } else { "画像内に配置" };
    let problem = RecognizedProblem {
      kind: ev.kind,
      expression: render_expression(ev.kind, &ev.operands),
      problem_text,
      answer: ev.stated_answer.or_else(|| ev.kind.combine(&ev.operands)),
      concepts: concepts_for(ev.kind),
      visual_description: Some(VisualDescription {
        object_label: label,
        counts_by_side: ev.operands.clone(),
        arrangement: arrangement.into(),
      }),
      operands: ev.operands,
      confidence: rule.confidence,
      ..Default::default()
    };
    Extraction { problem: problem.normalized(), rule: Some(rule.name) }
  }
}
