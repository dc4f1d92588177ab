//! Confidence scoring from internally checkable signals.
//!
//! The score ranks candidates from different providers against each other;
//! it is not a calibrated probability.

use crate::config::ScoringCfg;
use crate::domain::{clamp_unit, ProblemKind, RecognizedProblem};

#[derive(Clone, Debug)]
pub struct ConfidenceScorer {
  cfg: ScoringCfg,
  generic_phrases: Vec<String>,
}

impl ConfidenceScorer {
  pub fn new(cfg: &ScoringCfg) -> Self {
    Self {
      generic_phrases: cfg.generic_hint_phrases.iter().map(|p| p.to_lowercase()).collect(),
      cfg: cfg.clone(),
    }
  }

  #[cfg(test)]
  pub fn baseline(&self) -> f32 {
    self.cfg.baseline
  }

  #[cfg(test)]
  pub fn consistency_bonus(&self) -> f32 {
    self.cfg.consistency_bonus
  }

  /// Score a problem in [0,1]. Pure: the same input always scores the same.
  pub fn score(&self, p: &RecognizedProblem) -> f32 {
    let mut score = self.cfg.baseline;
    if is_self_consistent(p) {
      score += self.cfg.consistency_bonus;
    }
    if operator_agrees(p) {
      score += self.cfg.operator_bonus;
    }
    if p.hints.iter().any(|h| self.is_specific(h)) {
      score += self.cfg.specific_hint_bonus;
    }
    clamp_unit(score)
  }

  /// Long enough and free of filler phrases.
  pub fn is_specific(&self, hint: &str) -> bool {
    let lower = hint.to_lowercase();
    hint.chars().count() >= self.cfg.min_specific_hint_chars
      && !self.generic_phrases.iter().any(|g| lower.contains(g.as_str()))
  }
}

/// Answer matches the first two operands combined per kind.
fn is_self_consistent(p: &RecognizedProblem) -> bool {
  match (p.answer, p.kind.combine(&p.operands)) {
    (Some(answer), Some(expected)) => answer == expected,
    _ => false,
  }
}

fn operator_agrees(p: &RecognizedProblem) -> bool {
  match p.kind {
    ProblemKind::Addition => p.expression.contains('+'),
    ProblemKind::Subtraction => p.expression.contains('-') || p.expression.contains('−'),
    _ => false,
  }
}
