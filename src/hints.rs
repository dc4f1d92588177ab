//! Hint generation from fixed templates.
//!
//! Hints for an analyzed picture are rebuilt from the problem's own fields so
//! their quality does not depend on which vendor supplied the numbers. The
//! ladder for practice problems follows the tutor's five-step script.

use serde::Serialize;

use crate::config::HintTemplates;
use crate::domain::RecognizedProblem;
use crate::error::PracticeError;
use crate::util::fill_template;

/// Largest operand the ladder will draw dots for.
pub const MAX_LADDER_OPERAND: u32 = 20;

#[derive(Clone, Debug)]
pub struct HintGenerator {
  templates: HintTemplates,
  default_label: String,
}

impl HintGenerator {
  pub fn new(templates: &HintTemplates, default_label: &str) -> Self {
    Self { templates: templates.clone(), default_label: default_label.to_string() }
  }

  /// Five hints, least to most revealing.
  pub fn generate(&self, p: &RecognizedProblem) -> Vec<String> {
    let t = &self.templates;
    let object = p.object_label().unwrap_or(&self.default_label).to_string();
    let left = p.operands.first().copied().unwrap_or(0);
    let right = p.operands.get(1).copied().unwrap_or(0);
    let (left_s, right_s) = (left.to_string(), right.to_string());
    let answer = p.answer.map(|a| a.to_string()).unwrap_or_default();
    let vars: [(&str, &str); 5] = [
      ("object", &object),
      ("left", &left_s),
      ("right", &right_s),
      ("expression", &p.expression),
      ("answer", &answer),
    ];

    let sides = if left > 0 && right > 0 { &t.sides } else { &t.count_each };
    let expression = if p.expression.trim().is_empty() { &t.make_expression } else { &t.expression };
    let reveal = if p.answer.is_some() { &t.answer } else { &t.encourage };

    [&t.look, sides, expression, reveal, &t.fingers]
      .iter()
      .map(|tpl| fill_template(tpl, &vars))
      .collect()
  }
}

/// One rung of the practice hint ladder.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct HintStep {
  pub level: u8,
  pub content: String,
  pub visual: Option<String>,
}

/// Five level-indexed hints for `a + b`, each with an optional visual aid.
pub fn hint_ladder(a: u32, b: u32) -> Result<Vec<HintStep>, PracticeError> {
  if let Some(big) = [a, b].into_iter().find(|n| *n > MAX_LADDER_OPERAND) {
    return Err(PracticeError::OperandTooLarge(big));
  }
  let answer = a + b;
  let count_on: Vec<String> = (1..=b).map(|i| (a + i).to_string()).collect();
  Ok(vec![
    HintStep { level: 1, content: format!("{}と{}をたしてみよう！", a, b), visual: None },
    HintStep {
      level: 2,
      content: format!("{}からかぞえてみよう。", a),
      visual: Some(format!("{}から：{}", a, count_on.join(", "))),
    },
    HintStep {
      level: 3,
      content: "ゆびでかぞえてみよう！".into(),
      visual: Some(format!("👆 {} + {}", "🟡".repeat(a as usize), "🔵".repeat(b as usize))),
    },
    HintStep {
      level: 4,
      content: "ぜんぶでいくつかな？".into(),
      visual: Some(format!("{} + {} = {}", "●".repeat(a as usize), "●".repeat(b as usize), "●".repeat(answer as usize))),
    },
    HintStep { level: 5, content: format!("こたえは{}だよ！", answer), visual: Some(format!("{} + {} = {}", a, b, answer)) },
  ])
}
