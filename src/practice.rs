//! Practice problems by level and answer checking with tutor feedback.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::domain::ProblemKind;
use crate::error::PracticeError;

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PracticeProblem {
  pub id: u32,
  pub num1: u32,
  pub num2: u32,
  pub answer: u32,
  pub level: u8,
  pub category: ProblemKind,
}

/// Operand ranges per level: 1 → 1-5 + 1-5, 2 → 1-10 + 1-5, 3 → 1-10 + 1-10.
fn ranges(level: u8) -> Result<((u32, u32), (u32, u32)), PracticeError> {
  match level {
    1 => Ok(((1, 5), (1, 5))),
    2 => Ok(((1, 10), (1, 5))),
    3 => Ok(((1, 10), (1, 10))),
    other => Err(PracticeError::InvalidLevel(other)),
  }
}

pub fn practice_problem<R: Rng + ?Sized>(rng: &mut R, level: u8) -> Result<PracticeProblem, PracticeError> {
  let ((lo1, hi1), (lo2, hi2)) = ranges(level)?;
  let num1 = rng.gen_range(lo1..=hi1);
  let num2 = rng.gen_range(lo2..=hi2);
  Ok(PracticeProblem {
    id: rng.gen_range(10_000..=99_999),
    num1,
    num2,
    answer: num1 + num2,
    level,
    category: ProblemKind::Addition,
  })
}

const PRAISE: &[&str] = &[
  "せいかい！とてもよくできたね！",
  "すばらしい！がんばったね！",
  "やったね！せいかいだよ！",
  "すごい！かしこいね！",
];

const ENCOURAGE: &[&str] = &[
  "ちがうね。でも、だいじょうぶだよ！",
  "まちがえちゃった。もういちどがんばろう！",
  "そうじゃないね。ヒントをみてみよう！",
  "おしい！もうすこしかんがえてみて！",
];

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerFeedback {
  pub is_correct: bool,
  pub feedback: String,
  pub stars_earned: u32,
}

pub fn check_answer<R: Rng + ?Sized>(rng: &mut R, student_answer: i64, correct_answer: i64) -> AnswerFeedback {
  let is_correct = student_answer == correct_answer;
  let pool = if is_correct { PRAISE } else { ENCOURAGE };
  let feedback = pool.choose(rng).copied().unwrap_or_default().to_string();
  AnswerFeedback { is_correct, feedback, stars_earned: u32::from(is_correct) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  #[test]
  fn levels_stay_in_range() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..200 {
      let p = practice_problem(&mut rng, 2).unwrap();
      assert!((1..=10).contains(&p.num1));
      assert!((1..=5).contains(&p.num2));
      assert_eq!(p.answer, p.num1 + p.num2);
      assert!((10_000..=99_999).contains(&p.id));
    }
  }

  #[test]
  fn unknown_level_is_rejected() {
    let mut rng = StdRng::seed_from_u64(1);
    assert_eq!(practice_problem(&mut rng, 0), Err(PracticeError::InvalidLevel(0)));
    assert_eq!(practice_problem(&mut rng, 4), Err(PracticeError::InvalidLevel(4)));
  }

  #[test]
  fn feedback_matches_correctness() {
    let mut rng = StdRng::seed_from_u64(3);
    let ok = check_answer(&mut rng, 7, 7);
    assert!(ok.is_correct);
    assert_eq!(ok.stars_earned, 1);
    assert!(PRAISE.contains(&ok.feedback.as_str()));

    let miss = check_answer(&mut rng, 6, 7);
    assert!(!miss.is_correct);
    assert_eq!(miss.stars_earned, 0);
    assert!(ENCOURAGE.contains(&miss.feedback.as_str()));
  }
}
