//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - Analyzing a worksheet photo (all providers, or one by name)
//!   - Practice problems, answer checking and the hint ladder

use tracing::{info, instrument, warn};

use crate::domain::ProviderId;
use crate::error::{AnalyzeError, PracticeError};
use crate::hints::{hint_ladder, HintStep};
use crate::practice::{check_answer, practice_problem, AnswerFeedback, PracticeProblem};
use crate::protocol::AnalyzeOk;
use crate::providers::ImagePayload;
use crate::state::AppState;

pub const DEFAULT_PRACTICE_LEVEL: u8 = 1;

#[instrument(level = "info", skip(state, request_id, image), fields(%request_id, image_len = image.len()))]
pub async fn analyze_image(
  state: &AppState,
  request_id: &str,
  image: &str,
  provider: Option<&str>,
) -> Result<AnalyzeOk, AnalyzeError> {
  let payload = ImagePayload::parse(image).inspect_err(|e| {
    warn!(target: "vision", %request_id, error = %e, "rejected image payload");
  })?;

  let reconciled = match provider {
    None => state.reconciler.reconcile(&payload).await?,
    Some(name) => {
      let id = name.parse::<ProviderId>().map_err(|_| AnalyzeError::UnknownProvider(name.to_string()))?;
      state.reconciler.analyze_single(id, &payload).await?
    }
  };

  info!(
    target: "vision",
    %request_id,
    winner = %reconciled.winner,
    answer = ?reconciled.problem.answer,
    consensus = reconciled.consensus,
    "analysis complete"
  );
  Ok(AnalyzeOk::new(request_id, reconciled))
}

#[instrument(level = "info")]
pub fn new_practice(level: Option<u8>) -> Result<PracticeProblem, PracticeError> {
  let level = level.unwrap_or(DEFAULT_PRACTICE_LEVEL);
  let problem = practice_problem(&mut rand::thread_rng(), level)?;
  info!(target: "tutor", level, id = problem.id, "practice problem served");
  Ok(problem)
}

#[instrument(level = "info")]
pub fn evaluate_answer(student_answer: i64, correct_answer: i64, hints_used: Option<u32>) -> AnswerFeedback {
  let feedback = check_answer(&mut rand::thread_rng(), student_answer, correct_answer);
  info!(target: "tutor", correct = feedback.is_correct, hints_used = hints_used.unwrap_or(0), "answer checked");
  feedback
}

#[instrument(level = "info")]
pub fn ladder_for(a: u32, b: u32) -> Result<Vec<HintStep>, PracticeError> {
  hint_ladder(a, b)
}
