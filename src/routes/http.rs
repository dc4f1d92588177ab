//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and maps domain errors onto status codes.

use std::sync::Arc;
use axum::{extract::{Path, Query, State}, http::StatusCode, response::{IntoResponse, Response}, Json};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{AnalyzeError, FailureClass, PracticeError};
use crate::logic::*;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, providers: state.provider_status() })
}

#[instrument(level = "info", skip(state, body), fields(image_len = body.image.len()))]
pub async fn http_post_analyze(State(state): State<Arc<AppState>>, Json(body): Json<AnalyzeIn>) -> Response {
  analyze_response(&state, &body.image, None).await
}

#[instrument(level = "info", skip(state, body), fields(image_len = body.image.len()))]
pub async fn http_post_analyze_one(
  State(state): State<Arc<AppState>>,
  Path(provider): Path<String>,
  Json(body): Json<AnalyzeIn>,
) -> Response {
  analyze_response(&state, &body.image, Some(&provider)).await
}

async fn analyze_response(state: &AppState, image: &str, provider: Option<&str>) -> Response {
  let request_id = Uuid::new_v4().to_string();
  match analyze_image(state, &request_id, image, provider).await {
    Ok(ok) => Json(ok).into_response(),
    Err(e) => {
      let status = analyze_status(&e);
      info!(target: "vision", %request_id, status = status.as_u16(), error = %e, "analysis failed");
      (status, Json(AnalyzeFail::new(&request_id, &e))).into_response()
    }
  }
}

/// 400 bad image, 404 unknown provider, 503 capacity, 500 configuration, 502 otherwise.
pub fn analyze_status(e: &AnalyzeError) -> StatusCode {
  match e {
    AnalyzeError::InvalidImage(_) => StatusCode::BAD_REQUEST,
    AnalyzeError::UnknownProvider(_) => StatusCode::NOT_FOUND,
    AnalyzeError::AllProvidersFailed { class, .. } => match class {
      FailureClass::Capacity => StatusCode::SERVICE_UNAVAILABLE,
      FailureClass::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
      FailureClass::Generic => StatusCode::BAD_GATEWAY,
    },
  }
}

fn practice_error(e: PracticeError) -> Response {
  (StatusCode::BAD_REQUEST, Json(ErrorOut { error: e.to_string() })).into_response()
}

#[instrument(level = "info", fields(level = ?q.level))]
pub async fn http_get_practice(Query(q): Query<PracticeQuery>) -> Response {
  match new_practice(q.level) {
    Ok(p) => Json(p).into_response(),
    Err(e) => practice_error(e),
  }
}

#[instrument(level = "info", skip(body), fields(student = body.student_answer, correct = body.correct_answer))]
pub async fn http_post_answer(Json(body): Json<AnswerIn>) -> impl IntoResponse {
  Json(evaluate_answer(body.student_answer, body.correct_answer, body.hints_used))
}

#[instrument(level = "info", fields(a = q.a, b = q.b))]
pub async fn http_get_hints(Query(q): Query<HintLadderQuery>) -> Response {
  match ladder_for(q.a, q.b) {
    Ok(hints) => Json(HintLadderOut { hints }).into_response(),
    Err(e) => practice_error(e),
  }
}
