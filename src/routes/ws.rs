//! WebSocket upgrade + message loop. Each client message is parsed as JSON and
//! forwarded to core logic. We reply with a single JSON message per request.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::logic::*;
use crate::protocol::{AnalyzeFail, ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

#[instrument(level = "info", skip(ws, state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "kazoeru_backend", "WebSocket upgrade requested");
  let max = state.config.server.max_body_bytes;
  ws.max_message_size(max).on_upgrade(move |socket| handle_ws(socket, state))
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "kazoeru_backend", "WebSocket connected");
  while let Some(Ok(msg)) = socket.recv().await {
    match msg {
      Message::Text(txt) => {
        let reply_msg = match serde_json::from_str::<ClientWsMessage>(&txt) {
          Ok(incoming) => handle_client_ws(incoming, &state).await,
          Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
        };

        let out = serde_json::to_string(&reply_msg).unwrap_or_else(|e| {
          serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
        });

        if let Err(e) = socket.send(Message::Text(out)).await {
          error!(target: "kazoeru_backend", error = %e, "WS send error");
          break;
        }
      }
      Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
      Message::Close(_) => break,
      _ => {}
    }
  }
  info!(target: "kazoeru_backend", "WebSocket disconnected");
}

#[instrument(level = "info", skip(msg, state))]
pub(crate) async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  match msg {
    ClientWsMessage::Ping => ServerWsMessage::Pong,

    ClientWsMessage::AnalyzeImage { image, provider } => {
      let request_id = Uuid::new_v4().to_string();
      debug!(target: "vision", %request_id, image_len = image.len(), "WS analyze_image received");
      match analyze_image(state, &request_id, &image, provider.as_deref()).await {
        Ok(result) => ServerWsMessage::Analysis { result },
        Err(e) => ServerWsMessage::AnalysisError { error: AnalyzeFail::new(&request_id, &e) },
      }
    }

    ClientWsMessage::Practice { level } => match new_practice(level) {
      Ok(problem) => ServerWsMessage::Practice { problem },
      Err(e) => ServerWsMessage::Error { message: e.to_string() },
    },

    ClientWsMessage::CheckAnswer { student_answer, correct_answer, hints_used } => {
      ServerWsMessage::AnswerResult { feedback: evaluate_answer(student_answer, correct_answer, hints_used) }
    }

    ClientWsMessage::HintLadder { a, b } => match ladder_for(a, b) {
      Ok(hints) => ServerWsMessage::HintLadder { hints },
      Err(e) => ServerWsMessage::Error { message: e.to_string() },
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::AppConfig;
  use crate::domain::ProviderId;
  use crate::providers::testing::ScriptedProvider;
  use crate::providers::ProviderSlot;
  use crate::reconcile::Reconciler;

  fn state() -> AppState {
    let cfg = AppConfig::default();
    let slot = ProviderSlot::configured(Arc::new(ScriptedProvider::ok(ProviderId::Gemini, "左に2匹、右に3匹")));
    let reconciler = Reconciler::new(&cfg, vec![slot]);
    AppState::with_reconciler(cfg, reconciler)
  }

  fn parse(json: &str) -> ClientWsMessage {
    serde_json::from_str(json).unwrap()
  }

  #[tokio::test]
  async fn ping_and_practice() {
    let st = state();
    let pong = handle_client_ws(parse(r#"{"type":"ping"}"#), &st).await;
    assert_eq!(serde_json::to_value(&pong).unwrap()["type"], "pong");

    let reply = handle_client_ws(parse(r#"{"type":"practice","level":3}"#), &st).await;
    let v = serde_json::to_value(&reply).unwrap();
    assert_eq!(v["type"], "practice");
    assert_eq!(v["problem"]["level"], 3);
  }

  #[tokio::test]
  async fn check_answer_flattens_feedback() {
    let reply = handle_client_ws(
      parse(r#"{"type":"check_answer","studentAnswer":5,"correctAnswer":5,"hintsUsed":2}"#),
      &state(),
    )
    .await;
    let v = serde_json::to_value(&reply).unwrap();
    assert_eq!(v["type"], "answer_result");
    assert_eq!(v["isCorrect"], true);
    assert_eq!(v["starsEarned"], 1);
  }

  #[tokio::test]
  async fn analyze_image_over_ws() {
    let msg = parse(r#"{"type":"analyze_image","image":"data:image/png;base64,iVBORw0KGgo="}"#);
    let v = serde_json::to_value(&handle_client_ws(msg, &state()).await).unwrap();
    assert_eq!(v["type"], "analysis");
    assert_eq!(v["result"]["data"]["answer"], 5);
    assert_eq!(v["result"]["provider"], "gemini");
  }

  #[tokio::test]
  async fn bad_image_and_oversized_ladder_are_reported() {
    let st = state();
    let v = serde_json::to_value(&handle_client_ws(parse(r#"{"type":"analyze_image","image":""}"#), &st).await).unwrap();
    assert_eq!(v["type"], "analysis_error");
    assert_eq!(v["error"]["success"], false);

    let v = serde_json::to_value(&handle_client_ws(parse(r#"{"type":"hint_ladder","a":99,"b":1}"#), &st).await).unwrap();
    assert_eq!(v["type"], "error");
  }
}
