//! Kazoeru · Arithmetic Tutor Backend
//!
//! - Axum HTTP + WebSocket API
//! - Worksheet photo analysis across OpenAI, Anthropic and Gemini vision models,
//!   reconciled into one problem with regenerated hints
//! - Practice problems, answer feedback and a hint ladder
//!
//! Important env variables:
//!   PORT                   : u16 (default 3000)
//!   OPENAI_API_KEY         : enables the OpenAI adapter
//!   OPENAI_BASE_URL        : default "https://api.openai.com/v1"
//!   OPENAI_VISION_MODEL    : default "gpt-4o"
//!   ANTHROPIC_API_KEY      : enables the Anthropic adapter
//!   ANTHROPIC_BASE_URL     : default "https://api.anthropic.com/v1"
//!   ANTHROPIC_VISION_MODEL : default "claude-3-5-sonnet-20241022"
//!   GEMINI_API_KEY         : enables the Gemini adapter (GOOGLE_AI_API_KEY also accepted)
//!   GEMINI_BASE_URL        : default "https://generativelanguage.googleapis.com/v1beta"
//!   GEMINI_VISION_MODEL    : default "gemini-2.0-flash-exp"
//!   TUTOR_CONFIG_PATH      : path to TOML config (prompts, priority, scoring, hints)
//!   LOG_LEVEL              : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT             : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod structured;
mod extract;
mod scoring;
mod hints;
mod practice;
mod providers;
mod reconcile;
mod state;
mod protocol;
mod logic;
mod routes;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, instrument, warn};

use crate::routes::build_router;
use crate::state::AppState;

#[instrument(level = "info", skip_all)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Build shared application state (config, provider adapters, reconciler).
  let state = Arc::new(AppState::new());

  // Build the HTTP router with routes, body limit, CORS and tracing layers.
  let app = build_router(state.clone());

  // Read port from env or default to 3000.
  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "kazoeru_backend", %addr, "HTTP server listening");
  axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "kazoeru_backend", error = %e, "Failed to listen for Ctrl-C");
    std::future::pending::<()>().await;
  }
  info!(target: "kazoeru_backend", "Shutdown signal received");
}
