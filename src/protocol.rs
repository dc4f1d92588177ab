//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use serde::{Deserialize, Serialize};

use crate::domain::{ProviderId, RecognizedProblem};
use crate::error::AnalyzeError;
use crate::hints::HintStep;
use crate::practice::{AnswerFeedback, PracticeProblem};
use crate::reconcile::{ProviderSummary, Reconciliation};

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    AnalyzeImage {
        image: String,
        /// Restrict to one provider; all providers when absent.
        #[serde(default)]
        provider: Option<String>,
    },
    Practice {
        #[serde(default)]
        level: Option<u8>,
    },
    CheckAnswer {
        #[serde(rename = "studentAnswer")]
        student_answer: i64,
        #[serde(rename = "correctAnswer")]
        correct_answer: i64,
        #[serde(rename = "hintsUsed", default)]
        hints_used: Option<u32>,
    },
    HintLadder {
        a: u32,
        b: u32,
    },
}

/// Messages the server sends back over WebSocket.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    Analysis {
        result: AnalyzeOk,
    },
    AnalysisError {
        error: AnalyzeFail,
    },
    Practice {
        problem: PracticeProblem,
    },
    AnswerResult {
        #[serde(flatten)]
        feedback: AnswerFeedback,
    },
    HintLadder {
        hints: Vec<HintStep>,
    },
    Error {
        message: String,
    },
}

//
// Vision analysis envelopes
//

#[derive(Debug, Deserialize)]
pub struct AnalyzeIn {
    pub image: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeMeta {
    pub consensus: bool,
    pub confidence: f32,
    pub total_providers: usize,
    pub successful_providers: usize,
    pub results: Vec<ProviderSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeOk {
    pub success: bool,
    pub request_id: String,
    pub provider: ProviderId,
    pub model: String,
    pub data: RecognizedProblem,
    pub meta: AnalyzeMeta,
}

impl AnalyzeOk {
    pub fn new(request_id: &str, r: Reconciliation) -> Self {
        let successful_providers = r.successful_providers();
        Self {
            success: true,
            request_id: request_id.to_string(),
            provider: r.winner,
            model: r.model,
            data: r.problem,
            meta: AnalyzeMeta {
                consensus: r.consensus,
                confidence: r.confidence,
                total_providers: r.summaries.len(),
                successful_providers,
                results: r.summaries,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeFail {
    pub success: bool,
    pub request_id: String,
    pub error: String,
    pub details: String,
    pub suggestion: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ProviderSummary>,
}

impl AnalyzeFail {
    pub fn new(request_id: &str, e: &AnalyzeError) -> Self {
        let (error, details, suggestion, results) = match e {
            AnalyzeError::InvalidImage(inner) => (
                "The picture could not be read.".to_string(),
                inner.to_string(),
                "Send the photo as a base64 data URI (data:image/jpeg;base64,...).".to_string(),
                Vec::new(),
            ),
            AnalyzeError::UnknownProvider(name) => (
                format!("Unknown provider: {}", name),
                e.to_string(),
                format!("Use one of: {}.", ProviderId::ALL.map(|p| p.as_str()).join(", ")),
                Vec::new(),
            ),
            AnalyzeError::AllProvidersFailed { class, results } => {
                let details = results
                    .iter()
                    .filter_map(|s| s.detail.as_ref().map(|d| format!("{}: {}", s.provider, d)))
                    .collect::<Vec<_>>()
                    .join("; ");
                (class.user_message().to_string(), details, class.suggestion().to_string(), results.clone())
            }
        };
        Self { success: false, request_id: request_id.to_string(), error, details, suggestion, results }
    }
}

//
// Tutor DTOs
//

#[derive(Debug, Deserialize)]
pub struct PracticeQuery {
    pub level: Option<u8>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerIn {
    pub student_answer: i64,
    pub correct_answer: i64,
    #[serde(default)]
    pub hints_used: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct HintLadderQuery {
    pub a: u32,
    pub b: u32,
}
#[derive(Serialize)]
pub struct HintLadderOut {
    pub hints: Vec<HintStep>,
}

#[derive(Serialize)]
pub struct ErrorOut {
    pub error: String,
}

#[derive(Serialize)]
pub struct ProviderStatus {
    pub id: ProviderId,
    pub model: String,
    pub configured: bool,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub providers: Vec<ProviderStatus>,
}
