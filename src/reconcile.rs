//! Multi-provider reconciliation.
//!
//! Every enabled adapter runs concurrently under its own deadline. Succeeded
//! candidates are weighted by `score × raw confidence`; the heaviest wins and
//! ties go to the provider listed first in the priority order. Two or more
//! candidates agreeing on the answer is consensus. The winner's hints are
//! always rebuilt from its own fields. Nothing is kept between calls.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::AppConfig;
use crate::domain::{clamp_unit, ErrorKind, ProviderId, ProviderResult, RecognizedProblem};
use crate::error::{AnalyzeError, FailureClass};
use crate::providers::{run_adapter, slots_from_env, ImagePayload, ProviderSlot, ReplyInterpreter};
use crate::scoring::ConfidenceScorer;

/// Overall confidence floor when providers agree.
pub const CONSENSUS_CONFIDENCE: f32 = 0.95;

/// Per-provider line in the response metadata.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
  pub provider: ProviderId,
  pub model: String,
  pub succeeded: bool,
  pub answer: Option<i64>,
  pub raw_confidence: f32,
  pub score: Option<f32>,
  pub error_kind: Option<ErrorKind>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub detail: Option<String>,
  pub latency_ms: u64,
}

impl ProviderSummary {
  fn from_result(r: &ProviderResult, score: Option<f32>) -> Self {
    Self {
      provider: r.provider_id,
      model: r.model.clone(),
      succeeded: r.succeeded,
      answer: r.answer(),
      raw_confidence: r.raw_confidence,
      score,
      error_kind: r.error_kind,
      detail: r.detail.clone(),
      latency_ms: r.latency_ms,
    }
  }
}

#[derive(Clone, Debug)]
pub struct Reconciliation {
  pub problem: RecognizedProblem,
  pub winner: ProviderId,
  pub model: String,
  pub consensus: bool,
  pub confidence: f32,
  pub summaries: Vec<ProviderSummary>,
}

impl Reconciliation {
  pub fn successful_providers(&self) -> usize {
    self.summaries.iter().filter(|s| s.succeeded).count()
  }
}

#[derive(Clone, Debug)]
pub struct Reconciler {
  slots: Vec<ProviderSlot>,
  interpreter: ReplyInterpreter,
  scorer: ConfidenceScorer,
  timeout: Duration,
}

impl Reconciler {
  /// `slots` must already be in priority order.
  pub fn new(cfg: &AppConfig, slots: Vec<ProviderSlot>) -> Self {
    Self {
      slots,
      interpreter: ReplyInterpreter::new(cfg),
      scorer: ConfidenceScorer::new(&cfg.scoring),
      timeout: Duration::from_secs(cfg.providers.timeout_secs),
    }
  }

  pub fn from_env(cfg: &AppConfig) -> Self {
    Self::new(cfg, slots_from_env(cfg))
  }

  #[cfg(test)]
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn slots(&self) -> &[ProviderSlot] {
    &self.slots
  }

  /// Fan out to every slot and pick one winner.
  #[instrument(level = "info", skip(self, image), fields(providers = self.slots.len()))]
  pub async fn reconcile(&self, image: &ImagePayload) -> Result<Reconciliation, AnalyzeError> {
    let calls = self.slots.iter().map(|slot| run_adapter(slot, image.clone(), &self.interpreter, self.timeout));
    let results = join_all(calls).await;
    self.select(results)
  }

  /// Same pipeline restricted to one provider.
  #[instrument(level = "info", skip(self, image))]
  pub async fn analyze_single(&self, id: ProviderId, image: &ImagePayload) -> Result<Reconciliation, AnalyzeError> {
    let slot = self.slots.iter().find(|s| s.id == id).cloned().unwrap_or_else(|| ProviderSlot::unconfigured(id));
    let result = run_adapter(&slot, image.clone(), &self.interpreter, self.timeout).await;
    self.select(vec![result])
  }

  /// Choose a winner among results listed in priority order.
  pub fn select(&self, results: Vec<ProviderResult>) -> Result<Reconciliation, AnalyzeError> {
    let scores: Vec<Option<f32>> = results
      .iter()
      .map(|r| r.problem.as_ref().filter(|_| r.succeeded).map(|p| self.scorer.score(p)))
      .collect();

    let mut best: Option<(usize, f32)> = None;
    for (i, (r, score)) in results.iter().zip(&scores).enumerate() {
      let Some(score) = score else { continue };
      let weight = score * r.raw_confidence;
      if best.map_or(true, |(_, w)| weight > w) {
        best = Some((i, weight));
      }
    }

    let summaries: Vec<ProviderSummary> =
      results.iter().zip(&scores).map(|(r, s)| ProviderSummary::from_result(r, *s)).collect();

    let Some((idx, weight)) = best else {
      let class = FailureClass::classify(&results);
      warn!(target: "reconcile", ?class, attempted = results.len(), "all providers failed");
      return Err(AnalyzeError::AllProvidersFailed { class, results: summaries });
    };

    let consensus = has_consensus(&results);
    let confidence = clamp_unit(if consensus { CONSENSUS_CONFIDENCE.max(weight) } else { weight });

    let winner = &results[idx];
    let mut problem = winner.problem.clone().unwrap_or_default();
    problem.hints = self.interpreter.hints().generate(&problem);
    problem.confidence = confidence;

    info!(
      target: "reconcile",
      winner = %winner.provider_id,
      answer = ?problem.answer,
      consensus,
      confidence,
      succeeded = summaries.iter().filter(|s| s.succeeded).count(),
      "reconciled"
    );

    Ok(Reconciliation {
      problem,
      winner: winner.provider_id,
      model: winner.model.clone(),
      consensus,
      confidence,
      summaries,
    })
  }
}

/// Some answer value is shared by at least two succeeded candidates.
fn has_consensus(results: &[ProviderResult]) -> bool {
  let mut tally: BTreeMap<i64, usize> = BTreeMap::new();
  for answer in results.iter().filter(|r| r.succeeded).filter_map(|r| r.answer()) {
    *tally.entry(answer).or_default() += 1;
  }
  tally.values().any(|n| *n >= 2)
}
