//! Application state: loaded configuration and the provider reconciler.
//!
//! Nothing here is mutated after startup. Every analysis request runs against
//! the same immutable reconciler, so no provider choice leaks between calls.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::{load_config_from_env, AppConfig};
use crate::protocol::ProviderStatus;
use crate::reconcile::Reconciler;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub reconciler: Reconciler,
}

impl AppState {
    /// Build state from env: load TOML config (or defaults), then build one
    /// adapter per provider that has credentials.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Self {
        let config = load_config_from_env().unwrap_or_default();
        let reconciler = Reconciler::from_env(&config);
        let enabled = reconciler.slots().iter().filter(|s| s.is_configured()).count();
        info!(
            target: "kazoeru_backend",
            enabled,
            total = reconciler.slots().len(),
            timeout_secs = config.providers.timeout_secs,
            "Vision providers ready."
        );
        Self::with_reconciler(config, reconciler)
    }

    pub fn with_reconciler(config: AppConfig, reconciler: Reconciler) -> Self {
        Self { config: Arc::new(config), reconciler }
    }

    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.reconciler
            .slots()
            .iter()
            .map(|s| ProviderStatus { id: s.id, model: s.model_name().to_string(), configured: s.is_configured() })
            .collect()
    }
}
