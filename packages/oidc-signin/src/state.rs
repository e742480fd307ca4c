use std::sync::Arc;

use crate::config::AppConfig;
use crate::events::{AuthEvents, SignInEvents};
use crate::metrics::AuthMetrics;
use crate::oidc::OidcProvider;

#[derive(Clone)]
pub struct AppState {
    pub oidc: Arc<OidcProvider>,
    pub events: Arc<dyn AuthEvents>,
    pub metrics: Arc<AuthMetrics>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Wires the default events, which enforce the configured tenant policy.
    pub fn new(config: AppConfig, oidc: OidcProvider) -> Self {
        let events = SignInEvents::new(
            config.oidc.tenant_policy.clone(),
            config.error_path.clone(),
        );
        Self {
            oidc: Arc::new(oidc),
            events: Arc::new(events),
            metrics: Arc::new(AuthMetrics::new()),
            config: Arc::new(config),
        }
    }

    /// Replaces the default events with a custom policy.
    pub fn with_events(mut self, events: Arc<dyn AuthEvents>) -> Self {
        self.events = events;
        self
    }
}
