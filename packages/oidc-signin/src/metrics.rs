use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use crate::error::AuthError;

pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

pub struct AuthMetrics {
    registry: Registry,
    challenges: Counter,
    sign_ins: Family<OutcomeLabels, Counter>,
    sign_outs: Counter,
}

impl AuthMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let challenges = Counter::default();
        let sign_ins = Family::<OutcomeLabels, Counter>::default();
        let sign_outs = Counter::default();

        registry.register(
            "oidc_challenges",
            "Authentication challenges sent to the identity provider",
            challenges.clone(),
        );
        registry.register(
            "oidc_sign_ins",
            "Completed sign-in callbacks by outcome",
            sign_ins.clone(),
        );
        registry.register(
            "oidc_sign_outs",
            "Sign-outs that cleared a session",
            sign_outs.clone(),
        );

        Self {
            registry,
            challenges,
            sign_ins,
            sign_outs,
        }
    }

    pub fn record_challenge(&self) {
        self.challenges.inc();
    }

    pub fn record_sign_in(&self) {
        self.sign_in_outcome("established");
    }

    pub fn record_failure(&self, error: &AuthError) {
        self.sign_in_outcome(error.kind());
    }

    pub fn record_sign_out(&self) {
        self.sign_outs.inc();
    }

    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }

    fn sign_in_outcome(&self, outcome: &str) {
        self.sign_ins
            .get_or_create(&OutcomeLabels {
                outcome: outcome.to_string(),
            })
            .inc();
    }
}

impl Default for AuthMetrics {
    fn default() -> Self {
        Self::new()
    }
}
