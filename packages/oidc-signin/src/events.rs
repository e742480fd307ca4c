//! Extension points of the sign-in callback.

use axum::response::{IntoResponse, Redirect, Response};

use crate::error::{AuthError, Result};
use crate::oidc::ValidatedIdentity;
use crate::policy::TenantPolicy;

pub trait AuthEvents: Send + Sync {
    /// Final decision on a token whose signature and standard claims have
    /// already been verified. An error here means no session is created.
    fn on_token_validated(&self, identity: &ValidatedIdentity) -> Result<()>;

    /// Turns any failure of the provider round trip into a response for the
    /// user-agent.
    fn on_remote_failure(&self, failure: &AuthError) -> Response;
}

/// Applies the configured tenant policy and sends failures to the error page.
pub struct SignInEvents {
    tenants: TenantPolicy,
    error_path: String,
}

impl SignInEvents {
    pub fn new(tenants: TenantPolicy, error_path: impl Into<String>) -> Self {
        Self {
            tenants,
            error_path: error_path.into(),
        }
    }
}

impl AuthEvents for SignInEvents {
    fn on_token_validated(&self, identity: &ValidatedIdentity) -> Result<()> {
        self.tenants.evaluate(identity)
    }

    fn on_remote_failure(&self, failure: &AuthError) -> Response {
        error_redirect(&self.error_path, &failure.user_message())
    }
}

pub fn error_redirect(error_path: &str, message: &str) -> Response {
    Redirect::to(&format!(
        "{error_path}?message={}",
        urlencoding::encode(message)
    ))
    .into_response()
}
