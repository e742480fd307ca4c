use strum::IntoStaticStr;
use thiserror::Error;

/// Shown for every failure that is not the provider's own error report, so
/// a policy rejection is indistinguishable from a bad token to the user.
pub const GENERIC_SIGN_IN_FAILURE: &str =
    "Sign-in failed: the identity provider response could not be accepted.";

#[derive(Debug, Error, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AuthError {
    #[error("token validation failed: {0}")]
    TokenValidation(String),

    #[error("token rejected by tenant policy: {0}")]
    PolicyRejection(String),

    #[error("identity provider returned error '{error}'")]
    RemoteProvider {
        error: String,
        description: Option<String>,
    },

    #[error("failed to fetch signing keys: {0}")]
    TransientNetwork(String),

    #[error("sign-in correlation failed: {0}")]
    Correlation(String),

    #[error("malformed callback: {0}")]
    MalformedCallback(String),

    #[error("session store error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    #[error("provider discovery failed: {0}")]
    Discovery(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Stable snake_case label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// Text carried to the error page.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::RemoteProvider { error, description } => description
                .as_deref()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or(error)
                .to_string(),
            _ => GENERIC_SIGN_IN_FAILURE.to_string(),
        }
    }

    pub fn log(&self) {
        let kind = self.kind();
        match self {
            AuthError::PolicyRejection(_) => {
                tracing::warn!(kind, error = %self, "sign-in denied by tenant policy");
            }
            AuthError::TokenValidation(_)
            | AuthError::Correlation(_)
            | AuthError::MalformedCallback(_) => {
                tracing::warn!(kind, error = %self, "sign-in rejected");
            }
            AuthError::RemoteProvider { .. } => {
                tracing::info!(
                    kind,
                    error = %self,
                    message = %self.user_message(),
                    "identity provider reported a failure"
                );
            }
            AuthError::TransientNetwork(_)
            | AuthError::Session(_)
            | AuthError::Discovery(_)
            | AuthError::Config(_) => {
                tracing::error!(kind, error = %self, "sign-in failed");
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
