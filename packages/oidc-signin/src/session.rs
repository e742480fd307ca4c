use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_sessions::cookie::SameSite;
use tower_sessions::service::SignedCookie;
use tower_sessions::{Expiry, Session, SessionManagerLayer, SessionStore};

use crate::config::SessionConfig;
use crate::error::Result;
use crate::oidc::ValidatedIdentity;

pub const SESSION_COOKIE_NAME: &str = "signin_session";

const SESSION_KEY_PENDING: &str = "oidc_pending_challenges";
const SESSION_KEY_PRINCIPAL: &str = "principal";

/// Challenges kept per session, one per sign-in started in another tab.
/// The oldest is dropped beyond this.
pub const MAX_PENDING_CHALLENGES: usize = 5;

/// State that has to survive the round trip to the provider and back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingChallenge {
    pub state: String,
    pub nonce: String,
    pub redirect_to: String,
}

/// Who is signed in. Only built from a [`ValidatedIdentity`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionPrincipal {
    pub issuer: String,
    pub subject: String,
    pub tenant_id: Option<String>,
    pub name: Option<String>,
    pub preferred_username: Option<String>,
    pub email: Option<String>,
    pub claims: BTreeMap<String, String>,
    pub id_token_hint: String,
    /// Expiry of the id token the session was established from. The
    /// session ends with it.
    pub expires_at: DateTime<Utc>,
}

impl SessionPrincipal {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.preferred_username.as_deref())
            .or(self.email.as_deref())
            .unwrap_or(&self.subject)
    }
}

impl From<ValidatedIdentity> for SessionPrincipal {
    fn from(identity: ValidatedIdentity) -> Self {
        Self {
            issuer: identity.issuer,
            subject: identity.subject,
            tenant_id: identity.tenant_id,
            name: identity.name,
            preferred_username: identity.preferred_username,
            email: identity.email,
            claims: identity.claims,
            id_token_hint: identity.raw_token,
            expires_at: identity.expires_at,
        }
    }
}

pub fn layer<S>(store: S, config: &SessionConfig) -> SessionManagerLayer<S, SignedCookie>
where
    S: SessionStore + Clone,
{
    // The form_post callback is a cross-site POST, which only carries the
    // cookie when it is SameSite=None (and therefore Secure).
    let same_site = if config.secure {
        SameSite::None
    } else {
        SameSite::Lax
    };

    SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE_NAME)
        .with_expiry(Expiry::OnInactivity(config.idle_timeout))
        .with_same_site(same_site)
        .with_http_only(true)
        .with_secure(config.secure)
        .with_signed(config.signing_key.clone())
}

/// The signed-in principal, if any. A principal whose id token has expired
/// is dropped from the session and reported as absent.
pub async fn current_principal(session: &Session) -> Result<Option<SessionPrincipal>> {
    let principal: Option<SessionPrincipal> = session.get(SESSION_KEY_PRINCIPAL).await?;
    match principal {
        Some(principal) if principal.is_expired() => {
            tracing::debug!(sub = %principal.subject, "session principal expired");
            session.remove_value(SESSION_KEY_PRINCIPAL).await?;
            Ok(None)
        }
        other => Ok(other),
    }
}

pub async fn begin_challenge(session: &Session, pending: &PendingChallenge) -> Result<()> {
    let mut challenges: Vec<PendingChallenge> =
        session.get(SESSION_KEY_PENDING).await?.unwrap_or_default();
    challenges.push(pending.clone());
    if challenges.len() > MAX_PENDING_CHALLENGES {
        let excess = challenges.len() - MAX_PENDING_CHALLENGES;
        challenges.drain(..excess);
    }
    session.insert(SESSION_KEY_PENDING, challenges).await?;
    Ok(())
}

/// Removes and returns the pending challenge issued with `state`, so each
/// challenge can only be completed once.
pub async fn take_pending(session: &Session, state: &str) -> Result<Option<PendingChallenge>> {
    let mut challenges: Vec<PendingChallenge> =
        session.get(SESSION_KEY_PENDING).await?.unwrap_or_default();
    let Some(index) = challenges.iter().position(|c| c.state == state) else {
        return Ok(None);
    };

    let taken = challenges.remove(index);
    if challenges.is_empty() {
        session.remove_value(SESSION_KEY_PENDING).await?;
    } else {
        session.insert(SESSION_KEY_PENDING, challenges).await?;
    }
    Ok(Some(taken))
}

/// Stores the principal under a fresh session id.
pub async fn establish(session: &Session, principal: &SessionPrincipal) -> Result<()> {
    session.cycle_id().await?;
    session.insert(SESSION_KEY_PRINCIPAL, principal).await?;
    Ok(())
}

/// Deletes the server-side record and expires the cookie.
pub async fn clear(session: &Session) -> Result<()> {
    session.flush().await?;
    Ok(())
}
