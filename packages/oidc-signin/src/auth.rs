use axum::extract::rejection::FormRejection;
use axum::extract::{Query, State};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::error::{AuthError, Result};
use crate::session::{self, SessionPrincipal};
use crate::state::AppState;

#[derive(Serialize)]
pub struct AuthStatus {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person: Option<PersonInfo>,
}

#[derive(Serialize)]
pub struct PersonInfo {
    pub sub: String,
    pub name: String,
    pub tenant_id: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginQuery {
    #[serde(rename = "returnUrl")]
    pub return_url: Option<String>,
}

#[derive(Deserialize)]
pub struct CallbackForm {
    pub id_token: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// `GET /Account/Login`: challenges unless the session is already signed in.
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<LoginQuery>,
) -> Response {
    let target = local_redirect_target(params.return_url.as_deref());
    challenge(&state, &session, target)
        .await
        .unwrap_or_else(|err| failure_response(&state, err))
}

async fn challenge(state: &AppState, session: &Session, target: String) -> Result<Response> {
    if session::current_principal(session).await?.is_some() {
        return Ok(Redirect::to(&target).into_response());
    }

    let (auth_url, pending) = state.oidc.challenge(target);
    session::begin_challenge(session, &pending).await?;
    state.metrics.record_challenge();

    tracing::debug!(redirect_to = %pending.redirect_to, "issuing authentication challenge");
    Ok(Redirect::to(auth_url.as_str()).into_response())
}

/// `POST /signin-oidc`: the provider's form_post response.
pub async fn callback(
    State(state): State<AppState>,
    session: Session,
    form: std::result::Result<Form<CallbackForm>, FormRejection>,
) -> Response {
    match complete_sign_in(&state, &session, form).await {
        Ok((redirect_to, principal)) => {
            state.metrics.record_sign_in();
            tracing::info!(
                sub = %principal.subject,
                tenant_id = principal.tenant_id.as_deref().unwrap_or("-"),
                "OIDC login successful"
            );
            Redirect::to(&redirect_to).into_response()
        }
        Err(err) => failure_response(&state, err),
    }
}

async fn complete_sign_in(
    state: &AppState,
    session: &Session,
    form: std::result::Result<Form<CallbackForm>, FormRejection>,
) -> Result<(String, SessionPrincipal)> {
    let Form(params) = form.map_err(|e| AuthError::MalformedCallback(e.body_text()))?;

    // Consumed up front so neither a failure nor a replay can reuse it.
    let pending = match params.state.as_deref() {
        Some(state) => session::take_pending(session, state).await?,
        None => None,
    };

    if let Some(error) = params.error {
        return Err(AuthError::RemoteProvider {
            error,
            description: params.error_description,
        });
    }

    if params.state.is_none() {
        return Err(AuthError::MalformedCallback("missing state".into()));
    }
    let pending = pending.ok_or_else(|| {
        AuthError::Correlation("no sign-in with this state is pending for the session".into())
    })?;

    let raw_token = params
        .id_token
        .ok_or_else(|| AuthError::MalformedCallback("missing id_token".into()))?;

    let identity = state.oidc.validate(&raw_token, &pending.nonce).await?;
    state.events.on_token_validated(&identity)?;

    let principal = SessionPrincipal::from(identity);
    session::establish(session, &principal).await?;

    Ok((pending.redirect_to, principal))
}

/// `GET /Account/LogOff`: ends both the local and the provider session.
pub async fn logout(State(state): State<AppState>, session: Session) -> Response {
    sign_out(&state, &session)
        .await
        .unwrap_or_else(|err| failure_response(&state, err))
}

async fn sign_out(state: &AppState, session: &Session) -> Result<Response> {
    let Some(principal) = session::current_principal(session).await? else {
        return Ok(Redirect::to("/").into_response());
    };

    session::clear(session).await?;
    state.metrics.record_sign_out();

    tracing::info!(sub = %principal.subject, "signed out, redirecting to provider logout");
    let end_session = state.oidc.end_session_url(Some(&principal.id_token_hint));
    Ok(Redirect::to(end_session.as_str()).into_response())
}

/// `GET /Account/Status`. A session that cannot be read reports as
/// signed out.
pub async fn status(session: Session) -> Json<AuthStatus> {
    let principal = session::current_principal(&session)
        .await
        .unwrap_or_else(|err| {
            err.log();
            None
        });

    Json(AuthStatus {
        authenticated: principal.is_some(),
        person: principal.map(|p| PersonInfo {
            sub: p.subject.clone(),
            name: p.display_name().to_string(),
            tenant_id: p.tenant_id,
        }),
    })
}

fn failure_response(state: &AppState, err: AuthError) -> Response {
    err.log();
    state.metrics.record_failure(&err);
    state.events.on_remote_failure(&err)
}

/// Only same-origin paths that are also valid `Location` values are accepted
/// as post-login targets.
pub fn local_redirect_target(requested: Option<&str>) -> String {
    match requested {
        Some(path) if is_local_path(path) => path.to_string(),
        _ => "/".to_string(),
    }
}

fn is_local_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.starts_with("//")
        && !path.starts_with("/\\")
        && !path.chars().any(char::is_control)
        && HeaderValue::from_str(path).is_ok()
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn local_paths_are_kept() {
        assert_eq!(local_redirect_target(Some("/Home/Claims?x=1")), "/Home/Claims?x=1");
        assert_eq!(local_redirect_target(None), "/");
    }

    #[tokio::test]
    async fn unreadable_session_reports_signed_out() {
        let session = Session::new(
            None,
            std::sync::Arc::new(tower_sessions_memory_store::MemoryStore::default()),
            None,
        );
        session
            .insert("principal", 42)
            .await
            .expect("insert");

        let Json(body) = status(session).await;
        assert!(!body.authenticated);
        assert!(body.person.is_none());
    }

    #[test]
    fn foreign_targets_fall_back_to_root() {
        for target in [
            "https://evil.example.com/",
            "//evil.example.com",
            "/\\evil.example.com",
            "Home/Claims",
            "",
            "/\r\nSet-Cookie:x=1",
            "/Home\u{0}",
            "/caf\u{e9}\u{7f}",
        ] {
            assert_eq!(local_redirect_target(Some(target)), "/", "{target}");
        }
    }
}
