use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use tower_sessions::Session;

use crate::session::{self, SessionPrincipal};

pub const LOGIN_PATH: &str = "/Account/Login";

/// Lets signed-in requests through and sends everyone else through the
/// login challenge, returning them to the page they asked for.
pub async fn require_auth(session: Session, mut request: Request, next: Next) -> Response {
    match session::current_principal(&session).await {
        Ok(Some(principal)) => {
            request.extensions_mut().insert::<SessionPrincipal>(principal);
            next.run(request).await
        }
        Ok(None) => challenge_redirect(&request),
        Err(err) => {
            err.log();
            challenge_redirect(&request)
        }
    }
}

fn challenge_redirect(request: &Request) -> Response {
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    Redirect::to(&format!(
        "{LOGIN_PATH}?returnUrl={}",
        urlencoding::encode(target)
    ))
    .into_response()
}
