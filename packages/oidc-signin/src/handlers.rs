use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Extension;
use serde::Deserialize;
use tower_sessions::Session;

use crate::metrics::CONTENT_TYPE;
use crate::session::{self, SessionPrincipal};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ErrorQuery {
    pub message: Option<String>,
}

pub async fn index(session: Session) -> Html<String> {
    let principal = session::current_principal(&session).await.unwrap_or_else(|err| {
        err.log();
        None
    });

    let body = match principal {
        Some(principal) => format!(
            "<p>Hello, {}!</p>\n<p><a href=\"/Home/Claims\">Claims</a> | \
             <a href=\"/Account/LogOff\">Sign out</a></p>",
            escape_html(principal.display_name())
        ),
        None => "<p>You are not signed in.</p>\n<p><a href=\"/Account/Login\">Sign in</a></p>"
            .to_string(),
    };
    Html(page("Home", &body))
}

pub async fn claims(Extension(principal): Extension<SessionPrincipal>) -> Html<String> {
    let mut rows = vec![
        ("iss".to_string(), principal.issuer.clone()),
        ("sub".to_string(), principal.subject.clone()),
    ];
    if let Some(ref tenant) = principal.tenant_id {
        rows.push(("tenant".to_string(), tenant.clone()));
    }
    rows.extend(principal.claims.iter().map(|(k, v)| (k.clone(), v.clone())));

    let table = rows
        .iter()
        .map(|(k, v)| {
            format!(
                "<tr><td>{}</td><td>{}</td></tr>",
                escape_html(k),
                escape_html(v)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Html(page(
        "Claims",
        &format!(
            "<p>Signed in as {}.</p>\n<table>\n{table}\n</table>",
            escape_html(principal.display_name())
        ),
    ))
}

pub async fn error(Query(params): Query<ErrorQuery>) -> Html<String> {
    let message = params
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| "An error occurred while processing your request.".to_string());

    Html(page(
        "Error",
        &format!(
            "<p>{}</p>\n<p><a href=\"/\">Home</a></p>",
            escape_html(&message)
        ),
    ))
}

pub async fn health() -> &'static str {
    "OK"
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body>\n<h1>{title}</h1>\n{body}\n</body>\n</html>\n"
    )
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
