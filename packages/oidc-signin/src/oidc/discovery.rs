//! Provider metadata discovery.

use openidconnect::core::CoreProviderMetadata;
use serde::Deserialize;
use url::Url;

use crate::error::{AuthError, Result};

const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// The discovery document, split into what openidconnect models and the
/// RP-initiated logout endpoint it does not.
pub struct ProviderDocument {
    pub metadata: CoreProviderMetadata,
    pub end_session_endpoint: Option<Url>,
}

#[derive(Deserialize)]
struct LogoutMetadata {
    #[serde(default)]
    end_session_endpoint: Option<Url>,
}

pub fn discovery_url(authority: &str) -> String {
    format!("{}{WELL_KNOWN_PATH}", authority.trim_end_matches('/'))
}

/// Fetches and parses `<authority>/.well-known/openid-configuration`.
///
/// The advertised issuer is deliberately not compared with the authority:
/// multi-tenant endpoints such as `/common/v2.0` publish a templated issuer
/// (`https://login.microsoftonline.com/{tenantid}/v2.0`).
pub async fn fetch_provider_document(
    authority: &str,
    http: &reqwest::Client,
) -> Result<ProviderDocument> {
    let url = discovery_url(authority);
    tracing::info!("discovering OIDC provider at {url}");

    let response = http
        .get(&url)
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| AuthError::Discovery(format!("failed to fetch {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::Discovery(format!("{url} returned HTTP {status}")));
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| AuthError::Discovery(format!("failed to read {url}: {e}")))?;

    let metadata: CoreProviderMetadata = serde_json::from_slice(&body)
        .map_err(|e| AuthError::Discovery(format!("invalid discovery document: {e}")))?;
    let logout: LogoutMetadata = serde_json::from_slice(&body)
        .map_err(|e| AuthError::Discovery(format!("invalid end_session_endpoint: {e}")))?;

    if metadata.issuer().as_str() != authority.trim_end_matches('/') {
        tracing::debug!(
            advertised = %metadata.issuer().as_str(),
            authority,
            "provider issuer differs from authority"
        );
    }

    Ok(ProviderDocument {
        metadata,
        end_session_endpoint: logout.end_session_endpoint,
    })
}
