//! Relying-party side of OpenID Connect: discovery, the authorization
//! request, id token verification and the provider logout URL.

mod discovery;
mod keys;
mod validate;

use std::sync::Arc;

use openidconnect::core::{CoreClient, CoreResponseType};
use openidconnect::{
    AuthenticationFlow, ClientId, CsrfToken, EndpointMaybeSet, EndpointNotSet, EndpointSet,
    IssuerUrl, Nonce, RedirectUrl, Scope,
};
use url::Url;

use crate::config::OidcConfig;
use crate::error::{AuthError, Result};
use crate::session::PendingChallenge;

use discovery::fetch_provider_document;
use keys::contains_key;
use validate::{token_key_id, verify_id_token, TokenExpectations};

pub use keys::SigningKeys;
pub use validate::{ExtraClaims, SignInIdToken, ValidatedIdentity};

pub type ConfiguredClient = CoreClient<
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointMaybeSet,
    EndpointMaybeSet,
>;

pub struct OidcProvider {
    client: ConfiguredClient,
    client_id: ClientId,
    issuer: IssuerUrl,
    end_session_endpoint: Url,
    post_logout_redirect_uri: String,
    tenant_claim: String,
    keys: Arc<SigningKeys>,
}

impl OidcProvider {
    /// Runs discovery against the configured authority and builds a client
    /// that redirects back to `redirect_uri`.
    pub async fn discover(
        config: &OidcConfig,
        redirect_uri: &str,
        http: reqwest::Client,
    ) -> Result<Self> {
        let document = fetch_provider_document(&config.authority, &http).await?;

        let end_session_endpoint = match (&config.end_session_url, document.end_session_endpoint) {
            (Some(configured), _) => Url::parse(configured).map_err(|e| {
                AuthError::Config(format!("invalid OIDC_END_SESSION_URL: {e}"))
            })?,
            (None, Some(advertised)) => advertised,
            (None, None) => {
                return Err(AuthError::Discovery(
                    "provider advertises no end_session_endpoint and OIDC_END_SESSION_URL is not set"
                        .into(),
                ))
            }
        };

        let jwks_uri = document.metadata.jwks_uri().url().clone();
        let issuer = document.metadata.issuer().clone();
        let client_id = ClientId::new(config.client_id.clone());

        let redirect_url = RedirectUrl::new(redirect_uri.to_string())
            .map_err(|e| AuthError::Config(format!("invalid redirect URL: {e}")))?;

        let client =
            CoreClient::from_provider_metadata(document.metadata, client_id.clone(), None)
                .set_redirect_uri(redirect_url);

        tracing::info!(%jwks_uri, "OIDC client configured successfully");

        Ok(Self {
            client,
            client_id,
            issuer,
            end_session_endpoint,
            post_logout_redirect_uri: config.post_logout_redirect_uri.clone(),
            tenant_claim: config.tenant_claim.clone(),
            keys: Arc::new(
                SigningKeys::new(jwks_uri, http, config.key_refresh_interval)
                    .with_min_refresh_interval(config.key_min_refresh_interval),
            ),
        })
    }

    /// Builds the implicit-flow authorization request (`response_type=id_token`,
    /// `response_mode=form_post`) and the state the callback must match.
    pub fn challenge(&self, redirect_to: String) -> (Url, PendingChallenge) {
        let (auth_url, csrf_token, nonce) = self
            .client
            .authorize_url(
                AuthenticationFlow::<CoreResponseType>::Implicit(false),
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .add_scope(Scope::new("profile".to_string()))
            .add_extra_param("response_mode", "form_post")
            .url();

        let pending = PendingChallenge {
            state: csrf_token.secret().clone(),
            nonce: nonce.secret().clone(),
            redirect_to,
        };
        (auth_url, pending)
    }

    /// Verifies the signature, audience, expiry and nonce of `raw_token`.
    /// The tenant policy is applied separately by the caller.
    pub async fn validate(&self, raw_token: &str, nonce: &str) -> Result<ValidatedIdentity> {
        let mut keys = self.keys.get().await?;
        if let Some(kid) = token_key_id(raw_token) {
            if !contains_key(&keys, &kid) {
                if let Some(refreshed) = self.keys.refresh_for_unknown_key(&kid).await? {
                    keys = refreshed;
                }
            }
        }

        verify_id_token(
            raw_token,
            &keys,
            &TokenExpectations {
                client_id: &self.client_id,
                issuer: &self.issuer,
                nonce,
                tenant_claim: &self.tenant_claim,
            },
        )
    }

    pub fn end_session_url(&self, id_token_hint: Option<&str>) -> Url {
        let mut url = self.end_session_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("post_logout_redirect_uri", &self.post_logout_redirect_uri);
            query.append_pair("client_id", self.client_id.as_str());
            if let Some(hint) = id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
        }
        url
    }

    pub fn signing_keys(&self) -> &Arc<SigningKeys> {
        &self.keys
    }
}
