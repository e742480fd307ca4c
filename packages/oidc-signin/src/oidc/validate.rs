use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use openidconnect::core::{
    CoreGenderClaim, CoreIdTokenVerifier, CoreJsonWebKeySet, CoreJweContentEncryptionAlgorithm,
    CoreJwsSigningAlgorithm,
};
use openidconnect::{AdditionalClaims, ClientId, IdToken, IssuerUrl, Nonce};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Every claim openidconnect does not model itself, keyed by claim name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtraClaims {
    #[serde(flatten)]
    pub claims: HashMap<String, serde_json::Value>,
}

impl AdditionalClaims for ExtraClaims {}

pub type SignInIdToken = IdToken<
    ExtraClaims,
    CoreGenderClaim,
    CoreJweContentEncryptionAlgorithm,
    CoreJwsSigningAlgorithm,
>;

/// Claims of an id token whose signature, audience, expiry and nonce have
/// been checked. Only [`verify_id_token`] constructs one outside tests.
#[derive(Debug, Clone)]
pub struct ValidatedIdentity {
    pub issuer: String,
    pub subject: String,
    pub tenant_id: Option<String>,
    pub name: Option<String>,
    pub preferred_username: Option<String>,
    pub email: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub claims: BTreeMap<String, String>,
    pub raw_token: String,
}

pub struct TokenExpectations<'a> {
    pub client_id: &'a ClientId,
    pub issuer: &'a IssuerUrl,
    pub nonce: &'a str,
    pub tenant_claim: &'a str,
}

/// The `kid` named in the token's JOSE header, if it has one. The header
/// is read unverified and only used to choose keys.
pub fn token_key_id(raw_token: &str) -> Option<String> {
    let header = raw_token.split('.').next()?;
    let bytes = URL_SAFE_NO_PAD.decode(header).ok()?;
    let header: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    header.get("kid")?.as_str().map(str::to_string)
}

pub fn verify_id_token(
    raw_token: &str,
    keys: &CoreJsonWebKeySet,
    expected: &TokenExpectations<'_>,
) -> Result<ValidatedIdentity> {
    let id_token = SignInIdToken::from_str(raw_token)
        .map_err(|e| AuthError::TokenValidation(format!("unparsable id token: {e}")))?;

    // Issuer matching stays off: the tenant policy hook decides which
    // issuers are acceptable.
    let verifier = CoreIdTokenVerifier::new_public_client(
        expected.client_id.clone(),
        expected.issuer.clone(),
        keys.clone(),
    )
    .require_issuer_match(false);

    let nonce = Nonce::new(expected.nonce.to_string());
    let claims = id_token
        .claims(&verifier, &nonce)
        .map_err(|e| AuthError::TokenValidation(e.to_string()))?;

    let extra = &claims.additional_claims().claims;
    let tenant_id = extra
        .get(expected.tenant_claim)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    let name = claims
        .name()
        .and_then(|n| n.get(None).map(|v| (**v).clone()));
    let preferred_username = claims.preferred_username().map(|u| (**u).clone());
    let email = claims.email().map(|e| (**e).clone());

    let claims_for_display = extra
        .iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect();

    Ok(ValidatedIdentity {
        issuer: claims.issuer().as_str().to_string(),
        subject: claims.subject().as_str().to_string(),
        tenant_id,
        name,
        preferred_username,
        email,
        expires_at: claims.expiration(),
        claims: claims_for_display,
        raw_token: raw_token.to_string(),
    })
}
