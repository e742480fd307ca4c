//! Multi-tenant acceptance policy.
//!
//! Issuer matching is disabled in the token verifier because multi-tenant
//! authorities publish a templated issuer. The tenant policy is what decides
//! which organisations may sign in instead.

use std::collections::BTreeSet;

use crate::error::{AuthError, Result};
use crate::oidc::ValidatedIdentity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantPolicy {
    /// Only the listed tenant ids are accepted. An empty list accepts nobody.
    AllowListed(BTreeSet<String>),
    /// Any tenant may sign in. Must be opted into explicitly.
    AnyTenant,
}

impl TenantPolicy {
    pub fn allow_listed<I, S>(tenants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        TenantPolicy::AllowListed(
            tenants
                .into_iter()
                .map(|t| normalize(t.as_ref()))
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }

    pub fn evaluate(&self, identity: &ValidatedIdentity) -> Result<()> {
        let allowed = match self {
            TenantPolicy::AnyTenant => return Ok(()),
            TenantPolicy::AllowListed(allowed) => allowed,
        };

        let tenant = identity.tenant_id.as_deref().ok_or_else(|| {
            AuthError::PolicyRejection(format!(
                "token for subject '{}' carries no tenant claim",
                identity.subject
            ))
        })?;

        if allowed.contains(&normalize(tenant)) {
            Ok(())
        } else {
            Err(AuthError::PolicyRejection(format!(
                "tenant '{tenant}' is not on the allow-list"
            )))
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TenantPolicy::AnyTenant => "any tenant".to_string(),
            TenantPolicy::AllowListed(allowed) if allowed.is_empty() => {
                "empty allow-list (all sign-ins rejected)".to_string()
            }
            TenantPolicy::AllowListed(allowed) => format!("{} allowed tenant(s)", allowed.len()),
        }
    }
}

fn normalize(tenant: &str) -> String {
    tenant.trim().to_ascii_lowercase()
}
