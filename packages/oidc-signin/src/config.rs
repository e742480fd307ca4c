use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tower_sessions::cookie::Key;

use crate::error::{AuthError, Result};
use crate::policy::TenantPolicy;

const DEFAULT_AAD_INSTANCE: &str = "https://login.microsoftonline.com/{0}{1}";
const DEFAULT_TENANT: &str = "common";
const AUTHORITY_VERSION: &str = "/v2.0";
const DEFAULT_TENANT_CLAIM: &str = "tid";
const DEFAULT_KEY_REFRESH_SECS: u64 = 24 * 60 * 60;
const DEFAULT_KEY_MIN_REFRESH_SECS: u64 = 5 * 60;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_SESSION_IDLE_HOURS: u32 = 8;
const MIN_SESSION_SECRET_LEN: usize = 64;

pub const CALLBACK_PATH: &str = "/signin-oidc";
pub const ERROR_PATH: &str = "/Home/Error";

#[derive(Clone, Debug)]
pub struct OidcConfig {
    pub client_id: String,
    pub authority: String,
    pub post_logout_redirect_uri: String,
    pub end_session_url: Option<String>,
    pub tenant_claim: String,
    pub tenant_policy: TenantPolicy,
    pub key_refresh_interval: Duration,
    /// Shortest gap between refetches triggered by an unknown key id.
    pub key_min_refresh_interval: Duration,
    pub http_timeout: Duration,
}

#[derive(Clone)]
pub struct SessionConfig {
    pub signing_key: Key,
    pub secure: bool,
    pub idle_timeout: time::Duration,
}

#[derive(Clone)]
pub struct AppConfig {
    pub oidc: OidcConfig,
    pub session: SessionConfig,
    pub base_url: String,
    pub listen_addr: SocketAddr,
    pub error_path: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let client_id = var("OIDC_CLIENT_ID")
            .ok_or_else(|| AuthError::Config("OIDC_CLIENT_ID not set".into()))?;

        let base_url = var("BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let authority = match var("OIDC_AUTHORITY") {
            Some(authority) => authority,
            None => format_authority(
                &var("OIDC_AAD_INSTANCE").unwrap_or_else(|| DEFAULT_AAD_INSTANCE.to_string()),
                &var("OIDC_TENANT").unwrap_or_else(|| DEFAULT_TENANT.to_string()),
                AUTHORITY_VERSION,
            ),
        };
        url::Url::parse(&authority)
            .map_err(|e| AuthError::Config(format!("invalid authority '{authority}': {e}")))?;

        let post_logout_redirect_uri =
            var("OIDC_POST_LOGOUT_REDIRECT_URI").unwrap_or_else(|| format!("{base_url}/"));

        let allow_any_tenant = parse_flag(var("OIDC_ALLOW_ANY_TENANT").as_deref(), false);
        let tenant_policy = if allow_any_tenant {
            TenantPolicy::AnyTenant
        } else {
            TenantPolicy::allow_listed(
                var("OIDC_ALLOWED_TENANTS")
                    .unwrap_or_default()
                    .split(',')
                    .map(str::trim),
            )
        };

        let key_refresh_secs: u64 = parse_number(
            var("OIDC_JWKS_REFRESH_SECS"),
            "OIDC_JWKS_REFRESH_SECS",
            DEFAULT_KEY_REFRESH_SECS,
        )?;
        if key_refresh_secs == 0 {
            return Err(AuthError::Config(
                "OIDC_JWKS_REFRESH_SECS must be greater than zero".into(),
            ));
        }
        let key_min_refresh_secs: u64 = parse_number(
            var("OIDC_JWKS_MIN_REFRESH_SECS"),
            "OIDC_JWKS_MIN_REFRESH_SECS",
            DEFAULT_KEY_MIN_REFRESH_SECS,
        )?;
        let http_timeout_secs: u64 = parse_number(
            var("OIDC_HTTP_TIMEOUT_SECS"),
            "OIDC_HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
        )?;

        let signing_key = match var("SESSION_SECRET") {
            Some(secret) => session_key_from_base64(&secret)?,
            None => {
                tracing::warn!("SESSION_SECRET is not set, sessions will not survive a restart");
                Key::generate()
            }
        };
        let idle_hours: u32 = parse_number(
            var("SESSION_IDLE_HOURS"),
            "SESSION_IDLE_HOURS",
            DEFAULT_SESSION_IDLE_HOURS,
        )?;
        if idle_hours == 0 {
            return Err(AuthError::Config(
                "SESSION_IDLE_HOURS must be greater than zero".into(),
            ));
        }

        let listen_addr = var("LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .map_err(|e| AuthError::Config(format!("invalid LISTEN_ADDR: {e}")))?;

        Ok(Self {
            oidc: OidcConfig {
                client_id,
                authority,
                post_logout_redirect_uri,
                end_session_url: var("OIDC_END_SESSION_URL"),
                tenant_claim: var("OIDC_TENANT_CLAIM")
                    .unwrap_or_else(|| DEFAULT_TENANT_CLAIM.to_string()),
                tenant_policy,
                key_refresh_interval: Duration::from_secs(key_refresh_secs),
                key_min_refresh_interval: Duration::from_secs(key_min_refresh_secs),
                http_timeout: Duration::from_secs(http_timeout_secs),
            },
            session: SessionConfig {
                signing_key,
                secure: parse_flag(var("SESSION_COOKIE_SECURE").as_deref(), true),
                idle_timeout: time::Duration::hours(i64::from(idle_hours)),
            },
            base_url,
            listen_addr,
            error_path: ERROR_PATH.to_string(),
        })
    }

    pub fn redirect_uri(&self) -> String {
        format!("{}{CALLBACK_PATH}", self.base_url)
    }
}

/// Fills `{0}` with the tenant and `{1}` with the protocol version, e.g.
/// `https://login.microsoftonline.com/{0}{1}` becomes
/// `https://login.microsoftonline.com/common/v2.0`.
pub fn format_authority(template: &str, tenant: &str, version: &str) -> String {
    template.replace("{0}", tenant).replace("{1}", version)
}

fn session_key_from_base64(secret: &str) -> Result<Key> {
    let bytes = STANDARD
        .decode(secret.trim())
        .map_err(|e| AuthError::Config(format!("SESSION_SECRET is not valid base64: {e}")))?;
    if bytes.len() < MIN_SESSION_SECRET_LEN {
        return Err(AuthError::Config(format!(
            "SESSION_SECRET must decode to at least {MIN_SESSION_SECRET_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Key::try_from(bytes.as_slice())
        .map_err(|e| AuthError::Config(format!("unusable SESSION_SECRET: {e}")))
}

fn parse_flag(value: Option<&str>, default: bool) -> bool {
    value
        .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
        .unwrap_or(default)
}

fn parse_number<T: std::str::FromStr>(value: Option<String>, name: &str, default: T) -> Result<T> {
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| AuthError::Config(format!("{name} must be a number, got '{v}'"))),
        None => Ok(default),
    }
}
