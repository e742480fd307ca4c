use std::sync::Arc;

use oidc_signin::policy::TenantPolicy;
use oidc_signin::{AppConfig, AppState, OidcProvider};
use tower_sessions::MemoryStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let app_config = AppConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    });

    match &app_config.oidc.tenant_policy {
        TenantPolicy::AnyTenant => {
            tracing::warn!("OIDC_ALLOW_ANY_TENANT is set: users from any tenant can sign in")
        }
        policy => tracing::info!(policy = %policy.describe(), "tenant policy loaded"),
    }

    let http_client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(app_config.oidc.http_timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to build HTTP client");
            std::process::exit(1);
        });

    let provider = match OidcProvider::discover(
        &app_config.oidc,
        &app_config.redirect_uri(),
        http_client,
    )
    .await
    {
        Ok(provider) => provider,
        Err(e) => {
            tracing::error!(error = %e, "OIDC discovery failed");
            std::process::exit(1);
        }
    };

    // Warm the key cache; a failure here is retried on the first sign-in.
    if let Err(e) = provider.signing_keys().get().await {
        tracing::warn!(error = %e, "initial signing key fetch failed");
    }
    let _refresh = Arc::clone(provider.signing_keys())
        .spawn_refresh(app_config.oidc.key_refresh_interval);

    let addr = app_config.listen_addr;
    let app_state = AppState::new(app_config, provider);
    let app = oidc_signin::app(app_state, MemoryStore::default());

    tracing::info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to bind on {addr}");
            std::process::exit(1);
        });

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
