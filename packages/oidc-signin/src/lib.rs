pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod oidc;
pub mod policy;
pub mod session;
pub mod state;

use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tower_sessions::SessionStore;

pub use config::AppConfig;
pub use error::AuthError;
pub use events::{AuthEvents, SignInEvents};
pub use oidc::OidcProvider;
pub use policy::TenantPolicy;
pub use state::AppState;

/// Builds the application router with its session layer on top of `store`.
pub fn app<S>(state: AppState, store: S) -> Router
where
    S: SessionStore + Clone,
{
    let session_layer = session::layer(store, &state.config.session);

    let protected_routes = Router::new()
        .route("/Home/Claims", get(handlers::claims))
        .route_layer(axum_middleware::from_fn(middleware::require_auth));

    let account_routes = Router::new()
        .route(middleware::LOGIN_PATH, get(auth::login))
        .route("/Account/LogOff", get(auth::logout))
        .route("/Account/Status", get(auth::status))
        .route(config::CALLBACK_PATH, post(auth::callback));

    Router::new()
        .route("/", get(handlers::index))
        .route(config::ERROR_PATH, get(handlers::error))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .merge(account_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
}
