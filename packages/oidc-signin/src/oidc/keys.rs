//! Cache for the provider's published signing keys.
//!
//! Readers share an `Arc` to the current key set. A refresh builds a whole
//! new set and swaps it in, so a reader never observes a partial update.
//! Refreshes are serialized through `refresh_lock`.
//!
//! A token signed with a key id the cache does not know triggers an early
//! refetch, at most once per `min_refresh_interval`, so rotated keys are
//! picked up without waiting for the set to go stale.

use std::sync::Arc;
use std::time::{Duration, Instant};

use openidconnect::core::CoreJsonWebKeySet;
use openidconnect::JsonWebKey;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use url::Url;

use crate::error::{AuthError, Result};

const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct CachedKeys {
    keys: Arc<CoreJsonWebKeySet>,
    fetched_at: Instant,
}

pub struct SigningKeys {
    jwks_uri: Url,
    http: reqwest::Client,
    max_age: Duration,
    min_refresh_interval: Duration,
    current: RwLock<Option<CachedKeys>>,
    refresh_lock: Mutex<()>,
}

impl SigningKeys {
    pub fn new(jwks_uri: Url, http: reqwest::Client, max_age: Duration) -> Self {
        Self {
            jwks_uri,
            http,
            max_age,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Returns the cached key set, fetching it first when it is missing or
    /// older than `max_age`. A failed fetch fails this call only; the next
    /// call tries again.
    pub async fn get(&self) -> Result<Arc<CoreJsonWebKeySet>> {
        if let Some(keys) = self.fresh().await {
            return Ok(keys);
        }

        let _writer = self.refresh_lock.lock().await;
        // Another request may have refreshed while we waited for the lock.
        if let Some(keys) = self.fresh().await {
            return Ok(keys);
        }
        self.fetch_and_store().await
    }

    /// Unconditionally refetches the key set.
    pub async fn refresh(&self) -> Result<Arc<CoreJsonWebKeySet>> {
        let _writer = self.refresh_lock.lock().await;
        self.fetch_and_store().await
    }

    /// Refetches the key set because a token names `kid` and the cached set
    /// lacks it. Returns `None` when the cached set was fetched less than
    /// `min_refresh_interval` ago, so unknown key ids cannot hammer the
    /// provider.
    pub async fn refresh_for_unknown_key(
        &self,
        kid: &str,
    ) -> Result<Option<Arc<CoreJsonWebKeySet>>> {
        let _writer = self.refresh_lock.lock().await;
        if let Some(cached) = self.current.read().await.as_ref() {
            // A concurrent request may already have picked up the new key.
            if contains_key(&cached.keys, kid) {
                return Ok(Some(Arc::clone(&cached.keys)));
            }
            if cached.fetched_at.elapsed() < self.min_refresh_interval {
                tracing::debug!(kid, "unknown signing key, refetch throttled");
                return Ok(None);
            }
        }

        tracing::info!(kid, "unknown signing key, refetching key set");
        self.fetch_and_store().await.map(Some)
    }

    /// Refreshes the keys every `interval` in the background. Failures are
    /// logged and the previous set stays in place.
    pub fn spawn_refresh(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = self.refresh().await {
                    tracing::warn!(error = %e, "background signing key refresh failed");
                }
            }
        })
    }

    async fn fresh(&self) -> Option<Arc<CoreJsonWebKeySet>> {
        let current = self.current.read().await;
        current
            .as_ref()
            .filter(|cached| cached.fetched_at.elapsed() < self.max_age)
            .map(|cached| Arc::clone(&cached.keys))
    }

    async fn fetch_and_store(&self) -> Result<Arc<CoreJsonWebKeySet>> {
        let keys = Arc::new(self.fetch().await?);

        *self.current.write().await = Some(CachedKeys {
            keys: Arc::clone(&keys),
            fetched_at: Instant::now(),
        });

        tracing::info!(
            jwks_uri = %self.jwks_uri,
            keys = keys.keys().len(),
            "signing keys refreshed"
        );
        Ok(keys)
    }

    async fn fetch(&self) -> Result<CoreJsonWebKeySet> {
        let response = self
            .http
            .get(self.jwks_uri.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AuthError::TransientNetwork(format!("{}: {e}", self.jwks_uri)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::TransientNetwork(format!(
                "{} returned HTTP {status}",
                self.jwks_uri
            )));
        }

        response
            .json::<CoreJsonWebKeySet>()
            .await
            .map_err(|e| AuthError::TransientNetwork(format!("invalid key set: {e}")))
    }
}

pub fn contains_key(keys: &CoreJsonWebKeySet, kid: &str) -> bool {
    keys.keys()
        .iter()
        .any(|key| key.key_id().is_some_and(|id| id.as_str() == kid))
}
