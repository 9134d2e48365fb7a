//! Remote JWK Set source with a refreshed in-memory key cache.
//!
//! A `JwksSource` fetches one JWK Set endpoint when it is bootstrapped and
//! then keeps the cached keys current from a background task. Lookups never
//! touch the network; the resolver asks for an on-demand refresh when a `kid`
//! is unknown, and those refreshes are rate limited per source.
//!
//! # Security
//!
//! - Keys marked `use: enc` are never used for signature verification
//! - Keys that fail to parse are skipped rather than failing the whole set
//! - A failed refresh keeps the previously cached keys

use crate::config::KeySourceConfig;
use crate::errors::JcpError;
use jsonwebtoken::jwk::{Jwk, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use url::Url;

/// Minimum time between on-demand refreshes of one source.
pub const ON_DEMAND_REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

/// A verification key taken from a JWK Set.
#[derive(Clone)]
pub struct CachedKey {
    /// Key material for signature verification.
    pub key: DecodingKey,

    /// Algorithm the JWK is restricted to, if it declares one.
    pub alg: Option<Algorithm>,
}

/// Result of an on-demand refresh request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The set was fetched and the cache replaced.
    Refreshed,
    /// A refresh succeeded within the cooldown window; nothing was fetched.
    RateLimited,
    /// The fetch failed, now or within the cooldown window; the previous
    /// cache is kept.
    Failed(String),
}

/// The last on-demand refresh of a source.
struct OnDemandAttempt {
    at: Instant,
    failure: Option<String>,
}

/// Wire shape of a JWK Set. Keys are kept as raw JSON so that one bad key
/// does not reject the whole document.
#[derive(Deserialize)]
struct JwkSetDocument {
    keys: Vec<serde_json::Value>,
}

/// State shared between a source and its background refresh task.
struct SourceInner {
    endpoint: String,
    http_client: reqwest::Client,
    refresh_timeout: Duration,
    keys: RwLock<HashMap<String, CachedKey>>,
    last_on_demand: Mutex<Option<OnDemandAttempt>>,
}

/// One remote JWK Set endpoint and its cached keys.
///
/// Dropping the source stops its background refresh task.
pub struct JwksSource {
    inner: Arc<SourceInner>,
    shutdown: CancellationToken,
}

impl JwksSource {
    /// Fetch `endpoint` once and start refreshing it in the background.
    ///
    /// # Errors
    ///
    /// Returns `JcpError::KeySource` if the endpoint is not an http(s) URL, or
    /// if the first fetch fails or does not finish within the refresh timeout.
    #[instrument(skip_all, fields(endpoint = %endpoint))]
    pub async fn bootstrap(endpoint: &str, config: KeySourceConfig) -> Result<Self, JcpError> {
        let key_source_error = |reason: String| JcpError::KeySource {
            endpoint: endpoint.to_string(),
            reason,
        };

        let url = Url::parse(endpoint).map_err(|e| key_source_error(format!("invalid URL: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(key_source_error(format!(
                "unsupported URL scheme {:?}",
                url.scheme()
            )));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.refresh_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "jcp.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        let inner = Arc::new(SourceInner {
            endpoint: endpoint.to_string(),
            http_client,
            refresh_timeout: config.refresh_timeout,
            keys: RwLock::new(HashMap::new()),
            last_on_demand: Mutex::new(None),
        });

        let key_count = inner.refresh().await.map_err(key_source_error)?;
        if key_count == 0 {
            tracing::warn!(
                target: "jcp.auth.jwks",
                endpoint = %endpoint,
                "JWK Set contains no usable signing keys"
            );
        }

        let shutdown = CancellationToken::new();
        tokio::spawn(run_refresh_loop(
            Arc::clone(&inner),
            config.refresh_interval,
            shutdown.clone(),
        ));

        tracing::info!(
            target: "jcp.auth.jwks",
            endpoint = %endpoint,
            key_count,
            refresh_interval = ?config.refresh_interval,
            "JWK Set source ready"
        );

        Ok(Self { inner, shutdown })
    }

    #[cfg(test)]
    pub(crate) fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Look up a cached key by `kid`.
    pub async fn lookup(&self, kid: &str) -> Option<CachedKey> {
        self.inner.keys.read().await.get(kid).cloned()
    }

    #[cfg(test)]
    pub(crate) async fn key_count(&self) -> usize {
        self.inner.keys.read().await.len()
    }

    /// Refresh the cache now unless a refresh ran within the cooldown.
    ///
    /// Concurrent callers are serialised, so a burst of requests for an
    /// unknown `kid` causes at most one fetch. Within the cooldown a failed
    /// attempt keeps reporting `Failed`.
    pub async fn refresh_on_demand(&self) -> RefreshOutcome {
        let mut last = self.inner.last_on_demand.lock().await;
        if let Some(attempt) = last.as_ref() {
            if attempt.at.elapsed() < ON_DEMAND_REFRESH_COOLDOWN {
                tracing::debug!(
                    target: "jcp.auth.jwks",
                    endpoint = %self.inner.endpoint,
                    failed = attempt.failure.is_some(),
                    "On-demand refresh skipped (cooldown)"
                );
                return match &attempt.failure {
                    Some(reason) => RefreshOutcome::Failed(reason.clone()),
                    None => RefreshOutcome::RateLimited,
                };
            }
        }

        let at = Instant::now();
        let outcome = match self.inner.refresh().await {
            Ok(_) => RefreshOutcome::Refreshed,
            Err(reason) => {
                tracing::warn!(
                    target: "jcp.auth.jwks",
                    endpoint = %self.inner.endpoint,
                    error = %reason,
                    "On-demand JWK Set refresh failed"
                );
                RefreshOutcome::Failed(reason)
            }
        };

        let failure = match &outcome {
            RefreshOutcome::Failed(reason) => Some(reason.clone()),
            _ => None,
        };
        *last = Some(OnDemandAttempt { at, failure });

        outcome
    }

    /// Stop the background refresh task. Cached keys stay usable.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for JwksSource {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl SourceInner {
    /// Fetch the set and replace the cache. Returns the new key count.
    async fn refresh(&self) -> Result<usize, String> {
        let keys = tokio::time::timeout(self.refresh_timeout, self.fetch())
            .await
            .map_err(|_| format!("timed out after {:?}", self.refresh_timeout))??;

        let key_count = keys.len();
        *self.keys.write().await = keys;

        tracing::debug!(
            target: "jcp.auth.jwks",
            endpoint = %self.endpoint,
            key_count,
            "JWK Set cache refreshed"
        );

        Ok(key_count)
    }

    async fn fetch(&self) -> Result<HashMap<String, CachedKey>, String> {
        let response = self
            .http_client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("unexpected status {status}"));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;

        parse_jwk_set(&self.endpoint, &body)
    }
}

/// Refresh `inner` every `interval` until `shutdown` is cancelled.
async fn run_refresh_loop(
    inner: Arc<SourceInner>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Keep serving the old keys; the next tick retries
                if let Err(reason) = inner.refresh().await {
                    tracing::warn!(
                        target: "jcp.auth.jwks",
                        endpoint = %inner.endpoint,
                        error = %reason,
                        "Background JWK Set refresh failed"
                    );
                }
            }
            () = shutdown.cancelled() => {
                tracing::debug!(
                    target: "jcp.auth.jwks",
                    endpoint = %inner.endpoint,
                    "JWK Set refresh task stopped"
                );
                break;
            }
        }
    }
}

/// Parse a JWK Set document into verification keys keyed by `kid`.
///
/// Unusable keys are skipped with a warning. The first key wins when a `kid`
/// repeats.
fn parse_jwk_set(endpoint: &str, body: &[u8]) -> Result<HashMap<String, CachedKey>, String> {
    let document: JwkSetDocument =
        serde_json::from_slice(body).map_err(|e| format!("invalid JWK Set document: {e}"))?;

    let mut keys = HashMap::with_capacity(document.keys.len());
    for raw in document.keys {
        let jwk: Jwk = match serde_json::from_value(raw) {
            Ok(jwk) => jwk,
            Err(e) => {
                tracing::warn!(target: "jcp.auth.jwks", endpoint = %endpoint, error = %e, "Skipping unparsable JWK");
                continue;
            }
        };

        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            tracing::debug!(target: "jcp.auth.jwks", endpoint = %endpoint, "Skipping encryption JWK");
            continue;
        }

        let Some(kid) = jwk.common.key_id.clone() else {
            tracing::warn!(target: "jcp.auth.jwks", endpoint = %endpoint, "Skipping JWK without kid");
            continue;
        };

        let alg = match jwk.common.key_algorithm.as_ref() {
            None => None,
            Some(key_alg) => match signing_algorithm(key_alg) {
                Some(alg) => Some(alg),
                None => {
                    tracing::warn!(target: "jcp.auth.jwks", endpoint = %endpoint, kid = %kid, alg = ?key_alg, "Skipping JWK with unsupported algorithm");
                    continue;
                }
            },
        };

        let key = match DecodingKey::from_jwk(&jwk) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(target: "jcp.auth.jwks", endpoint = %endpoint, kid = %kid, error = %e, "Skipping JWK with invalid key material");
                continue;
            }
        };

        if keys.contains_key(&kid) {
            tracing::warn!(target: "jcp.auth.jwks", endpoint = %endpoint, kid = %kid, "Skipping JWK with duplicate kid");
            continue;
        }
        keys.insert(kid, CachedKey { key, alg });
    }

    Ok(keys)
}

/// Map a JWK `alg` to a JWS signing algorithm. Encryption algorithms map to
/// `None`.
fn signing_algorithm(alg: &KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}
