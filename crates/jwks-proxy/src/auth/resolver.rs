//! Key resolution across one or more JWK Set sources.

use crate::auth::jwks::{CachedKey, JwksSource, RefreshOutcome};
use crate::config::KeySourceConfig;
use crate::errors::JcpError;
use async_trait::async_trait;
use common::jwt::KeyHints;
use futures::future::{join_all, try_join_all};
use jsonwebtoken::{Algorithm, DecodingKey};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

/// Source of verification keys for tokens.
///
/// Implementations must be safe for unlimited concurrent use.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Resolve the key that verifies a token carrying `hints`.
    ///
    /// # Errors
    ///
    /// - `TokenInvalid` - no key matches the token's `kid` and `alg`
    /// - `KeyResolution` - the key could not be obtained, or `cancel` fired
    async fn resolve(
        &self,
        hints: &KeyHints,
        cancel: &CancellationToken,
    ) -> Result<DecodingKey, JcpError>;
}

/// Several JWK Set sources searched in endpoint order.
pub struct MultiJwksSource {
    sources: Vec<JwksSource>,
}

impl MultiJwksSource {
    /// Bootstrap every source concurrently.
    ///
    /// # Errors
    ///
    /// Returns the first `JcpError::KeySource` encountered. Sources that were
    /// already started are dropped, which stops their refresh tasks.
    pub async fn bootstrap(
        sources: &BTreeMap<String, KeySourceConfig>,
    ) -> Result<Self, JcpError> {
        let sources = try_join_all(
            sources
                .iter()
                .map(|(endpoint, config)| JwksSource::bootstrap(endpoint, *config)),
        )
        .await?;

        Ok(Self { sources })
    }

    pub fn sources(&self) -> &[JwksSource] {
        &self.sources
    }
}

/// The key resolver used by the proxy, shaped once at construction.
pub enum Resolver {
    Single(JwksSource),
    Multi(MultiJwksSource),
}

impl Resolver {
    /// Sources in search order.
    pub fn sources(&self) -> &[JwksSource] {
        match self {
            Resolver::Single(source) => std::slice::from_ref(source),
            Resolver::Multi(multi) => multi.sources(),
        }
    }

    /// Stop all background refresh tasks.
    pub fn shutdown(&self) {
        for source in self.sources() {
            source.shutdown();
        }
    }
}

#[async_trait]
impl KeyResolver for Resolver {
    async fn resolve(
        &self,
        hints: &KeyHints,
        cancel: &CancellationToken,
    ) -> Result<DecodingKey, JcpError> {
        find_key(self.sources(), hints, cancel).await
    }
}

/// Result of searching the cached keys of every source.
enum Search {
    Found(DecodingKey),
    /// Only keys restricted to another algorithm carry the `kid`.
    AlgorithmMismatch(Algorithm),
    Missing,
}

/// Search `sources` for `hints.kid`, refreshing once on a miss.
async fn find_key(
    sources: &[JwksSource],
    hints: &KeyHints,
    cancel: &CancellationToken,
) -> Result<DecodingKey, JcpError> {
    if cancel.is_cancelled() {
        return Err(JcpError::KeyResolution("request cancelled".to_string()));
    }

    match search(sources, hints).await {
        Search::Found(key) => return Ok(key),
        Search::AlgorithmMismatch(alg) => return Err(algorithm_mismatch(hints, alg)),
        Search::Missing => {}
    }

    tracing::debug!(
        target: "jcp.auth.jwks",
        kid = %hints.kid,
        "Key not cached, refreshing key sources"
    );

    let outcomes = tokio::select! {
        outcomes = join_all(sources.iter().map(|source| source.refresh_on_demand())) => outcomes,
        () = cancel.cancelled() => {
            return Err(JcpError::KeyResolution(
                "request cancelled during key refresh".to_string(),
            ));
        }
    };

    match search(sources, hints).await {
        Search::Found(key) => return Ok(key),
        Search::AlgorithmMismatch(alg) => return Err(algorithm_mismatch(hints, alg)),
        Search::Missing => {}
    }

    let refresh_failed = outcomes
        .iter()
        .any(|outcome| matches!(outcome, RefreshOutcome::Failed(_)));
    if refresh_failed {
        return Err(JcpError::KeyResolution(format!(
            "key {:?} not found and a key source could not be refreshed",
            hints.kid
        )));
    }

    tracing::debug!(target: "jcp.auth.jwks", kid = %hints.kid, "Key not found in any key source");
    Err(JcpError::TokenInvalid(format!(
        "no key found for kid {:?}",
        hints.kid
    )))
}

/// First key (in source order) with the token's `kid` that may be used with
/// the token's `alg`. A key restricted to another algorithm does not stop the
/// search.
async fn search(sources: &[JwksSource], hints: &KeyHints) -> Search {
    let mut mismatch = None;
    for source in sources {
        if let Some(cached) = source.lookup(&hints.kid).await {
            match check_algorithm(cached, hints) {
                Ok(key) => return Search::Found(key),
                Err(alg) => mismatch = mismatch.or(Some(alg)),
            }
        }
    }

    match mismatch {
        Some(alg) => Search::AlgorithmMismatch(alg),
        None => Search::Missing,
    }
}

/// The key, unless it is restricted to an algorithm other than the token's.
fn check_algorithm(cached: CachedKey, hints: &KeyHints) -> Result<DecodingKey, Algorithm> {
    match cached.alg {
        Some(alg) if alg != hints.alg => Err(alg),
        _ => Ok(cached.key),
    }
}

fn algorithm_mismatch(hints: &KeyHints, key_alg: Algorithm) -> JcpError {
    tracing::debug!(target: "jcp.auth.jwks", kid = %hints.kid, token_alg = ?hints.alg, key_alg = ?key_alg, "Key algorithm mismatch");
    JcpError::TokenInvalid(format!(
        "token algorithm {:?} does not match key algorithm {key_alg:?}",
        hints.alg
    ))
}
