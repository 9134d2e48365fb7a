//! Proxy construction from configured key sources.

use crate::auth::jwks::JwksSource;
use crate::auth::resolver::{MultiJwksSource, Resolver};
use crate::config::KeySourceConfig;
use crate::errors::JcpError;
use crate::services::validator::ClaimsValidator;
use std::collections::BTreeMap;

/// Build a validator bound to `sources`.
///
/// One source yields a single-source resolver; several yield a multi-source
/// resolver that searches them in endpoint order. Every source is fetched
/// once before this returns.
///
/// # Errors
///
/// - `NoConfiguration` - `sources` is empty
/// - `KeySource` - a source could not be bootstrapped
pub async fn build_validator(
    sources: &BTreeMap<String, KeySourceConfig>,
) -> Result<ClaimsValidator, JcpError> {
    let resolver = match sources.len() {
        0 => return Err(JcpError::NoConfiguration),
        1 => {
            let (endpoint, config) = sources.iter().next().ok_or(JcpError::NoConfiguration)?;
            Resolver::Single(JwksSource::bootstrap(endpoint, *config).await?)
        }
        _ => Resolver::Multi(MultiJwksSource::bootstrap(sources).await?),
    };

    tracing::info!(
        target: "jcp.proxy",
        source_count = sources.len(),
        "Token validator ready"
    );

    Ok(ClaimsValidator::new(resolver))
}
