//! Token signature verification and registered claim checks.

use crate::auth::resolver::{KeyResolver, Resolver};
use crate::errors::{Claim, JcpError};
use crate::models::{ValidateArgs, ValidateResults};
use common::jwt::{extract_key_hints, RegisteredClaims};
use jsonwebtoken::{decode, Validation};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Tests one allowed value against the token's claims.
type ClaimMatcher = fn(&RegisteredClaims, &str) -> bool;

/// Verifies tokens with keys from `R` and checks caller allow-lists.
pub struct ClaimsValidator<R: KeyResolver = Resolver> {
    resolver: R,
}

impl<R: KeyResolver> ClaimsValidator<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Verify `args.token` and check its `aud`, `iss` and `sub` claims.
    ///
    /// Time claims (`exp`, `nbf`) are enforced only when the token carries
    /// them.
    ///
    /// # Errors
    ///
    /// - `TokenInvalid` - bad header, unknown key, bad signature, expired
    /// - `ClaimMismatch` - first allow-list with no matching value
    /// - `KeyResolution` - resolver could not obtain the key
    #[instrument(skip_all)]
    pub async fn validate(
        &self,
        args: &ValidateArgs,
        cancel: &CancellationToken,
    ) -> Result<ValidateResults, JcpError> {
        let hints = extract_key_hints(&args.token)
            .map_err(|e| JcpError::TokenInvalid(e.to_string()))?;

        let key = self.resolver.resolve(&hints, cancel).await?;

        let mut validation = Validation::new(hints.alg);
        validation.required_spec_claims.clear();
        // Audience is checked against the caller's allow-list below
        validation.validate_aud = false;
        validation.validate_nbf = true;

        let token_data = decode::<RegisteredClaims>(&args.token, &key, &validation).map_err(|e| {
            tracing::debug!(target: "jcp.validator", kid = %hints.kid, error = %e, "Token verification failed");
            JcpError::TokenInvalid(e.to_string())
        })?;

        check_registered_claims(&token_data.claims, args)?;

        tracing::debug!(target: "jcp.validator", kid = %hints.kid, "Token validated");
        Ok(ValidateResults { success: true })
    }
}

/// Check allow-lists in the order `aud`, `iss`, `sub`, stopping at the first
/// mismatch. An empty allow-list always passes.
fn check_registered_claims(
    claims: &RegisteredClaims,
    args: &ValidateArgs,
) -> Result<(), JcpError> {
    let checks: [(Claim, &[String], ClaimMatcher); 3] = [
        (Claim::Aud, args.aud.as_slice(), |c, v| c.aud.contains(v)),
        (Claim::Iss, args.iss.as_slice(), |c, v| c.iss.as_deref() == Some(v)),
        (Claim::Sub, args.sub.as_slice(), |c, v| c.sub.as_deref() == Some(v)),
    ];

    for (claim, allowed, matches) in checks {
        if !allowed.is_empty() && !allowed.iter().any(|value| matches(claims, value)) {
            tracing::debug!(target: "jcp.validator", claim = %claim, "Registered claim mismatch");
            return Err(JcpError::ClaimMismatch(claim));
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use common::jwt::{Audience, KeyHints};
    use common::testing::TestKeypair;
    use jsonwebtoken::jwk::Jwk;
    use jsonwebtoken::{Algorithm, DecodingKey, Header};
    use std::collections::HashMap;

    /// Resolver over a fixed set of keys.
    struct StaticResolver {
        keys: HashMap<String, DecodingKey>,
    }

    impl StaticResolver {
        fn new(keypairs: &[&TestKeypair]) -> Self {
            let keys = keypairs
                .iter()
                .map(|k| {
                    let jwk: Jwk = serde_json::from_value(k.jwk_json()).unwrap();
                    (k.kid().to_string(), DecodingKey::from_jwk(&jwk).unwrap())
                })
                .collect();
            Self { keys }
        }
    }

    #[async_trait]
    impl KeyResolver for StaticResolver {
        async fn resolve(
            &self,
            hints: &KeyHints,
            _cancel: &CancellationToken,
        ) -> Result<DecodingKey, JcpError> {
            self.keys
                .get(&hints.kid)
                .cloned()
                .ok_or_else(|| JcpError::TokenInvalid("no key found".to_string()))
        }
    }

    /// Resolver that always fails like an unreachable key source.
    struct UnavailableResolver;

    #[async_trait]
    impl KeyResolver for UnavailableResolver {
        async fn resolve(
            &self,
            _hints: &KeyHints,
            _cancel: &CancellationToken,
        ) -> Result<DecodingKey, JcpError> {
            Err(JcpError::KeyResolution("source unreachable".to_string()))
        }
    }

    fn now() -> f64 {
        chrono::Utc::now().timestamp() as f64
    }

    fn full_claims() -> RegisteredClaims {
        RegisteredClaims {
            iss: Some("https://issuer.example.com".to_string()),
            sub: Some("user-123".to_string()),
            aud: Audience::from(vec!["api".to_string(), "web".to_string()]),
            exp: Some(now() + 3600.0),
            nbf: None,
            iat: Some(now()),
        }
    }

    fn args(token: String) -> ValidateArgs {
        ValidateArgs {
            token,
            ..ValidateArgs::default()
        }
    }

    fn split_token(token: &str) -> (&str, &str, &str) {
        let mut parts = token.split('.');
        (
            parts.next().unwrap(),
            parts.next().unwrap(),
            parts.next().unwrap(),
        )
    }

    fn setup() -> (TestKeypair, ClaimsValidator<StaticResolver>) {
        let keypair = TestKeypair::new(1, "key-1").unwrap();
        let validator = ClaimsValidator::new(StaticResolver::new(&[&keypair]));
        (keypair, validator)
    }

    async fn run(
        validator: &ClaimsValidator<StaticResolver>,
        args: &ValidateArgs,
    ) -> Result<ValidateResults, JcpError> {
        validator.validate(args, &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_no_constraints_accepts_valid_token() {
        let (keypair, validator) = setup();
        let token = keypair.sign(&full_claims()).unwrap();

        let results = run(&validator, &args(token)).await.unwrap();
        assert!(results.success);
    }

    #[tokio::test]
    async fn test_token_without_time_claims_accepted() {
        let (keypair, validator) = setup();
        let token = keypair.sign(&RegisteredClaims::default()).unwrap();

        assert!(run(&validator, &args(token)).await.is_ok());
    }

    #[tokio::test]
    async fn test_matching_allow_lists_accepted() {
        let (keypair, validator) = setup();
        let token = keypair.sign(&full_claims()).unwrap();

        let args = ValidateArgs {
            token,
            aud: vec!["other".to_string(), "web".to_string()],
            iss: vec!["https://issuer.example.com".to_string()],
            sub: vec!["user-123".to_string()],
        };
        assert!(run(&validator, &args).await.is_ok());
    }

    #[tokio::test]
    async fn test_string_audience_matches() {
        let (keypair, validator) = setup();
        let claims = RegisteredClaims {
            aud: Audience::from("api"),
            ..full_claims()
        };
        let token = keypair.sign(&claims).unwrap();

        let args = ValidateArgs {
            aud: vec!["api".to_string()],
            ..args(token)
        };
        assert!(run(&validator, &args).await.is_ok());
    }

    #[tokio::test]
    async fn test_aud_mismatch() {
        let (keypair, validator) = setup();
        let token = keypair.sign(&full_claims()).unwrap();

        let args = ValidateArgs {
            aud: vec!["billing".to_string()],
            ..args(token)
        };
        let result = run(&validator, &args).await;
        assert!(matches!(result, Err(JcpError::ClaimMismatch(Claim::Aud))));
    }

    #[tokio::test]
    async fn test_aud_mismatch_short_circuits_later_checks() {
        let (keypair, validator) = setup();
        let token = keypair.sign(&full_claims()).unwrap();

        let args = ValidateArgs {
            token,
            aud: vec!["billing".to_string()],
            iss: vec!["someone-else".to_string()],
            sub: vec!["nobody".to_string()],
        };
        let result = run(&validator, &args).await;
        assert!(matches!(result, Err(JcpError::ClaimMismatch(Claim::Aud))));
    }

    #[tokio::test]
    async fn test_iss_mismatch() {
        let (keypair, validator) = setup();
        let token = keypair.sign(&full_claims()).unwrap();

        let args = ValidateArgs {
            token,
            aud: vec!["api".to_string()],
            iss: vec!["https://other.example.com".to_string()],
            sub: vec!["nobody".to_string()],
        };
        let result = run(&validator, &args).await;
        assert!(matches!(result, Err(JcpError::ClaimMismatch(Claim::Iss))));
    }

    #[tokio::test]
    async fn test_sub_mismatch() {
        let (keypair, validator) = setup();
        let token = keypair.sign(&full_claims()).unwrap();

        let args = ValidateArgs {
            sub: vec!["user-456".to_string()],
            ..args(token)
        };
        let result = run(&validator, &args).await;
        assert!(matches!(result, Err(JcpError::ClaimMismatch(Claim::Sub))));
    }

    #[tokio::test]
    async fn test_allow_list_against_absent_claim_fails() {
        let (keypair, validator) = setup();
        let token = keypair.sign(&RegisteredClaims::default()).unwrap();

        let args = ValidateArgs {
            iss: vec![String::new()],
            ..args(token)
        };
        let result = run(&validator, &args).await;
        assert!(matches!(result, Err(JcpError::ClaimMismatch(Claim::Iss))));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let (keypair, validator) = setup();
        let claims = RegisteredClaims {
            exp: Some(now() - 3600.0),
            ..full_claims()
        };
        let token = keypair.sign(&claims).unwrap();

        let result = run(&validator, &args(token)).await;
        assert!(matches!(result, Err(JcpError::TokenInvalid(_))));
    }

    #[tokio::test]
    async fn test_fractional_time_claims_accepted() {
        let (keypair, validator) = setup();
        let claims = RegisteredClaims {
            iss: Some("a".to_string()),
            exp: Some(now() + 3600.5),
            iat: Some(now() - 0.25),
            ..RegisteredClaims::default()
        };
        let token = keypair.sign(&claims).unwrap();

        let results = run(&validator, &args(token)).await.unwrap();
        assert!(results.success);
    }

    #[tokio::test]
    async fn test_fractional_expired_token_rejected() {
        let (keypair, validator) = setup();
        let claims = RegisteredClaims {
            exp: Some(now() - 3600.5),
            ..full_claims()
        };
        let token = keypair.sign(&claims).unwrap();

        let result = run(&validator, &args(token)).await;
        assert!(matches!(result, Err(JcpError::TokenInvalid(_))));
    }

    #[tokio::test]
    async fn test_not_yet_valid_token_rejected() {
        let (keypair, validator) = setup();
        let claims = RegisteredClaims {
            nbf: Some(now() + 3600.0),
            ..full_claims()
        };
        let token = keypair.sign(&claims).unwrap();

        let result = run(&validator, &args(token)).await;
        assert!(matches!(result, Err(JcpError::TokenInvalid(_))));
    }

    #[tokio::test]
    async fn test_wrong_signing_key_rejected() {
        let (_, validator) = setup();
        // Same kid, different key material
        let impostor = TestKeypair::new(99, "key-1").unwrap();
        let token = impostor.sign(&full_claims()).unwrap();

        let result = run(&validator, &args(token)).await;
        assert!(matches!(result, Err(JcpError::TokenInvalid(_))));
    }

    #[tokio::test]
    async fn test_tampered_payload_rejected() {
        let (keypair, validator) = setup();
        let token = keypair.sign(&full_claims()).unwrap();

        let other = keypair
            .sign(&RegisteredClaims {
                sub: Some("admin".to_string()),
                ..full_claims()
            })
            .unwrap();
        let (header, _, signature) = split_token(&token);
        let (_, payload, _) = split_token(&other);
        let tampered = format!("{header}.{payload}.{signature}");

        let result = run(&validator, &args(tampered)).await;
        assert!(matches!(result, Err(JcpError::TokenInvalid(_))));
    }

    #[tokio::test]
    async fn test_missing_kid_rejected() {
        let (keypair, validator) = setup();
        let header = Header::new(Algorithm::EdDSA);
        let token = keypair.sign_with_header(&header, &full_claims()).unwrap();

        let result = run(&validator, &args(token)).await;
        assert!(matches!(result, Err(JcpError::TokenInvalid(_))));
    }

    #[tokio::test]
    async fn test_unknown_kid_rejected() {
        let (_, validator) = setup();
        let stranger = TestKeypair::new(2, "key-2").unwrap();
        let token = stranger.sign(&full_claims()).unwrap();

        let result = run(&validator, &args(token)).await;
        assert!(matches!(result, Err(JcpError::TokenInvalid(_))));
    }

    #[tokio::test]
    async fn test_malformed_tokens_rejected() {
        let (_, validator) = setup();

        for token in ["", "abc", "a.b", "a.b.c", "a.b.c.d"] {
            let result = run(&validator, &args(token.to_string())).await;
            assert!(
                matches!(result, Err(JcpError::TokenInvalid(_))),
                "token {token:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_resolver_error_kind_preserved() {
        let keypair = TestKeypair::new(1, "key-1").unwrap();
        let validator = ClaimsValidator::new(UnavailableResolver);
        let token = keypair.sign(&full_claims()).unwrap();

        let result = validator
            .validate(&args(token), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(JcpError::KeyResolution(_))));
    }
}
