//! Deterministic signing fixtures for tests.
//!
//! `TestKeypair` produces reproducible Ed25519 keys: the same seed always
//! yields the same keypair, so JWKS documents and signed tokens are stable
//! across test runs. Test-only; production code never signs tokens.

use crate::jwt::RegisteredClaims;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use thiserror::Error;

/// Test fixture error type.
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// Ed25519 keypair for signing test tokens.
pub struct TestKeypair {
    kid: String,
    public_key_bytes: Vec<u8>,
    private_key_pkcs8: Vec<u8>,
}

impl TestKeypair {
    /// Create a deterministic keypair from `seed`, published under `kid`.
    ///
    /// # Errors
    ///
    /// Returns `FixtureError::Crypto` if ring rejects the derived seed.
    pub fn new(seed: u8, kid: &str) -> Result<Self, FixtureError> {
        let seed_bytes = seed_bytes(seed);

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
            .map_err(|e| FixtureError::Crypto(format!("Failed to create test keypair: {e:?}")))?;

        Ok(Self {
            kid: kid.to_string(),
            public_key_bytes: key_pair.public_key().as_ref().to_vec(),
            private_key_pkcs8: build_pkcs8_from_seed(&seed_bytes),
        })
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Sign `claims` with this key, setting `kid` in the header.
    ///
    /// # Errors
    ///
    /// Returns `FixtureError::Crypto` if signing fails.
    pub fn sign(&self, claims: &RegisteredClaims) -> Result<String, FixtureError> {
        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.clone());
        self.sign_with_header(&header, claims)
    }

    /// Sign `claims` with a caller-built header (e.g. missing or foreign `kid`).
    ///
    /// # Errors
    ///
    /// Returns `FixtureError::Crypto` if signing fails.
    pub fn sign_with_header(
        &self,
        header: &Header,
        claims: &RegisteredClaims,
    ) -> Result<String, FixtureError> {
        let encoding_key = EncodingKey::from_ed_der(&self.private_key_pkcs8);
        encode(header, claims, &encoding_key)
            .map_err(|e| FixtureError::Crypto(format!("Failed to sign token: {e}")))
    }

    /// The public key as an OKP JWK.
    #[must_use]
    pub fn jwk_json(&self) -> serde_json::Value {
        serde_json::json!({
            "kty": "OKP",
            "kid": self.kid,
            "crv": "Ed25519",
            "x": URL_SAFE_NO_PAD.encode(&self.public_key_bytes),
            "alg": "EdDSA",
            "use": "sig"
        })
    }
}

/// A JWKS document publishing `keys`.
#[must_use]
pub fn jwks_json(keys: &[&TestKeypair]) -> serde_json::Value {
    let keys: Vec<serde_json::Value> = keys.iter().map(|k| k.jwk_json()).collect();
    serde_json::json!({ "keys": keys })
}

fn seed_bytes(seed: u8) -> [u8; 32] {
    let mut seed_bytes = [0u8; 32];
    for (i, byte) in seed_bytes.iter_mut().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let i = i as u8;
        *byte = if i == 0 {
            seed
        } else {
            seed.wrapping_mul(i).wrapping_add(i)
        };
    }
    seed_bytes
}

/// Build a PKCS#8 v1 document (RFC 5208) from an Ed25519 seed.
///
/// ring does not expose PKCS#8 for a seeded keypair, so the fixed DER prefix
/// is written by hand.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);

    // Outer SEQUENCE, 46 bytes
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    // Version: INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // AlgorithmIdentifier SEQUENCE { OID 1.3.101.112 }
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // privateKey OCTET STRING wrapping OCTET STRING(32) seed
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);

    pkcs8
}
