//! Core data model: tokens, claims, keys, and persisted records.
//!
//! Types here are pure data — no I/O, no signing. They are shared across
//! the key store, codec, issuer resolver, JWKS federation, and exchange
//! state machine.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};

/// Compact token header. `alg` is always `"EdDSA"`; exactly one of `kid` or
/// `jwk` identifies the verification key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub alg: String,
    pub typ: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
}

impl Header {
    pub fn with_kid(kid: impl Into<String>) -> Self {
        Self {
            alg: "EdDSA".to_string(),
            typ: "JWT".to_string(),
            kid: Some(kid.into()),
            jwk: None,
        }
    }

    pub fn with_jwk(jwk: Jwk) -> Self {
        Self {
            alg: "EdDSA".to_string(),
            typ: "JWT".to_string(),
            kid: None,
            jwk: Some(jwk),
        }
    }

    pub fn is_self_signed(&self) -> bool {
        self.alg == "EdDSA" && self.jwk.is_some()
    }
}

/// A single public (and optionally private) Ed25519 key in JWK shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    pub crv: String,
    /// Base64url-no-pad public point.
    pub x: String,
    /// Base64url-no-pad private scalar, present only on self-signed tokens
    /// that embed a signing key. Never persisted or cached by the verifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    /// Key id, present on discovery records but not required on embedded
    /// per-token keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl Jwk {
    pub fn public(kid: impl Into<String>, x: impl Into<String>) -> Self {
        Self {
            kty: "OKP".to_string(),
            crv: "Ed25519".to_string(),
            x: x.into(),
            d: None,
            use_: "sig".to_string(),
            alg: "EdDSA".to_string(),
            kid: Some(kid.into()),
        }
    }

    /// Decode this key's public point into a verifying key.
    pub fn to_verifying_key(&self) -> AuthResult<VerifyingKey> {
        let bytes = URL_SAFE_NO_PAD
            .decode(&self.x)
            .map_err(|e| AuthError::MalformedToken(format!("invalid key encoding: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AuthError::MalformedToken("key has wrong length".to_string()))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|e| AuthError::MalformedToken(format!("invalid key: {e}")))
    }
}

/// Scope claim, tolerant of the three shapes a presented token may carry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Scopes {
    List(Vec<String>),
    Str(String),
    #[serde(with = "none_shim")]
    None,
}

/// `Option<T>` already has a natural `null` serde representation, but we
/// want `Scopes::None` to be a variant of the untagged enum rather than
/// wrapping the whole type in `Option`, so it round-trips through `null`
/// explicitly.
mod none_shim {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(s: S) -> Result<S::Ok, S::Error> {
        s.serialize_none()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<(), D::Error> {
        struct V;
        impl<'de> serde::de::Visitor<'de> for V {
            type Value = ();
            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("null")
            }
            fn visit_none<E>(self) -> Result<(), E> {
                Ok(())
            }
            fn visit_unit<E>(self) -> Result<(), E> {
                Ok(())
            }
        }
        d.deserialize_option(V)
    }
}

pub const DEFAULT_SCOPE: &str = "hytale:server hytale:client";

impl Scopes {
    /// Normalize to the wire string carried in the `scope` claim: `null` →
    /// default, list → space-joined in order with duplicates preserved,
    /// string → passed through verbatim.
    pub fn normalize(&self) -> String {
        match self {
            Self::None => DEFAULT_SCOPE.to_string(),
            Self::List(items) => items.join(" "),
            Self::Str(s) => s.clone(),
        }
    }
}

/// Decoded claim set. Unknown/extra fields are dropped — this service only
/// reads the claims it defines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimSet {
    pub sub: String,
    pub iss: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    pub iat: i64,
    pub exp: i64,
    /// Unique token id, fresh on every emission.
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "username")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "cnf")]
    pub confirmation: Option<Confirmation>,
}

/// Certificate-binding confirmation claim (RFC 8705 style `x5t#S256`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confirmation {
    #[serde(rename = "x5t#S256")]
    pub x5t_s256: String,
}

/// The service's own signing key, persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningKeyRecord {
    pub alg: String,
    pub kid: String,
    /// Base64url-no-pad encoded private scalar.
    pub private_scalar: String,
    /// Base64url-no-pad encoded public point.
    pub public_point: String,
    pub created_at: i64,
}

/// Discovery record published at `/.well-known/jwks.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub keys: Vec<Jwk>,
}

/// A cached foreign JWKS entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyRecord {
    pub issuer: String,
    pub kid: String,
    pub jwk: Jwk,
    pub fetched_at: i64,
}

/// Persisted session state: player → current identity/session token pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub player_id: String,
    pub display_name: Option<String>,
    pub audience: Option<String>,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Persisted grant state: audience-bound authorization grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantRecord {
    pub grant_id: String,
    pub subject: String,
    pub audience: String,
    pub scope: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_normalize_default() {
        assert_eq!(Scopes::None.normalize(), DEFAULT_SCOPE);
    }

    #[test]
    fn test_scopes_normalize_list_preserves_order_and_dupes() {
        let scopes = Scopes::List(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(scopes.normalize(), "a b a");
    }

    #[test]
    fn test_scopes_normalize_string_passthrough() {
        let scopes = Scopes::Str("custom:scope".into());
        assert_eq!(scopes.normalize(), "custom:scope");
    }

    #[test]
    fn test_scopes_deserialize_untagged() {
        let from_null: Scopes = serde_json::from_str("null").unwrap();
        assert_eq!(from_null, Scopes::None);

        let from_list: Scopes = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(from_list, Scopes::List(vec!["a".into(), "b".into()]));

        let from_str: Scopes = serde_json::from_str(r#""hytale:server""#).unwrap();
        assert_eq!(from_str, Scopes::Str("hytale:server".into()));
    }

    #[test]
    fn test_header_is_self_signed() {
        let jwk = Jwk::public("k1", "abc");
        let header = Header::with_jwk(jwk);
        assert!(header.is_self_signed());

        let header = Header::with_kid("k1");
        assert!(!header.is_self_signed());
    }
}
