//! Self-Signed Acceptance — embedded-key recognition, verification, and
//! bypass-token synthesis for offline/self-issued identity tokens.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{AuthError, AuthResult};
use crate::keystore::KeyStore;
use crate::token::{self, DecodedToken};
use crate::types::{ClaimSet, Confirmation, Header};

/// True if the header carries an embedded key recognizable as self-signed:
/// `alg == EdDSA` and a `jwk` with a public point. A private scalar (`d`)
/// may also be present but is never consulted by the verifier itself.
pub fn is_self_signed(header: &Header) -> bool {
    header.is_self_signed()
}

/// Verify a decoded self-signed token purely against its own embedded
/// public key.
pub fn verify_with_embedded_key(decoded: &DecodedToken) -> AuthResult<bool> {
    let jwk = decoded
        .header
        .jwk
        .as_ref()
        .ok_or_else(|| AuthError::MalformedToken("missing embedded jwk".to_string()))?;

    let verifying_key = jwk.to_verifying_key()?;
    Ok(token::verify(decoded, &verifying_key))
}

/// Whether authorize/exchange should substitute a bypass token: the
/// presented identity token is self-signed and the issuer's deployment
/// accepts the bypass policy.
pub fn should_bypass_exchange(header: &Header, settings: &Settings) -> bool {
    is_self_signed(header) && settings.accept_self_signed()
}

/// Synthesize a replacement access token per the bypass policy: `sub` from
/// the embedded token, `iss` from the resolved issuer, `aud` from the
/// caller, confirmation fingerprint verbatim, `exp = now + ttl`, signed by
/// the embedded private key if present, otherwise the local Key Store.
pub fn synthesize_bypass_token(
    embedded_claims: &ClaimSet,
    header: &Header,
    issuer: &str,
    audience: &str,
    fingerprint: Option<String>,
    ttl_secs: i64,
    local_keystore: &KeyStore,
) -> AuthResult<String> {
    let now = Utc::now().timestamp();

    let claims = ClaimSet {
        sub: embedded_claims.sub.clone(),
        iss: issuer.to_string(),
        aud: Some(audience.to_string()),
        iat: now,
        exp: now + ttl_secs,
        jti: Uuid::new_v4().to_string(),
        scope: embedded_claims.scope.clone(),
        display_name: embedded_claims.display_name.clone(),
        confirmation: fingerprint.map(|x5t_s256| Confirmation { x5t_s256 }),
    };

    let embedded_jwk = header
        .jwk
        .as_ref()
        .ok_or_else(|| AuthError::MalformedToken("missing embedded jwk".to_string()))?;

    if let Some(d) = &embedded_jwk.d {
        let scalar_bytes = URL_SAFE_NO_PAD
            .decode(d)
            .map_err(|e| AuthError::MalformedToken(format!("invalid embedded private scalar: {e}")))?;
        let scalar: [u8; 32] = scalar_bytes
            .try_into()
            .map_err(|_| AuthError::MalformedToken("embedded private scalar has wrong length".to_string()))?;
        let embedded_signing_key = SigningKey::from_bytes(&scalar);
        let out_header = Header::with_jwk(embedded_jwk.clone());
        token::encode(&out_header, &claims, |bytes| embedded_signing_key.sign(bytes))
    } else {
        let out_header = Header::with_kid(local_keystore.key_id().to_string());
        token::encode(&out_header, &claims, |bytes| local_keystore.sign(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::types::Jwk;
    use rand::rngs::OsRng;

    fn embedded_jwk_with_private(signing_key: &SigningKey) -> Jwk {
        let mut jwk = Jwk::public("embedded", URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes()));
        jwk.d = Some(URL_SAFE_NO_PAD.encode(signing_key.to_bytes()));
        jwk
    }

    fn sample_claims(sub: &str) -> ClaimSet {
        ClaimSet {
            sub: sub.to_string(),
            iss: "self-signed".to_string(),
            aud: None,
            iat: 0,
            exp: 0,
            jti: "test-jti".to_string(),
            scope: None,
            display_name: None,
            confirmation: None,
        }
    }

    #[test]
    fn test_is_self_signed_detects_embedded_jwk() {
        let jwk = Jwk::public("k", "x");
        let header = Header::with_jwk(jwk);
        assert!(is_self_signed(&header));

        let header = Header::with_kid("k");
        assert!(!is_self_signed(&header));
    }

    #[test]
    fn test_verify_with_embedded_key_succeeds_for_self_consistent_token() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let jwk = embedded_jwk_with_private(&signing_key);
        let header = Header::with_jwk(jwk);
        let claims = sample_claims("player-1");

        let token = token::encode(&header, &claims, |bytes| signing_key.sign(bytes)).unwrap();
        let decoded = token::decode_unverified(&token).unwrap();

        assert!(verify_with_embedded_key(&decoded).unwrap());
    }

    #[test]
    fn test_verify_with_embedded_key_fails_for_tampered_signature() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let other_key = SigningKey::generate(&mut OsRng);
        let jwk = embedded_jwk_with_private(&signing_key);
        let header = Header::with_jwk(jwk);
        let claims = sample_claims("player-1");

        // Sign with a different key than the one embedded in the header.
        let token = token::encode(&header, &claims, |bytes| other_key.sign(bytes)).unwrap();
        let decoded = token::decode_unverified(&token).unwrap();

        assert!(!verify_with_embedded_key(&decoded).unwrap());
    }

    #[test]
    fn test_should_bypass_exchange_requires_both_self_signed_and_flag() {
        let settings = Settings::for_tests("auth.hytale.test");
        let jwk = Jwk::public("k", "x");
        let header = Header::with_jwk(jwk);
        assert!(should_bypass_exchange(&header, &settings));

        // Not self-signed: flag alone isn't enough.
        let kid_header = Header::with_kid("k");
        assert!(!should_bypass_exchange(&kid_header, &settings));

        // Self-signed, but the deployment doesn't accept the bypass.
        let mut settings = settings;
        settings.set_accept_self_signed_for_test(false);
        let jwk = Jwk::public("k", "x");
        let header = Header::with_jwk(jwk);
        assert!(!should_bypass_exchange(&header, &settings));
    }

    #[test]
    fn test_synthesize_bypass_token_uses_embedded_key_when_present() {
        let storage = Storage::open_memory().unwrap();
        let local_keystore = KeyStore::load_or_generate(&storage).unwrap();

        let signing_key = SigningKey::generate(&mut OsRng);
        let jwk = embedded_jwk_with_private(&signing_key);
        let header = Header::with_jwk(jwk);
        let claims = sample_claims("player-1");

        let token_str = synthesize_bypass_token(
            &claims,
            &header,
            "https://auth.hytale.test",
            "server-1",
            Some("fingerprint-abc".to_string()),
            36_000,
            &local_keystore,
        )
        .unwrap();

        let decoded = token::decode_unverified(&token_str).unwrap();
        assert_eq!(decoded.claims.sub, "player-1");
        assert_eq!(decoded.claims.aud.as_deref(), Some("server-1"));
        assert!(
            decoded
                .claims
                .confirmation
                .as_ref()
                .is_some_and(|c| c.x5t_s256 == "fingerprint-abc")
        );
        // Signed with the embedded key, not the local keystore's.
        assert!(verify_with_embedded_key(&decoded).unwrap());
    }

    #[test]
    fn test_synthesize_bypass_token_falls_back_to_local_key_without_embedded_private_scalar() {
        let storage = Storage::open_memory().unwrap();
        let local_keystore = KeyStore::load_or_generate(&storage).unwrap();

        let signing_key = SigningKey::generate(&mut OsRng);
        let jwk = Jwk::public("embedded", URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes()));
        let header = Header::with_jwk(jwk);
        let claims = sample_claims("player-1");

        let token_str = synthesize_bypass_token(
            &claims,
            &header,
            "https://auth.hytale.test",
            "server-1",
            None,
            36_000,
            &local_keystore,
        )
        .unwrap();

        let decoded = token::decode_unverified(&token_str).unwrap();
        assert_eq!(decoded.header.kid.as_deref(), Some(local_keystore.key_id()));
        assert!(token::verify(&decoded, &local_keystore.verifying_key()));
    }
}
