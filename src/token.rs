//! Token Codec — pure serialization and signing-input layer. No I/O.
//!
//! Tokens are three-segment compact strings: `header.claims.signature`,
//! each segment URL-safe base64 without padding. `alg` is always `EdDSA`.
//! Decoding never performs a cryptographic check — callers pick a
//! verification key first, then call `verify`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::error::{AuthError, AuthResult};
use crate::types::{ClaimSet, Header};

/// A token split into its parts, not yet cryptographically checked.
#[derive(Debug)]
pub struct DecodedToken {
    pub header: Header,
    pub claims: ClaimSet,
    /// `header_segment.claims_segment`, the exact bytes that were signed.
    pub signing_input: Vec<u8>,
    pub signature: Signature,
}

/// Encode a header and claim set into a compact token string.
pub fn encode(header: &Header, claims: &ClaimSet, sign: impl FnOnce(&[u8]) -> Signature) -> AuthResult<String> {
    let header_json = serde_json::to_vec(header)?;
    let claims_json = serde_json::to_vec(claims)?;

    let header_segment = URL_SAFE_NO_PAD.encode(&header_json);
    let claims_segment = URL_SAFE_NO_PAD.encode(&claims_json);

    let signing_input = format!("{header_segment}.{claims_segment}");
    let signature = sign(signing_input.as_bytes());
    let signature_segment = URL_SAFE_NO_PAD.encode(signature.to_bytes());

    Ok(format!("{signing_input}.{signature_segment}"))
}

/// Split a compact token into header, claims, signing input, and signature,
/// without verifying the signature.
pub fn decode_unverified(token: &str) -> AuthResult<DecodedToken> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::MalformedToken(
            "token must have exactly three segments".to_string(),
        ));
    }
    let [header_segment, claims_segment, signature_segment] = [parts[0], parts[1], parts[2]];

    let header_json = URL_SAFE_NO_PAD
        .decode(header_segment)
        .map_err(|e| AuthError::MalformedToken(format!("invalid header encoding: {e}")))?;
    let header: Header = serde_json::from_slice(&header_json)
        .map_err(|e| AuthError::MalformedToken(format!("invalid header json: {e}")))?;

    if header.alg != "EdDSA" {
        return Err(AuthError::MalformedToken(format!(
            "unsupported algorithm: {}",
            header.alg
        )));
    }

    let claims_json = URL_SAFE_NO_PAD
        .decode(claims_segment)
        .map_err(|e| AuthError::MalformedToken(format!("invalid claims encoding: {e}")))?;
    let claims: ClaimSet = serde_json::from_slice(&claims_json)
        .map_err(|e| AuthError::MalformedToken(format!("invalid claims json: {e}")))?;

    let signature_bytes = URL_SAFE_NO_PAD
        .decode(signature_segment)
        .map_err(|e| AuthError::MalformedToken(format!("invalid signature encoding: {e}")))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|e| AuthError::MalformedToken(format!("invalid signature bytes: {e}")))?;

    let signing_input = format!("{header_segment}.{claims_segment}").into_bytes();

    Ok(DecodedToken {
        header,
        claims,
        signing_input,
        signature,
    })
}

/// Verify a decoded token's signature against a candidate key.
pub fn verify(decoded: &DecodedToken, key: &VerifyingKey) -> bool {
    key.verify(&decoded.signing_input, &decoded.signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Header;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn sample_claims() -> ClaimSet {
        ClaimSet {
            sub: "player-1".to_string(),
            iss: "https://auth.example.test".to_string(),
            aud: None,
            iat: 1_000,
            exp: 2_000,
            jti: "test-jti".to_string(),
            scope: None,
            display_name: Some("Player One".to_string()),
            confirmation: None,
        }
    }

    #[test]
    fn test_encode_then_decode_round_trip() {
        let key = SigningKey::generate(&mut OsRng);
        let header = Header::with_kid("kid-1");
        let claims = sample_claims();

        let token = encode(&header, &claims, |bytes| key.sign(bytes)).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let decoded = decode_unverified(&token).unwrap();
        assert_eq!(decoded.header.kid.as_deref(), Some("kid-1"));
        assert_eq!(decoded.claims.sub, "player-1");
        assert!(verify(&decoded, &key.verifying_key()));
    }

    #[test]
    fn test_decode_rejects_wrong_segment_count() {
        let err = decode_unverified("only.two").unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = decode_unverified("not-base64!!.also-bad!!.sig!!").unwrap_err();
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[test]
    fn test_verify_fails_with_wrong_key() {
        let key = SigningKey::generate(&mut OsRng);
        let other_key = SigningKey::generate(&mut OsRng);
        let header = Header::with_kid("kid-1");
        let claims = sample_claims();

        let token = encode(&header, &claims, |bytes| key.sign(bytes)).unwrap();
        let decoded = decode_unverified(&token).unwrap();

        assert!(!verify(&decoded, &other_key.verifying_key()));
    }
}
