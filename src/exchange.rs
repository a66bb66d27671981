//! Exchange State Machine — session/grant/access-token lifecycle.
//!
//! States: `none → identified → granted(audience) → authorized(audience)`.
//! Every transition either emits a fresh signed token pair or a grant, and
//! persists the corresponding record via `Storage`.

use chrono::Utc;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{AuthError, AuthResult};
use crate::jwks::JwksFederation;
use crate::keystore::KeyStore;
use crate::selfsigned;
use crate::storage::Storage;
use crate::token::{self, DecodedToken};
use crate::types::{ClaimSet, DEFAULT_SCOPE, GrantRecord, Header, Scopes, SessionRecord};

/// Identity + session token pair returned by every session-producing
/// transition.
pub struct TokenPair {
    pub identity_token: String,
    pub session_token: String,
    pub expires_at: i64,
}

/// Result of `authorize`.
#[derive(Debug)]
pub struct Grant {
    pub authorization_grant: String,
    pub expires_at: i64,
}

/// Result of `exchange`.
pub struct AccessTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub expires_at: i64,
    pub scope: String,
}

fn issue_pair(
    player_id: &str,
    display_name: Option<String>,
    audience: Option<String>,
    scope: String,
    issuer_url: &str,
    ttl_secs: i64,
    local_keystore: &KeyStore,
) -> AuthResult<TokenPair> {
    let now = Utc::now().timestamp();
    let expires_at = now + ttl_secs;

    let claims = ClaimSet {
        sub: player_id.to_string(),
        iss: issuer_url.to_string(),
        aud: audience.clone(),
        iat: now,
        exp: expires_at,
        jti: Uuid::new_v4().to_string(),
        scope: Some(scope),
        display_name: display_name.clone(),
        confirmation: None,
    };

    let header = Header::with_kid(local_keystore.key_id().to_string());
    let identity_token = token::encode(&header, &claims, |bytes| local_keystore.sign(bytes))?;
    // Session token carries the same claims; the identity/session split
    // exists so a client can hold a long-lived session handle distinct
    // from the identity token it presents to servers.
    let session_token = token::encode(&header, &claims, |bytes| local_keystore.sign(bytes))?;

    Ok(TokenPair {
        identity_token,
        session_token,
        expires_at,
    })
}

fn new_session_with_scope(
    player_id: &str,
    display_name: Option<String>,
    scope: String,
    issuer_url: &str,
    settings: &Settings,
    local_keystore: &KeyStore,
    storage: &Storage,
) -> AuthResult<TokenPair> {
    let pair = issue_pair(
        player_id,
        display_name.clone(),
        None,
        scope,
        issuer_url,
        settings.session_ttl_secs(),
        local_keystore,
    )?;

    let record = SessionRecord {
        player_id: player_id.to_string(),
        display_name,
        audience: None,
        issued_at: Utc::now().timestamp(),
        expires_at: pair.expires_at,
    };
    storage.put_session(player_id, &record)?;

    Ok(pair)
}

/// `new_session(player_id, display_name)` → identified.
pub fn new_session(
    player_id: &str,
    display_name: Option<String>,
    issuer_url: &str,
    settings: &Settings,
    local_keystore: &KeyStore,
    storage: &Storage,
) -> AuthResult<TokenPair> {
    new_session_with_scope(
        player_id,
        display_name,
        DEFAULT_SCOPE.to_string(),
        issuer_url,
        settings,
        local_keystore,
        storage,
    )
}

/// `refresh_session(token)` → identified.
///
/// Subject/display name are read from the presented claims without
/// re-verifying the signature — an unparseable token still emits a fresh
/// pair using a synthetic subject, so a client is never permanently locked
/// out of refreshing.
pub fn refresh_session(
    presented_token: &str,
    issuer_url: &str,
    settings: &Settings,
    local_keystore: &KeyStore,
    storage: &Storage,
) -> AuthResult<TokenPair> {
    let (player_id, display_name, scope) = match token::decode_unverified(presented_token) {
        Ok(decoded) => (
            decoded.claims.sub,
            decoded.claims.display_name,
            decoded.claims.scope.unwrap_or_else(|| DEFAULT_SCOPE.to_string()),
        ),
        Err(_) => (format!("anonymous-{}", Uuid::new_v4()), None, DEFAULT_SCOPE.to_string()),
    };

    let pair = issue_pair(
        &player_id,
        display_name.clone(),
        None,
        scope,
        issuer_url,
        settings.session_ttl_secs(),
        local_keystore,
    )?;

    let record = SessionRecord {
        player_id: player_id.clone(),
        display_name,
        audience: None,
        issued_at: Utc::now().timestamp(),
        expires_at: pair.expires_at,
    };
    storage.put_session(&player_id, &record)?;

    Ok(pair)
}

/// `new_session` variant for child sessions: same player, caller-specified
/// scope, same TTL as the parent.
pub fn child_session(
    player_id: &str,
    display_name: Option<String>,
    scopes: &Scopes,
    issuer_url: &str,
    settings: &Settings,
    local_keystore: &KeyStore,
    storage: &Storage,
) -> AuthResult<TokenPair> {
    new_session_with_scope(
        player_id,
        display_name,
        scopes.normalize(),
        issuer_url,
        settings,
        local_keystore,
        storage,
    )
}

/// `authorize(identity_token, audience, scopes)` → granted(audience).
///
/// Applies the self-signed bypass policy when the presented identity token
/// is self-signed and the deployment accepts it; otherwise the Key Store
/// signs a grant under the resolved issuer with normalized scopes.
pub async fn authorize(
    identity_token: Option<&str>,
    audience: &str,
    scopes: &Scopes,
    issuer_url: &str,
    settings: &Settings,
    local_keystore: &KeyStore,
    jwks: &JwksFederation,
    storage: &Storage,
) -> AuthResult<Grant> {
    let scope = scopes.normalize();
    let now = Utc::now().timestamp();
    let expires_at = now + settings.session_ttl_secs();
    let grant_id = Uuid::new_v4().to_string();

    let subject = match identity_token {
        Some(raw) => {
            let decoded = token::decode_unverified(raw)?;
            if decoded.header.is_self_signed() {
                if !settings.accept_self_signed() {
                    return Err(AuthError::SignatureInvalid);
                }
                if !selfsigned::verify_with_embedded_key(&decoded)? {
                    return Err(AuthError::SignatureInvalid);
                }
            } else {
                let key = jwks
                    .get_key_for_token(&decoded.header, &decoded.claims.iss, settings, local_keystore)
                    .await
                    .ok_or(AuthError::UnknownKey)?;
                let verifying_key = key.to_verifying_key()?;
                if !token::verify(&decoded, &verifying_key) {
                    return Err(AuthError::SignatureInvalid);
                }
            }
            decoded.claims.sub
        }
        None => return Err(AuthError::MissingClaim("identityToken".to_string())),
    };

    let claims = ClaimSet {
        sub: subject.clone(),
        iss: issuer_url.to_string(),
        aud: Some(audience.to_string()),
        iat: now,
        exp: expires_at,
        jti: Uuid::new_v4().to_string(),
        scope: Some(scope.clone()),
        display_name: None,
        confirmation: None,
    };

    let header = Header::with_kid(local_keystore.key_id().to_string());
    let authorization_grant = token::encode(&header, &claims, |bytes| local_keystore.sign(bytes))?;

    let record = GrantRecord {
        grant_id: grant_id.clone(),
        subject,
        audience: audience.to_string(),
        scope,
        issued_at: now,
        expires_at,
    };
    storage.put_grant(&grant_id, &record)?;

    Ok(Grant {
        authorization_grant,
        expires_at,
    })
}

/// Caller-supplied audience wins; else derived from bearer `aud`, or from
/// bearer `sub` when bearer `scope == "hytale:server"`.
fn capture_audience(caller_supplied: Option<&str>, bearer: &ClaimSet) -> Option<String> {
    if let Some(aud) = caller_supplied {
        return Some(aud.to_string());
    }
    if let Some(aud) = &bearer.aud {
        return Some(aud.clone());
    }
    if bearer.scope.as_deref() == Some("hytale:server") {
        return Some(bearer.sub.clone());
    }
    None
}

/// `exchange(grant_token, fingerprint?)` → authorized(audience).
///
/// Subject/audience are read from the grant without re-verification. The
/// access token's confirmation carries the fingerprint verbatim if
/// present. Self-signed + bypass substitutes per the bypass policy.
pub fn exchange(
    grant_token: &str,
    caller_audience: Option<&str>,
    fingerprint: Option<String>,
    issuer_url: &str,
    settings: &Settings,
    local_keystore: &KeyStore,
    storage: &Storage,
) -> AuthResult<AccessTokenResponse> {
    let decoded: DecodedToken = token::decode_unverified(grant_token)?;

    let access_token = if selfsigned::should_bypass_exchange(&decoded.header, settings) {
        if !selfsigned::verify_with_embedded_key(&decoded)? {
            return Err(AuthError::SignatureInvalid);
        }
        let audience = capture_audience(caller_audience, &decoded.claims)
            .ok_or_else(|| AuthError::MissingClaim("audience".to_string()))?;
        selfsigned::synthesize_bypass_token(
            &decoded.claims,
            &decoded.header,
            issuer_url,
            &audience,
            fingerprint.clone(),
            settings.session_ttl_secs(),
            local_keystore,
        )?
    } else {
        let audience = capture_audience(caller_audience, &decoded.claims)
            .ok_or_else(|| AuthError::MissingClaim("audience".to_string()))?;
        let now = Utc::now().timestamp();
        let expires_at = now + settings.session_ttl_secs();

        let claims = ClaimSet {
            sub: decoded.claims.sub.clone(),
            iss: issuer_url.to_string(),
            aud: Some(audience),
            iat: now,
            exp: expires_at,
            jti: Uuid::new_v4().to_string(),
            scope: decoded.claims.scope.clone(),
            display_name: None,
            confirmation: fingerprint
                .clone()
                .map(|x5t_s256| crate::types::Confirmation { x5t_s256 }),
        };

        let header = Header::with_kid(local_keystore.key_id().to_string());
        token::encode(&header, &claims, |bytes| local_keystore.sign(bytes))?
    };

    let access_decoded = token::decode_unverified(&access_token)?;
    let expires_at = access_decoded.claims.exp;

    let record = SessionRecord {
        player_id: access_decoded.claims.sub.clone(),
        display_name: None,
        audience: access_decoded.claims.aud.clone(),
        issued_at: access_decoded.claims.iat,
        expires_at,
    };
    storage.put_session(&access_decoded.claims.sub, &record)?;

    let refresh_token = access_token.clone();

    Ok(AccessTokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: settings.session_ttl_secs(),
        refresh_token,
        expires_at,
        scope: access_decoded.claims.scope.unwrap_or_default(),
    })
}

/// `delete_session(token)` → none. Always reports success, even when the
/// token doesn't resolve to a known session.
pub fn delete_session(token: &str, storage: &Storage) -> AuthResult<()> {
    if let Ok(decoded) = token::decode_unverified(token) {
        let _ = storage.delete_session(&decoded.claims.sub);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    fn fixture() -> (Settings, KeyStore, Storage, JwksFederation) {
        let settings = Settings::for_tests("auth.hytale.test");
        let storage = Storage::open_memory().unwrap();
        let keystore = KeyStore::load_or_generate(&storage).unwrap();
        let jwks = JwksFederation::new(&settings);
        (settings, keystore, storage, jwks)
    }

    #[test]
    fn test_new_session_registers_record() {
        let (settings, keystore, storage, _jwks) = fixture();
        let pair = new_session(
            "player-1",
            Some("Player One".to_string()),
            "https://auth.hytale.test",
            &settings,
            &keystore,
            &storage,
        )
        .unwrap();

        assert!(pair.expires_at > Utc::now().timestamp());
        let record: Option<SessionRecord> = storage.get_session("player-1").unwrap();
        assert!(record.is_some());
    }

    #[test]
    fn test_refresh_with_garbage_token_does_not_lock_out() {
        let (settings, keystore, storage, _jwks) = fixture();
        let pair = refresh_session(
            "not-a-real-token",
            "https://auth.hytale.test",
            &settings,
            &keystore,
            &storage,
        )
        .unwrap();

        assert!(!pair.identity_token.is_empty());
        assert!(!pair.session_token.is_empty());
    }

    #[test]
    fn test_refresh_preserves_subject_from_presented_token() {
        let (settings, keystore, storage, _jwks) = fixture();
        let original = new_session(
            "player-42",
            None,
            "https://auth.hytale.test",
            &settings,
            &keystore,
            &storage,
        )
        .unwrap();

        let refreshed = refresh_session(
            &original.session_token,
            "https://auth.hytale.test",
            &settings,
            &keystore,
            &storage,
        )
        .unwrap();

        let decoded = token::decode_unverified(&refreshed.identity_token).unwrap();
        assert_eq!(decoded.claims.sub, "player-42");
    }

    #[tokio::test]
    async fn test_authorize_requires_identity_token() {
        let (settings, keystore, storage, jwks) = fixture();
        let err = authorize(
            None,
            "server-1",
            &Scopes::None,
            "https://auth.hytale.test",
            &settings,
            &keystore,
            &jwks,
            &storage,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::MissingClaim(_)));
    }

    #[tokio::test]
    async fn test_authorize_verifies_locally_issued_identity_token() {
        let (settings, keystore, storage, jwks) = fixture();
        let session = new_session(
            "player-8",
            None,
            "https://auth.hytale.test",
            &settings,
            &keystore,
            &storage,
        )
        .unwrap();

        // Tamper with the signature segment: verification against the
        // federation-resolved key must now catch this, not just trust the
        // decoded claims.
        let mut segments: Vec<&str> = session.identity_token.split('.').collect();
        let tampered_signature = if segments[2].starts_with('A') { "B" } else { "A" };
        segments[2] = tampered_signature;
        let tampered = segments.join(".");

        let err = authorize(
            Some(&tampered),
            "server-8",
            &Scopes::None,
            "https://auth.hytale.test",
            &settings,
            &keystore,
            &jwks,
            &storage,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::SignatureInvalid | AuthError::MalformedToken(_)));
    }

    #[tokio::test]
    async fn test_authorize_then_exchange_round_trip() {
        let (settings, keystore, storage, jwks) = fixture();
        let session = new_session(
            "player-7",
            None,
            "https://auth.hytale.test",
            &settings,
            &keystore,
            &storage,
        )
        .unwrap();

        let grant = authorize(
            Some(&session.identity_token),
            "server-7",
            &Scopes::None,
            "https://auth.hytale.test",
            &settings,
            &keystore,
            &jwks,
            &storage,
        )
        .await
        .unwrap();

        let access = exchange(
            &grant.authorization_grant,
            None,
            Some("fingerprint-xyz".to_string()),
            "https://auth.hytale.test",
            &settings,
            &keystore,
            &storage,
        )
        .unwrap();

        assert_eq!(access.token_type, "Bearer");
        let decoded = token::decode_unverified(&access.access_token).unwrap();
        assert_eq!(decoded.claims.sub, "player-7");
        assert_eq!(decoded.claims.aud.as_deref(), Some("server-7"));
        assert!(
            decoded
                .claims
                .confirmation
                .as_ref()
                .is_some_and(|c| c.x5t_s256 == "fingerprint-xyz")
        );
    }

    #[test]
    fn test_child_session_carries_normalized_scope() {
        let (settings, keystore, storage, _jwks) = fixture();
        let scopes = Scopes::List(vec!["hytale:server".to_string()]);
        let pair = child_session(
            "player-3",
            None,
            &scopes,
            "https://auth.hytale.test",
            &settings,
            &keystore,
            &storage,
        )
        .unwrap();

        let decoded = token::decode_unverified(&pair.identity_token).unwrap();
        assert_eq!(decoded.claims.scope.as_deref(), Some("hytale:server"));
    }

    #[test]
    fn test_new_session_defaults_to_default_scope() {
        let (settings, keystore, storage, _jwks) = fixture();
        let pair = new_session(
            "player-4",
            None,
            "https://auth.hytale.test",
            &settings,
            &keystore,
            &storage,
        )
        .unwrap();

        let decoded = token::decode_unverified(&pair.identity_token).unwrap();
        assert_eq!(decoded.claims.scope.as_deref(), Some(DEFAULT_SCOPE));
    }

    #[test]
    fn test_delete_session_always_succeeds() {
        let (_, _, storage, _jwks) = fixture();
        assert!(delete_session("anything-at-all", &storage).is_ok());
    }
}
