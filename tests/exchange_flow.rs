//! End-to-end exchange state machine tests against file-backed storage.
//!
//! Run with: cargo test --test exchange_flow

use tempfile::TempDir;

use auth_service::config::Settings;
use auth_service::exchange;
use auth_service::jwks::JwksFederation;
use auth_service::keystore::KeyStore;
use auth_service::storage::Storage;
use auth_service::token;
use auth_service::types::Scopes;

fn fixture() -> (Settings, KeyStore, Storage, JwksFederation, TempDir) {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let db_path = temp_dir.path().join("auth.redb");
    let storage = Storage::open(&db_path).expect("failed to open storage");
    let settings = Settings::for_tests("auth.hytale.test");
    let keystore = KeyStore::load_or_generate(&storage).expect("failed to load keystore");
    let jwks = JwksFederation::new(&settings);
    (settings, keystore, storage, jwks, temp_dir)
}

#[tokio::test]
async fn new_session_then_authorize_then_exchange_produces_bound_access_token() {
    let (settings, keystore, storage, jwks, _dir) = fixture();

    let session = exchange::new_session(
        "player-100",
        Some("Hundred".to_string()),
        "https://auth.hytale.test",
        &settings,
        &keystore,
        &storage,
    )
    .expect("new_session failed");

    let grant = exchange::authorize(
        Some(&session.identity_token),
        "server-100",
        &Scopes::None,
        "https://auth.hytale.test",
        &settings,
        &keystore,
        &jwks,
        &storage,
    )
    .await
    .expect("authorize failed");

    let access = exchange::exchange(
        &grant.authorization_grant,
        None,
        Some("fp-100".to_string()),
        "https://auth.hytale.test",
        &settings,
        &keystore,
        &storage,
    )
    .expect("exchange failed");

    let decoded = token::decode_unverified(&access.access_token).expect("malformed access token");
    assert_eq!(decoded.claims.sub, "player-100");
    assert_eq!(decoded.claims.aud.as_deref(), Some("server-100"));
    assert!(token::verify(&decoded, &keystore.verifying_key()));
}

#[test]
fn refresh_with_garbage_token_does_not_lock_out() {
    let (settings, keystore, storage, _jwks, _dir) = fixture();

    // A client presenting an unparseable token must still get back a usable
    // pair rather than being stuck unable to recover a session.
    let refreshed = exchange::refresh_session(
        "garbage.not-a-token.at-all",
        "https://auth.hytale.test",
        &settings,
        &keystore,
        &storage,
    )
    .expect("refresh must never fail outright on a malformed token");

    assert!(token::decode_unverified(&refreshed.identity_token).is_ok());
}

#[tokio::test]
async fn authorize_with_self_signed_bypass_reissues_under_embedded_key() {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    use auth_service::types::{ClaimSet, Header, Jwk};

    let (settings, keystore, storage, jwks, _dir) = fixture();

    let embedded_key = SigningKey::generate(&mut OsRng);
    let mut jwk = Jwk::public(
        "embedded",
        URL_SAFE_NO_PAD.encode(embedded_key.verifying_key().to_bytes()),
    );
    jwk.d = Some(URL_SAFE_NO_PAD.encode(embedded_key.to_bytes()));
    let header = Header::with_jwk(jwk);

    let claims = ClaimSet {
        sub: "offline-player".to_string(),
        iss: "self-signed".to_string(),
        aud: None,
        iat: 0,
        exp: 0,
        jti: "test-jti".to_string(),
        scope: None,
        display_name: Some("Offline Player".to_string()),
        confirmation: None,
    };

    let identity_token =
        token::encode(&header, &claims, |bytes| embedded_key.sign(bytes)).expect("encode failed");

    let grant = exchange::authorize(
        Some(&identity_token),
        "server-offline",
        &Scopes::None,
        "https://auth.hytale.test",
        &settings,
        &keystore,
        &jwks,
        &storage,
    )
    .await
    .expect("authorize with self-signed token failed");

    // The bypass-issued grant is signed by this deployment's own key, not
    // the embedded one, because authorize always hands back a grant it owns.
    let decoded = token::decode_unverified(&grant.authorization_grant).unwrap();
    assert_eq!(decoded.claims.sub, "offline-player");
    assert!(token::verify(&decoded, &keystore.verifying_key()));
}

#[test]
fn delete_session_reports_success_for_unknown_tokens() {
    let (_settings, _keystore, storage, _jwks, _dir) = fixture();
    assert!(exchange::delete_session("anything", &storage).is_ok());
}
