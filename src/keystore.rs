//! Key Store — owns the service's Ed25519 signing keypair.
//!
//! On first use, loads a persisted key record from storage; if none exists
//! or it fails to parse, generates a fresh keypair and persists it. The
//! persisted record and the in-memory key are kept in sync by a single
//! `RwLock`-guarded load at construction time — the keypair itself never
//! changes for the lifetime of the process.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::AuthResult;
use crate::storage::Storage;
use crate::types::{Jwk, PublicKeyRecord, SigningKeyRecord};

const ALG: &str = "EdDSA";

/// Owns the signing keypair and the public discovery record derived from
/// it.
pub struct KeyStore {
    signing_key: SigningKey,
    kid: String,
}

impl KeyStore {
    /// Load a persisted key, or generate and persist a new one.
    ///
    /// Persist failures are logged and do not block startup — the in-memory
    /// key remains usable, but a restart will regenerate a new keypair
    /// since nothing was durably saved.
    pub fn load_or_generate(storage: &Storage) -> AuthResult<Self> {
        match storage.get_signing_key::<SigningKeyRecord>() {
            Ok(Some(record)) => match Self::from_record(&record) {
                Ok(store) => {
                    tracing::info!(kid = %store.kid, "loaded signing key from storage");
                    return Ok(store);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "persisted signing key record was unparseable, regenerating");
                }
            },
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "failed to load signing key, regenerating");
            }
        }

        let store = Self::generate();
        if let Err(err) = storage.put_signing_key(&store.to_record()) {
            tracing::error!(error = %err, "failed to persist newly generated signing key");
        } else {
            tracing::info!(kid = %store.kid, "generated and persisted new signing key");
        }

        Ok(store)
    }

    fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let kid = Self::derive_kid(&signing_key.verifying_key());
        Self { signing_key, kid }
    }

    fn derive_kid(verifying_key: &VerifyingKey) -> String {
        URL_SAFE_NO_PAD.encode(&verifying_key.to_bytes()[..8])
    }

    fn from_record(record: &SigningKeyRecord) -> AuthResult<Self> {
        let scalar_bytes = URL_SAFE_NO_PAD
            .decode(&record.private_scalar)
            .map_err(|e| crate::error::AuthError::Deserialization(e.to_string()))?;
        let scalar: [u8; 32] = scalar_bytes
            .try_into()
            .map_err(|_| crate::error::AuthError::Deserialization("bad scalar length".into()))?;
        let signing_key = SigningKey::from_bytes(&scalar);
        Ok(Self {
            signing_key,
            kid: record.kid.clone(),
        })
    }

    fn to_record(&self) -> SigningKeyRecord {
        SigningKeyRecord {
            alg: ALG.to_string(),
            kid: self.kid.clone(),
            private_scalar: URL_SAFE_NO_PAD.encode(self.signing_key.to_bytes()),
            public_point: URL_SAFE_NO_PAD.encode(self.signing_key.verifying_key().to_bytes()),
            created_at: Utc::now().timestamp(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> &'static str {
        ALG
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, bytes: &[u8]) -> Signature {
        self.signing_key.sign(bytes)
    }

    /// The public discovery record published at `/.well-known/jwks.json`.
    pub fn public_key_record(&self) -> PublicKeyRecord {
        let x = URL_SAFE_NO_PAD.encode(self.signing_key.verifying_key().to_bytes());
        PublicKeyRecord {
            keys: vec![Jwk::public(self.kid.clone(), x)],
        }
    }
}
