//! Hash-chained audit log for key lifecycle and session events.
//!
//! Provides tamper-evident audit logging with:
//! - Sequential entries linked by SHA-256 hashes
//! - Ed25519 signatures on each entry
//! - Chain verification for integrity checking
//!
//! ## Security Properties
//!
//! - **Tamper-evident**: Modifying any entry breaks the hash chain
//! - **Non-repudiation**: Ed25519 signatures prove entry authenticity
//! - **Ordered**: Sequence numbers prevent reordering attacks

use std::sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use ed25519_dalek::{SecretKey, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, AuthResult};
use crate::storage::Storage;

/// Types of auditable events this service records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    KeyGenerated,
    KeyLoaded,
    ForeignKeyFetched,
    ForeignKeyFetchFailed,
    BypassTokenIssued,
    SessionCreated,
    SessionDeleted,
    ServiceStart,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyGenerated => write!(f, "key_generated"),
            Self::KeyLoaded => write!(f, "key_loaded"),
            Self::ForeignKeyFetched => write!(f, "foreign_key_fetched"),
            Self::ForeignKeyFetchFailed => write!(f, "foreign_key_fetch_failed"),
            Self::BypassTokenIssued => write!(f, "bypass_token_issued"),
            Self::SessionCreated => write!(f, "session_created"),
            Self::SessionDeleted => write!(f, "session_deleted"),
            Self::ServiceStart => write!(f, "service_start"),
        }
    }
}

/// Actor that triggered an audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditActor {
    /// A player/session subject identified by token `sub`.
    Player { player_id: String },
    /// A foreign issuer encountered during federation.
    Issuer { issuer: String },
    /// The service itself (startup, key lifecycle).
    System,
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure { reason: String },
}

/// A single audit log entry with hash-chain linking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub actor: AuditActor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub outcome: AuditOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    /// SHA-256 hash of the previous entry (hex).
    pub prev_hash: String,
    /// Ed25519 signature of this entry (hex).
    pub signature: String,
}

impl AuditEntry {
    /// Compute the canonical bytes for hashing/signing.
    ///
    /// Format: seq|timestamp|event_type|actor|session_id|outcome|context|
    /// prev_hash. Excludes the signature field.
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&self.seq.to_be_bytes());
        data.extend_from_slice(self.timestamp.to_rfc3339().as_bytes());
        data.extend_from_slice(self.event_type.to_string().as_bytes());
        data.extend_from_slice(
            serde_json::to_string(&self.actor)
                .unwrap_or_default()
                .as_bytes(),
        );
        if let Some(ref session_id) = self.session_id {
            data.extend_from_slice(session_id.as_bytes());
        }
        data.extend_from_slice(
            serde_json::to_string(&self.outcome)
                .unwrap_or_default()
                .as_bytes(),
        );
        if let Some(ref context) = self.context {
            data.extend_from_slice(context.to_string().as_bytes());
        }
        data.extend_from_slice(self.prev_hash.as_bytes());
        data
    }

    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        hasher.update(self.signature.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn verify_signature(&self, verifying_key: &VerifyingKey) -> bool {
        let Ok(signature_bytes) = hex::decode(&self.signature) else {
            return false;
        };

        let Ok(signature) = ed25519_dalek::Signature::from_slice(&signature_bytes) else {
            return false;
        };

        let data = self.canonical_bytes();
        verifying_key.verify(&data, &signature).is_ok()
    }
}

/// Genesis hash for the first entry in the chain.
const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audit logger with hash-chaining and signing.
pub struct AuditLogger {
    storage: Storage,
    signing_key: SigningKey,
    current_seq: AtomicU64,
    /// Serialize appends to preserve hash chain integrity.
    append_lock: Mutex<()>,
}

impl AuditLogger {
    /// Create a new audit logger with a fresh, throwaway signing key. The
    /// audit log's own key is independent of the service's token-signing
    /// key — it only needs to prove this log wasn't rewritten after the
    /// fact, not to be discoverable by clients.
    pub fn new(storage: Storage) -> AuthResult<Self> {
        let mut secret_key_bytes: SecretKey = [0u8; 32];
        OsRng.fill_bytes(&mut secret_key_bytes);
        let signing_key = SigningKey::from_bytes(&secret_key_bytes);

        let current_seq = storage.get_latest_audit_seq()?.unwrap_or(0);

        Ok(Self {
            storage,
            signing_key,
            current_seq: AtomicU64::new(current_seq),
            append_lock: Mutex::new(()),
        })
    }

    pub fn with_signing_key(storage: Storage, signing_key: SigningKey) -> AuthResult<Self> {
        let current_seq = storage.get_latest_audit_seq()?.unwrap_or(0);

        Ok(Self {
            storage,
            signing_key,
            current_seq: AtomicU64::new(current_seq),
            append_lock: Mutex::new(()),
        })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Append a new audit entry. Returns its sequence number.
    pub fn append(
        &self,
        event_type: AuditEventType,
        actor: AuditActor,
        session_id: Option<String>,
        outcome: AuditOutcome,
        context: Option<serde_json::Value>,
    ) -> AuthResult<u64> {
        let _append_guard = self
            .append_lock
            .lock()
            .map_err(|_e| AuthError::Storage("audit append lock poisoned".to_string()))?;

        let seq = self.current_seq.load(Ordering::SeqCst) + 1;

        let prev_hash = if seq == 1 {
            GENESIS_HASH.to_string()
        } else {
            self.storage
                .get_audit_entry(seq - 1)?
                .map(|entry| entry.hash())
                .ok_or_else(|| AuthError::Storage(format!("missing audit entry {}", seq - 1)))?
        };

        let mut entry = AuditEntry {
            seq,
            timestamp: Utc::now(),
            event_type,
            actor,
            session_id,
            outcome,
            context,
            prev_hash,
            signature: String::new(),
        };

        let data = entry.canonical_bytes();
        let signature = self.signing_key.sign(&data);
        entry.signature = hex::encode(signature.to_bytes());

        self.storage.append_audit_log(&entry)?;
        self.current_seq.store(seq, Ordering::SeqCst);

        tracing::debug!(seq, event_type = %event_type, "audit entry appended");

        Ok(seq)
    }

    /// Verify the hash chain integrity between two sequence numbers
    /// (inclusive).
    pub fn verify_chain(&self, start: u64, end: u64) -> AuthResult<bool> {
        if start > end {
            return Ok(false);
        }

        let verifying_key = self.verifying_key();
        let mut expected_prev_hash = if start == 1 {
            GENESIS_HASH.to_string()
        } else {
            self.storage
                .get_audit_entry(start - 1)?
                .map(|e| e.hash())
                .ok_or_else(|| AuthError::Storage(format!("missing audit entry {}", start - 1)))?
        };

        for seq in start..=end {
            let entry = self
                .storage
                .get_audit_entry(seq)?
                .ok_or_else(|| AuthError::Storage(format!("missing audit entry {seq}")))?;

            if entry.prev_hash != expected_prev_hash {
                tracing::warn!(seq, expected = %expected_prev_hash, actual = %entry.prev_hash, "hash chain broken");
                return Ok(false);
            }

            if !entry.verify_signature(&verifying_key) {
                tracing::warn!(seq, "invalid signature on audit entry");
                return Ok(false);
            }

            expected_prev_hash = entry.hash();
        }

        Ok(true)
    }

    pub fn current_seq(&self) -> u64 {
        self.current_seq.load(Ordering::SeqCst)
    }

    pub fn get_entry(&self, seq: u64) -> AuthResult<Option<AuditEntry>> {
        self.storage.get_audit_entry(seq)
    }
}
