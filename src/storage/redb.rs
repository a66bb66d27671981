//! ReDB storage implementation for the auth service.
//!
//! Provides persistent storage for the signing key record, sessions,
//! authorization grants, the foreign-key federation cache, and the
//! hash-chained audit log.
//!
//! Each table uses string keys and JSON-serialized values.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{AuthError, AuthResult};

const SIGNING_KEY: TableDefinition<&str, &[u8]> = TableDefinition::new("signing_key");
const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
const GRANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("grants");
const FOREIGN_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("foreign_keys");
const AUDIT_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_log");

/// Key the service's own signing key record is stored under. There is
/// exactly one per database.
const SIGNING_KEY_SLOT: &str = "current";

/// Storage wrapper for ReDB.
///
/// Thread-safe via internal Arc. Clone is cheap.
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
}

impl Storage {
    /// Open or create a database at the given path.
    ///
    /// Creates parent directories if they don't exist.
    pub fn open(path: &Path) -> AuthResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(path).map_err(|e| AuthError::PersistenceFatal(e.to_string()))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SIGNING_KEY)?;
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(GRANTS)?;
            let _ = write_txn.open_table(FOREIGN_KEYS)?;
            let _ = write_txn.open_table(AUDIT_LOG)?;
        }
        write_txn.commit()?;

        tracing::info!(path = %path.display(), "opened storage database");

        Ok(Self { db: Arc::new(db) })
    }

    /// Open an in-memory database for testing.
    pub fn open_memory() -> AuthResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| AuthError::PersistenceFatal(e.to_string()))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(SIGNING_KEY)?;
            let _ = write_txn.open_table(SESSIONS)?;
            let _ = write_txn.open_table(GRANTS)?;
            let _ = write_txn.open_table(FOREIGN_KEYS)?;
            let _ = write_txn.open_table(AUDIT_LOG)?;
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    // =========================================================================
    // Signing key
    // =========================================================================

    /// Persist the service's signing key record, overwriting any prior one.
    pub fn put_signing_key<T: Serialize>(&self, record: &T) -> AuthResult<()> {
        let value = serde_json::to_vec(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SIGNING_KEY)?;
            table.insert(SIGNING_KEY_SLOT, value.as_slice())?;
        }
        write_txn.commit()?;
        tracing::debug!("persisted signing key record");
        Ok(())
    }

    /// Load the service's signing key record, if one has been persisted.
    pub fn get_signing_key<T: DeserializeOwned>(&self) -> AuthResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SIGNING_KEY)?;

        match table.get(SIGNING_KEY_SLOT)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub fn put_session<T: Serialize>(&self, player_id: &str, session: &T) -> AuthResult<()> {
        let value = serde_json::to_vec(session)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(SESSIONS)?;
            table.insert(player_id, value.as_slice())?;
        }
        write_txn.commit()?;
        tracing::debug!(player_id, "stored session");
        Ok(())
    }

    pub fn get_session<T: DeserializeOwned>(&self, player_id: &str) -> AuthResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;

        match table.get(player_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn delete_session(&self, player_id: &str) -> AuthResult<bool> {
        let write_txn = self.db.begin_write()?;
        let deleted = {
            let mut table = write_txn.open_table(SESSIONS)?;
            table.remove(player_id)?.is_some()
        };
        write_txn.commit()?;

        if deleted {
            tracing::debug!(player_id, "deleted session");
        }
        Ok(deleted)
    }

    // =========================================================================
    // Authorization grants
    // =========================================================================

    pub fn put_grant<T: Serialize>(&self, grant_id: &str, grant: &T) -> AuthResult<()> {
        let value = serde_json::to_vec(grant)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(GRANTS)?;
            table.insert(grant_id, value.as_slice())?;
        }
        write_txn.commit()?;
        tracing::debug!(grant_id, "stored authorization grant");
        Ok(())
    }

    pub fn get_grant<T: DeserializeOwned>(&self, grant_id: &str) -> AuthResult<Option<T>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(GRANTS)?;

        match table.get(grant_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Foreign key federation cache
    // =========================================================================

    /// Key format: `{issuer}|{kid}`.
    fn foreign_key_key(issuer: &str, kid: &str) -> String {
        format!("{issuer}|{kid}")
    }

    pub fn put_foreign_key<T: Serialize>(
        &self,
        issuer: &str,
        kid: &str,
        record: &T,
    ) -> AuthResult<()> {
        let key = Self::foreign_key_key(issuer, kid);
        let value = serde_json::to_vec(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(FOREIGN_KEYS)?;
            table.insert(key.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_foreign_key<T: DeserializeOwned>(
        &self,
        issuer: &str,
        kid: &str,
    ) -> AuthResult<Option<T>> {
        let key = Self::foreign_key_key(issuer, kid);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(FOREIGN_KEYS)?;

        match table.get(key.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Audit log
    // =========================================================================

    /// Append an entry to the audit log, returning its sequence number.
    pub fn append_audit_log<T: Serialize>(&self, entry: &T) -> AuthResult<u64> {
        let value = serde_json::to_vec(entry)?;
        let write_txn = self.db.begin_write()?;

        let seq = {
            let mut table = write_txn.open_table(AUDIT_LOG)?;

            let seq = table
                .iter()?
                .last()
                .transpose()?
                .map_or(0, |(k, _)| k.value() + 1);

            table.insert(seq, value.as_slice())?;
            seq
        };

        write_txn.commit()?;
        tracing::trace!(seq, "appended audit log entry");
        Ok(seq)
    }

    pub fn get_audit_log_range<T: DeserializeOwned>(
        &self,
        start: u64,
        end: u64,
    ) -> AuthResult<Vec<(u64, T)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;

        let entries: Result<Vec<_>, AuthError> = table
            .range(start..end)?
            .map(|entry| {
                let (k, v) = entry?;
                let parsed: T = serde_json::from_slice(v.value())?;
                Ok((k.value(), parsed))
            })
            .collect();

        entries
    }

    pub fn get_latest_audit_seq(&self) -> AuthResult<Option<u64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;

        Ok(table.iter()?.last().transpose()?.map(|(k, _)| k.value()))
    }

    pub fn get_audit_entry(&self, seq: u64) -> AuthResult<Option<crate::audit::AuditEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_LOG)?;

        match table.get(seq)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestSession {
        id: String,
        status: String,
    }

    #[test]
    fn test_session_crud() -> AuthResult<()> {
        let storage = Storage::open_memory()?;

        let session = TestSession {
            id: "player-1".to_string(),
            status: "identified".to_string(),
        };

        storage.put_session("player-1", &session)?;

        let retrieved: Option<TestSession> = storage.get_session("player-1")?;
        assert_eq!(retrieved, Some(session));

        assert!(storage.delete_session("player-1")?);
        assert!(storage.get_session::<TestSession>("player-1")?.is_none());

        Ok(())
    }

    #[test]
    fn test_foreign_key_cache_roundtrip() -> AuthResult<()> {
        let storage = Storage::open_memory()?;

        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Key {
            x: String,
        }

        let key = Key { x: "abc".to_string() };
        storage.put_foreign_key("https://other.example", "kid-1", &key)?;

        let retrieved: Option<Key> = storage.get_foreign_key("https://other.example", "kid-1")?;
        assert_eq!(retrieved, Some(key));

        assert!(
            storage
                .get_foreign_key::<Key>("https://other.example", "kid-missing")?
                .is_none()
        );

        Ok(())
    }

    #[test]
    fn test_audit_log_append_and_range() -> AuthResult<()> {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Entry {
            event: String,
        }

        let storage = Storage::open_memory()?;

        let seq1 = storage.append_audit_log(&Entry {
            event: "first".to_string(),
        })?;
        let seq2 = storage.append_audit_log(&Entry {
            event: "second".to_string(),
        })?;

        assert_eq!(seq1, 0);
        assert_eq!(seq2, 1);
        assert_eq!(storage.get_latest_audit_seq()?, Some(1));

        let entries: Vec<(u64, Entry)> = storage.get_audit_log_range(0, 10)?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1.event, "first");
        assert_eq!(entries[1].1.event, "second");

        Ok(())
    }
}
