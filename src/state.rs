//! Shared application state threaded through every route handler.

use crate::audit::AuditLogger;
use crate::config::Settings;
use crate::jwks::JwksFederation;
use crate::keystore::KeyStore;
use crate::storage::Storage;

/// Everything a request handler needs, held behind `web::Data<AppState>`.
pub struct AppState {
    pub settings: Settings,
    pub storage: Storage,
    pub keystore: KeyStore,
    pub jwks: JwksFederation,
    pub audit: AuditLogger,
}

impl AppState {
    pub fn new(settings: Settings, storage: Storage) -> crate::error::AuthResult<Self> {
        let keystore = KeyStore::load_or_generate(&storage)?;
        let jwks = JwksFederation::new(&settings);
        let audit = AuditLogger::new(storage.clone())?;

        Ok(Self {
            settings,
            storage,
            keystore,
            jwks,
            audit,
        })
    }
}
